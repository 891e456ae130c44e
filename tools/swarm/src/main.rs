use anyhow::{Context, Error};
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use log::info;
use reqwest::Client;
use std::{env, fs, path::PathBuf, time::Duration};
use swarm::{
    http::wait_until_reachable,
    spec::{StartPolicy, TestSpec},
};

const TARGET_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Swarm load tool.
///
/// This tool runs the tasks described in a test spec against one or more HTTP targets.
#[derive(Parser, Debug)]
#[clap(about, version)]
struct Args {
    /// Load test file
    #[clap(short, long)]
    spec_path: PathBuf,

    /// Output file path.
    #[clap(short, long)]
    output_path: Option<PathBuf>,

    /// Send every request to this host instead, keeping each task's path and query.
    #[clap(long)]
    host: Option<String>,

    /// Enable verbose output.
    #[clap(short, long)]
    verbose: bool,
}

async fn execute_load_test(args: Args) -> Result<(), Error> {
    let spec = fs::read_to_string(&args.spec_path).context("error reading test file")?;
    let spec: TestSpec = serde_yaml::from_str(&spec).context("error parsing test file")?;
    spec.validate().context("invalid test file")?;

    let host = args.host.as_deref();
    if spec.start_policy == StartPolicy::WaitForTargets {
        let client = Client::new();
        for url in spec.target_urls(host)? {
            wait_until_reachable(&client, &url, TARGET_PROBE_INTERVAL).await;
        }
    }

    // Use the given one or generate one based on the current time.
    let output_path = args.output_path.unwrap_or_else(make_output_file_name);
    let tasks = spec.build_tasks(host)?;
    info!("Starting test with {} tasks", tasks.len());
    swarm::run(tasks, spec.runner_config(Some(output_path))).await?;
    Ok(())
}

fn make_output_file_name() -> PathBuf {
    let date = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    PathBuf::from(format!("{date}.json"))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    // Disable everything but our output unless `verbose` is set.
    let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    if !args.verbose {
        env::set_var("RUST_LOG", format!("none,swarm={level}"));
    }
    env_logger::init();

    info!("Initializing test");
    execute_load_test(args).await.map_err(|e| {
        log::error!("Error executing load test: {e:#}");
        e
    })
}
