use anyhow::Error;
use clap::Parser;
use log::info;
use std::time::Duration;
use swarm::{
    http::{HttpGetTask, HttpTaskConfig},
    runner::RunnerConfig,
    spec::WorkerIncrementMode,
    task::Task,
};

/// Repeatedly GETs a single URL, reporting the latency and content length of every request.
#[derive(Parser, Debug)]
#[clap(about, version)]
struct Args {
    /// The URL to request.
    #[clap(long, default_value = "http://localhost:8080/")]
    url: String,

    /// The test name attached to every event.
    #[clap(long, default_value = "demo")]
    test_name: String,

    /// The request type label attached to every event.
    #[clap(long, default_value = "http")]
    request_type: String,

    /// The request timeout.
    #[clap(long, default_value = "30s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// The number of workers to run.
    #[clap(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    workers: u32,

    /// The number of workers started per second.
    #[clap(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    hatch_rate: u32,

    /// Stop after this long, e.g. `30s`. Runs until ctrl-c otherwise.
    #[clap(long, value_parser = humantime::parse_duration)]
    run_time: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = HttpTaskConfig {
        test_name: args.test_name,
        request_type: args.request_type,
        url: args.url,
        timeout: Some(args.timeout),
    };
    let task = HttpGetTask::new(config)?;
    info!("Requesting {} with up to {} workers", task.config().url, args.workers);

    let config = RunnerConfig {
        max_test_duration: args.run_time,
        mode: WorkerIncrementMode::Hatch { hatch_rate: args.hatch_rate, max_workers: args.workers },
        // Failed and slow requests are only reported, neither stops the run.
        max_error_rate: 1.0,
        max_response_time: Duration::MAX,
        ..Default::default()
    };
    swarm::run(vec![Task::new("http_get", task)], config).await?;
    Ok(())
}
