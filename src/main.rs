use clap::Parser;
use std::process;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use wake_executor::{with_config, Config, TimerFuture, DEFAULT_QUEUE_CAPACITY};

/// Spawns one timer per delay and reports each as it expires.
#[derive(Debug, Parser)]
#[clap(version)]
struct Args {
    /// Timer delays, in seconds
    #[clap(short, long = "delay", default_values_t = [1, 3, 10])]
    delays: Vec<u64>,
    /// Maximum number of tasks waiting in the completion queue
    #[clap(long, env = "EXECUTOR_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
    /// Let a panicking task take down the executor instead of dropping it
    #[clap(long)]
    no_catch_panics: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    if let Err(err) = run(Args::parse()) {
        tracing::error!("{err}");
        process::exit(1);
    }
}

fn run(args: Args) -> wake_executor::Result<()> {
    let config = Config::default()
        .with_queue_capacity(args.queue_capacity)
        .with_catch_panics(!args.no_catch_panics);
    let (executor, spawner) = with_config(config)?;

    for secs in args.delays {
        let timer = TimerFuture::try_new(Duration::from_secs(secs))?;
        spawner.spawn(timer)?;
    }

    // Without closing the spawner the executor would keep waiting for new
    // tasks after the last timer fired.
    spawner.close();

    let start = Instant::now();
    let summary = executor.run_with(|task, elapsed| {
        tracing::info!(
            %task,
            wall = ?start.elapsed(),
            "{} seconds has expired!",
            elapsed.as_secs()
        );
    });
    tracing::info!(
        completed = summary.completed,
        polls = summary.polls,
        panicked = summary.panicked,
        "all timers done"
    );

    Ok(())
}
