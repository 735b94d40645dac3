use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use brokersim::config::SimConfig;
use brokersim::engine::topology::Scenario;
use brokersim::util::Shutdown;

#[derive(Parser, Debug)]
#[command(name = "brokersim", version, about = "Simulated Kafka-style broker cluster.")]
struct Args {
    /// Location of the config file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// JSON topology with optional scripted events.
    #[arg(long, value_name = "PATH")]
    topology: PathBuf,
    #[arg(long, default_value = "kafka")]
    component: String,
    /// Stop after this many ticks instead of running until interrupted.
    #[arg(long)]
    ticks: Option<u64>,
    /// Also write logs to a daily rolling file in this directory.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    /// Print the final snapshot as JSON.
    #[arg(long)]
    json: bool,
}

/// `RUST_LOG` when set and valid, `info` otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "brokersim.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::Layer::new().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::Layer::new().compact().with_writer(std::io::stderr))
        .with(file);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_tracing(args.log_dir.as_deref())?;

    let config = match &args.config {
        Some(path) => brokersim::config::config(path)?,
        None => SimConfig::default(),
    };
    let scenario = Scenario::load(&args.topology)?;

    let shutdown = Shutdown::new();
    let handler = shutdown.clone();
    ctrlc::set_handler(move || handler.shutdown())?;

    let snapshot = brokersim::brokersim(config, &args.component, scenario, args.ticks, shutdown).await?;
    if args.json {
        println!("{}", snapshot.to_json()?);
    }
    Ok(())
}
