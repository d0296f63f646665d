//! Supervisor process entry point.
//!
//! Loads the named section of the configuration document, sets up the
//! file log sink, builds the supervisor and runs it until a shutdown
//! command or signal arrives. Construction failures print to standard
//! error and exit with code 1.

use clap::Parser;
use daqpipe::{load_config, init_logging, ProcessorRegistry, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "daqpipe", about = "Supervised worker pipeline for real-time data acquisition")]
struct Args {
    /// Path to the JSON configuration document
    #[arg(short, long)]
    config: String,

    /// Supervisor name (configuration section key)
    #[arg(short, long)]
    name: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> daqpipe::Result<()> {
    let config = load_config(&args.config, &args.name)?;

    let globalname = format!("Supervisor-{}", config.name);
    let _logging_guard = init_logging(&config.logs_path, &globalname)?;

    #[cfg(feature = "telemetry")]
    daqpipe::telemetry::init_pipeline_metrics();

    let registry = ProcessorRegistry::with_defaults();
    let supervisor = Supervisor::new(config, &registry).await?;
    supervisor.install_signal_bridge()?;
    supervisor.start().await?;

    supervisor.wait().await;
    Ok(())
}
