use clap::Parser;
use pagepress::{failure_exit_code, failure_hint, setup_logging, Cli, CliRunner};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting pagepress v{}", env!("CARGO_PKG_VERSION"));

    let cli_runner = CliRunner::new(&args);

    let result = tokio::select! {
        result = cli_runner.run(args.command) => result,
        _ = signal::ctrl_c() => {
            info!("Received interrupt, aborting build");
            Err(anyhow::anyhow!("Interrupted"))
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        if let Some(hint) = failure_hint(&e) {
            info!("{}", hint);
        }
        std::process::exit(failure_exit_code(&e));
    }

    Ok(())
}
