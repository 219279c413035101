use clap::Parser;
use tracing::{debug, error};

use esdump::config::{ExportArgs, ExportConfig};
use esdump::error::AppError;

#[derive(Parser)]
#[command(
    name = "esdump",
    version,
    about = "Export an Elasticsearch index into numbered JSON files"
)]
struct Cli {
    #[command(flatten)]
    args: ExportArgs,
}

fn fail(e: &AppError) -> ! {
    error!("[EXPORT] {}", e.log_line());
    debug!("[EXPORT] raw error: {}", e);
    eprintln!("Error: {}", e.to_presentation());
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match ExportConfig::resolve(&cli.args) {
        Ok(c) => c,
        Err(e) => fail(&e),
    };

    match esdump::run(&config).await {
        Ok(report) => {
            println!(
                "Exported {} records from {} into {} files ({})",
                report.records_written,
                config.index,
                report.files.len(),
                report.stop_reason.as_str()
            );
        }
        Err(e) => fail(&e),
    }
}
