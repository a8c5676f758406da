use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ingest::runtime::{boot, cli::Cli, run};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let basic_logging = boot::init_logging_basic();
    let config = boot::load_config(&cli)?;
    drop(basic_logging);
    boot::init_logging(&config.logging);

    info!("Starting ingest v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Pipeline: workers={}, batch_size={}, sink={}",
        config.pipeline.workers, config.pipeline.batch_size, config.sink.kind
    );

    let sink = boot::build_sink(&config).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            run::shutdown_signal().await;
            cancel.cancel();
        });
    }

    let summary = run::run_jobs(&cli, &config, sink, cancel).await?;
    info!(
        completed = summary.completed,
        failed = summary.failed,
        skipped = summary.skipped,
        "All files processed"
    );

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
