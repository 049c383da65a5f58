use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use darwin_ingest::config::IngestConfig;
use darwin_ingest::feed::KafkaFeed;
use darwin_ingest::files::{FileStore, HttpFileStore, LocalFileStore};
use darwin_ingest::interpret::Interpreter;
use darwin_ingest::pipeline::Pipeline;
use darwin_ingest::store::PgStore;

/// Timeout for fetching one timetable file over HTTP.
const FILE_TIMEOUT: Duration = Duration::from_secs(120);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // `darwin-ingest import-reference <path>` loads one reference file and
    // exits; with no arguments the feed is ingested until Ctrl-C.
    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.as_slice() {
        [] => ingest().await,
        [command, path] if command == "import-reference" => import_reference(path).await,
        _ => Err("usage: darwin-ingest [import-reference <path>]".into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "darwin-ingest failed");
            ExitCode::FAILURE
        }
    }
}

async fn interpreter(config: &IngestConfig) -> Result<Interpreter<PgStore>, BoxError> {
    let pool = PgPoolOptions::new()
        .max_connections(u32::try_from(config.workers + 1)?)
        .connect(&config.database_url)
        .await?;
    let mut interpreter = Interpreter::new(PgStore::new(pool));

    if let Some(location) = &config.files_url {
        let files: Arc<dyn FileStore> =
            if location.starts_with("http://") || location.starts_with("https://") {
                Arc::new(HttpFileStore::new(location.as_str(), FILE_TIMEOUT)?)
            } else {
                Arc::new(LocalFileStore::new(location.as_str()))
            };
        info!(%location, "timetable files enabled");
        interpreter = interpreter.with_files(files);
    }
    Ok(interpreter)
}

async fn ingest() -> Result<(), BoxError> {
    let config = IngestConfig::from_env()?;
    let interpreter = interpreter(&config).await?;
    let feed = Arc::new(KafkaFeed::connect(&config.feed)?);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "could not listen for Ctrl-C");
                return;
            }
            info!("shutdown requested, draining queued messages");
            cancel.cancel();
        }
    });

    let report = Pipeline::new(feed, Arc::new(interpreter))
        .with_workers(config.workers)
        .with_queue_capacity(config.queue_capacity())
        .run(cancel)
        .await;

    info!(
        fetched = report.fetched,
        committed = report.committed,
        failed = report.failed,
        "ingestion finished"
    );
    Ok(())
}

async fn import_reference(path: &str) -> Result<(), BoxError> {
    let config = IngestConfig::from_env()?;
    let rows = interpreter(&config).await?.import_reference(path).await?;
    info!(path, rows, "reference import finished");
    Ok(())
}
