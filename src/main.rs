use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use flight_harvest::config::SinkKind;
use flight_harvest::{
    logger, AppendSink, CsvSink, Extractor, FileTokenProvider, HarvestConfig, Harvester,
    ProgressState, SheetsSink, TokenProvider, WebDriverGateway,
};

/// Harvest flight offers for every configured route and date.
#[derive(Parser)]
#[command(name = "flight_harvest", version)]
struct Cli {
    /// Configuration file; `harvest.toml` is used when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Record completed units in this file and skip them on later runs.
    #[arg(long, value_name = "PROGRESS_FILE")]
    resume: Option<PathBuf>,

    /// Append to this CSV file instead of Google Sheets.
    #[arg(long, value_name = "CSV_FILE")]
    csv: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    logger::init();
    let cli = Cli::parse();
    info!("Starting flight harvester...");

    // 1. Configuration
    let mut config = HarvestConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.csv {
        config.sink.kind = SinkKind::Csv;
        config.sink.csv_path = path;
    }
    if let Some(path) = cli.resume {
        config.harvest.progress_file = Some(path);
    }
    config.validate()?;

    let units = config.query_units();
    let extractor = Extractor::from_selectors(&config.selectors)?;
    info!(
        "{} origins x {} destinations from {} (+{} months): {} query units",
        config.routes.origins.len(),
        config.routes.destinations.len(),
        config.routes.start_date(),
        config.routes.months_ahead,
        units.len()
    );

    // 2. Sink (authorization failures stop here, before any browser work)
    let sink: Box<dyn AppendSink> = match config.sink.kind {
        SinkKind::Sheets => {
            let tokens: Arc<dyn TokenProvider> = Arc::new(FileTokenProvider::new(
                &config.sink.token_path,
                &config.sink.credentials_path,
            ));
            tokens.authorized_client().await?;
            let sink = SheetsSink::new(
                tokens,
                config.sink.spreadsheet_id.clone().unwrap_or_default(),
                config.sheet_range(),
            );
            if config.sink.probe {
                sink.probe("Sheets test successful").await?;
            }
            Box::new(sink)
        }
        SinkKind::Csv => {
            info!("Appending rows to {:?}", config.sink.csv_path);
            Box::new(CsvSink::new(&config.sink.csv_path))
        }
    };

    // 3. Resume state
    let progress = match &config.harvest.progress_file {
        Some(path) => ProgressState::load(path),
        None => ProgressState::ephemeral(),
    };
    if !progress.is_empty() {
        let pending = units.iter().filter(|u| !progress.contains(u)).count();
        info!(
            "{} units already harvested; {} of {} still to go.",
            progress.len(),
            pending,
            units.len()
        );
    }

    // 4. Browser session
    let gateway = WebDriverGateway::connect(&config.render, &config.selectors.landmark).await?;

    let mut harvester = Harvester::new(config.harvest_settings()).with_progress(progress);
    let result = harvester.run(&units, &gateway, &extractor, sink.as_ref()).await;
    gateway.shutdown().await;

    match result {
        Ok(summary) => {
            if summary.failed > 0 {
                warn!("{} units failed; rerun to retry them.", summary.failed);
            }
            Ok(())
        }
        Err(e) => {
            error!("Harvest aborted: {}", e);
            Err(e.into())
        }
    }
}
