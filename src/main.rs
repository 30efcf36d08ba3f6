use pcm60x_logger::device::SerialTransport;
use pcm60x_logger::sheets::GoogleSheets;
use pcm60x_logger::{Config, Device, Session, SessionFinalizer, SessionSettings, TelemetrySink};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(path = %cfg_path, "loaded config");

    let transport = SerialTransport::open(&cfg.serial)?;

    let store = GoogleSheets::from_credentials_file(&cfg.sheets.credentials_file)?;
    let log_sink = TelemetrySink::connect(store.clone(), cfg.sheets.log_target()).await?;
    let summary_sink = TelemetrySink::connect(store, cfg.sheets.summary_target()).await?;
    info!(spreadsheet = %cfg.sheets.spreadsheet, "connected to Google Sheets");

    let mut session = Session::new(
        Device::new(transport),
        log_sink,
        SessionSettings::from(&cfg),
    );

    if let Err(e) = session.probe().await {
        warn!(error = %e, "device probe failed; continuing");
    }

    session
        .initialize(cfg.sheets.reset_rows, cfg.sheets.reset_delay())
        .await?;

    let mut finalizer = SessionFinalizer::new(summary_sink, &cfg.output.directory, cfg.sheets.insert_row);
    let report = session.run(&mut finalizer).await;

    info!(
        cycles = report.cycles,
        recorded = report.recorded,
        skipped = report.skipped,
        remote_failures = report.remote_failures,
        energy_wh = report.energy_wh,
        artifacts_complete = report.finalize.is_complete(),
        "done"
    );

    Ok(())
}
