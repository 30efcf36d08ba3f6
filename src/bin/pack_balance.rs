use anyhow::Context;
use chrono::Local;
use pcm60x_logger::balance::{self, PACK_NAMES};
use pcm60x_logger::sheets::GoogleSheets;
use pcm60x_logger::{Config, TelemetrySink};
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
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

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut voltages = Vec::with_capacity(PACK_NAMES.len());
    for name in PACK_NAMES {
        voltages.push(prompt_voltage(&mut lines, &mut stdout, name).await?);
    }

    let report = balance::analyse(&voltages, Local::now())?;

    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.balance.log_file)
        .with_context(|| format!("opening {}", cfg.balance.log_file))?;
    log.write_all(report.log_line().as_bytes())?;
    info!(path = %cfg.balance.log_file, "measurement logged");

    match GoogleSheets::from_credentials_file(&cfg.sheets.credentials_file) {
        Ok(store) => {
            let target = cfg.sheets.target(cfg.balance.worksheet);
            match TelemetrySink::connect(store, target).await {
                Ok(mut sink) => {
                    if let Err(e) = sink.append_row(&report.sheet_row(), cfg.sheets.insert_row).await {
                        warn!(error = %e, "balance row not uploaded");
                    }
                }
                Err(e) => warn!(error = %e, "balance worksheet unavailable"),
            }
        }
        Err(e) => warn!(error = %e, "cannot load sheet credentials"),
    }

    let summary = format!(
        "pack voltages: {:?}\nmean: {:.3} V\nout of balance: [{:.3} %, {:.3} %]\n",
        report.voltages, report.mean, report.out_of_balance.0, report.out_of_balance.1
    );
    stdout.write_all(summary.as_bytes()).await?;
    stdout.flush().await?;

    Ok(())
}

/// Ask until the answer parses as a finite number.
async fn prompt_voltage(
    lines: &mut Lines<BufReader<Stdin>>,
    stdout: &mut Stdout,
    pack: &str,
) -> Result<f64, anyhow::Error> {
    loop {
        stdout
            .write_all(format!("Voltage reading for Pack {}: ", pack).as_bytes())
            .await?;
        stdout.flush().await?;

        let line = lines
            .next_line()
            .await?
            .with_context(|| format!("input ended before pack {} was entered", pack))?;
        match line.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => return Ok(v),
            _ => warn!(input = %line.trim(), "not a number; try again"),
        }
    }
}
