//! End-of-session artifacts: the daily summary row, CSV exports and a plot.
//! Each step runs regardless of how the others went.

use crate::error::FinalizeError;
use crate::session::SessionLog;
use crate::sheets::{CellValue, SheetStore};
use crate::sink::{Delivery, TelemetrySink};
use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat};
use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct SessionSummary<'a> {
    /// Date the session started on; names the artifacts.
    pub date: NaiveDate,
    pub log: &'a SessionLog,
    pub energy_wh: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub values: PathBuf,
    pub times: PathBuf,
}

#[derive(Debug)]
pub struct FinalizeReport {
    pub summary_row: Result<Delivery, FinalizeError>,
    pub export: Result<ExportPaths, FinalizeError>,
    /// `Ok(None)` when there was nothing to plot.
    pub plot: Result<Option<PathBuf>, FinalizeError>,
}

impl FinalizeReport {
    pub fn is_complete(&self) -> bool {
        self.summary_row.is_ok() && self.export.is_ok() && self.plot.is_ok()
    }
}

#[async_trait]
pub trait Finalizer: Send {
    async fn finalize(&mut self, summary: &SessionSummary<'_>) -> FinalizeReport;
}

pub struct SessionFinalizer<S> {
    summary: TelemetrySink<S>,
    output_dir: PathBuf,
    insert_row: usize,
}

impl<S: SheetStore> SessionFinalizer<S> {
    pub fn new(summary: TelemetrySink<S>, output_dir: impl Into<PathBuf>, insert_row: usize) -> Self {
        Self {
            summary,
            output_dir: output_dir.into(),
            insert_row,
        }
    }
}

#[async_trait]
impl<S: SheetStore> Finalizer for SessionFinalizer<S> {
    async fn finalize(&mut self, summary: &SessionSummary<'_>) -> FinalizeReport {
        let row = vec![
            CellValue::Text(summary.date.format("%Y-%m-%d").to_string()),
            CellValue::Number(summary.energy_wh),
        ];
        let summary_row = self
            .summary
            .append_row(&row, self.insert_row)
            .await
            .map_err(FinalizeError::from);
        match &summary_row {
            Ok(_) => info!(date = %summary.date, energy_wh = summary.energy_wh, "daily summary written"),
            Err(e) => warn!(date = %summary.date, error = %e, "daily summary not written"),
        }

        let export = export_csv(&self.output_dir, summary.date, summary.log).map_err(FinalizeError::from);
        match &export {
            Ok(paths) => info!(values = %paths.values.display(), times = %paths.times.display(), "session log exported"),
            Err(e) => warn!(error = %e, "session log export failed"),
        }

        let plot = if summary.log.is_empty() {
            info!("empty session log; plot skipped");
            Ok(None)
        } else {
            let path = self.output_dir.join(artifact_name(summary.date, ".svg"));
            match render_plot(&path, summary.log) {
                Ok(()) => {
                    info!(path = %path.display(), "plot rendered");
                    Ok(Some(path))
                }
                Err(e) => {
                    warn!(error = %e, "plot rendering failed");
                    Err(e)
                }
            }
        };

        FinalizeReport {
            summary_row,
            export,
            plot,
        }
    }
}

/// `20260601_solar_charge_log<suffix>`
pub fn artifact_name(date: NaiveDate, suffix: &str) -> String {
    format!("{}_solar_charge_log{}", date.format("%Y%m%d"), suffix)
}

/// Write the value table (hour of day then the seven channels, one line per
/// reading) and the matching timestamp column.
pub fn export_csv(dir: &Path, date: NaiveDate, log: &SessionLog) -> std::io::Result<ExportPaths> {
    fs::create_dir_all(dir)?;

    let mut values = String::new();
    let mut times = String::new();
    for reading in log {
        let mut cols = vec![reading.hour_of_day()];
        cols.extend(reading.status.channels());
        let line = cols.iter().map(f64::to_string).collect::<Vec<_>>().join(",");
        values.push_str(&line);
        values.push('\n');
        times.push_str(&reading.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false));
        times.push('\n');
    }

    let paths = ExportPaths {
        values: dir.join(artifact_name(date, ".csv")),
        times: dir.join(artifact_name(date, "_times.csv")),
    };
    fs::write(&paths.values, values)?;
    fs::write(&paths.times, times)?;
    Ok(paths)
}

/// Three stacked panels against clock hour: battery voltage, charging
/// current and charging power.
pub fn render_plot(path: &Path, log: &SessionLog) -> Result<(), FinalizeError> {
    let hours: Vec<f64> = log.iter().map(|r| r.hour_of_day()).collect();
    let panels: [(&str, Vec<f64>, RGBColor); 3] = [
        (
            "Battery voltage (V)",
            log.iter().map(|r| r.status.battery_voltage).collect(),
            BLUE,
        ),
        (
            "Charging current (A)",
            log.iter().map(|r| r.status.charging_current).collect(),
            RED,
        ),
        (
            "Charging power (W)",
            log.iter().map(|r| r.status.charging_power).collect(),
            GREEN,
        ),
    ];
    let x_range = padded_range(&hours);

    let root = SVGBackend::new(path, (800, 800)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;
    let areas = root.split_evenly((3, 1));

    for (area, (label, values, color)) in areas.iter().zip(panels) {
        let mut chart = ChartBuilder::on(area)
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(x_range.clone(), padded_range(&values))
            .map_err(render_err)?;
        chart
            .configure_mesh()
            .x_desc("Time (clock hour)")
            .y_desc(label)
            .draw()
            .map_err(render_err)?;
        chart
            .draw_series(LineSeries::new(
                hours.iter().copied().zip(values.iter().copied()),
                &color,
            ))
            .map_err(render_err)?;
    }

    root.present().map_err(render_err)?;
    Ok(())
}

fn padded_range(values: &[f64]) -> std::ops::Range<f64> {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 0.5 };
    (lo - pad)..(hi + pad)
}

fn render_err(e: impl std::fmt::Display) -> FinalizeError {
    FinalizeError::Render(e.to_string())
}
