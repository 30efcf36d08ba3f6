//! The acquisition session: paced polling, energy accumulation and the
//! in-memory log, ending in exactly one finalization.

use crate::config::Config;
use crate::device::{Device, Reading, StatusFrame, Transport};
use crate::error::{AcquireError, SinkError};
use crate::finalize::{FinalizeReport, Finalizer, SessionSummary};
use crate::sink::TelemetrySink;
use crate::sheets::SheetStore;
use chrono::{DateTime, Local, NaiveDate};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Running,
    Finalizing,
}

/// Readings in capture order. Entries are never removed or rewritten.
#[derive(Debug, Default, Clone)]
pub struct SessionLog {
    readings: Vec<Reading>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reading> {
        self.readings.iter()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl<'a> IntoIterator for &'a SessionLog {
    type Item = &'a Reading;
    type IntoIter = std::slice::Iter<'a, Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.iter()
    }
}

/// Integrates charging power over the time between successful cycles.
#[derive(Debug, Default, Clone)]
pub struct EnergyAccumulator {
    total_wh: f64,
    last: Option<Instant>,
}

impl EnergyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `power_w` over the time since the previous call and return the
    /// energy added. The first call only sets the reference point.
    pub fn record(&mut self, power_w: f64, at: Instant) -> f64 {
        let added = match self.last {
            Some(prev) => power_w * hours(at.saturating_duration_since(prev)),
            None => 0.0,
        };
        self.last = Some(at);
        self.total_wh += added;
        added
    }

    pub fn total_wh(&self) -> f64 {
        self.total_wh
    }
}

fn hours(d: Duration) -> f64 {
    d.as_secs_f64() / 3600.0
}

#[derive(Debug, Clone)]
pub struct SessionWindow {
    start: Instant,
    started_at: DateTime<Local>,
    duration: Duration,
}

impl SessionWindow {
    pub fn open(duration: Duration) -> Self {
        Self {
            start: Instant::now(),
            started_at: Local::now(),
            duration,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.duration
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub duration: Duration,
    pub poll_interval: Duration,
    /// A1 cell on the log worksheet holding the running energy total
    pub energy_cell: String,
    pub insert_row: usize,
}

impl From<&Config> for SessionSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            duration: cfg.session.duration(),
            poll_interval: cfg.session.poll_interval(),
            energy_cell: cfg.sheets.energy_cell.clone(),
            insert_row: cfg.sheets.insert_row,
        }
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub cycles: u64,
    pub recorded: u64,
    /// Cycles whose exchange or decode failed
    pub skipped: u64,
    /// Sink operations that still failed after their retry
    pub remote_failures: u64,
    pub energy_wh: f64,
    pub log: SessionLog,
    pub finalize: FinalizeReport,
}

pub struct Session<T, S> {
    device: Device<T>,
    sink: TelemetrySink<S>,
    settings: SessionSettings,
    state: SessionState,
    log: SessionLog,
    energy: EnergyAccumulator,
    cycles: u64,
    skipped: u64,
    remote_failures: u64,
}

impl<T: Transport, S: SheetStore> Session<T, S> {
    pub fn new(device: Device<T>, sink: TelemetrySink<S>, settings: SessionSettings) -> Self {
        info!(state = ?SessionState::Initializing, "session created");
        Self {
            device,
            sink,
            settings,
            state: SessionState::Initializing,
            log: SessionLog::new(),
            energy: EnergyAccumulator::new(),
            cycles: 0,
            skipped: 0,
            remote_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// One exchange outside the session, for diagnostics only. Nothing is
    /// recorded.
    pub async fn probe(&mut self) -> Result<StatusFrame, AcquireError> {
        let status = self.device.poll().await?;
        info!(?status, "device probe");
        Ok(status)
    }

    /// Clear rows left on the log worksheet by a previous session. An error
    /// here must stop the process before the loop starts.
    pub async fn initialize(&mut self, reset_rows: usize, delay: Duration) -> Result<usize, SinkError> {
        let deleted = self
            .sink
            .reset(reset_rows, self.settings.insert_row, delay)
            .await?;
        info!(deleted, "log worksheet reset");
        Ok(deleted)
    }

    /// Poll until the session window closes, then finalize once.
    pub async fn run<F: Finalizer>(mut self, finalizer: &mut F) -> SessionReport {
        let window = SessionWindow::open(self.settings.duration);
        self.transition(SessionState::Running);
        info!(
            started_at = %window.started_at().format(TS_FORMAT),
            duration_secs = self.settings.duration.as_secs(),
            interval_secs = self.settings.poll_interval.as_secs(),
            "session started"
        );

        while !window.is_expired() {
            self.cycle().await;
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        self.transition(SessionState::Finalizing);
        let summary = SessionSummary {
            date: window.date(),
            log: &self.log,
            energy_wh: self.energy.total_wh(),
        };
        let finalize = finalizer.finalize(&summary).await;

        info!(
            cycles = self.cycles,
            recorded = self.log.len(),
            skipped = self.skipped,
            remote_failures = self.remote_failures,
            energy_wh = self.energy.total_wh(),
            "session finished"
        );

        SessionReport {
            cycles: self.cycles,
            recorded: self.log.len() as u64,
            skipped: self.skipped,
            remote_failures: self.remote_failures,
            energy_wh: self.energy.total_wh(),
            log: self.log,
            finalize,
        }
    }

    async fn cycle(&mut self) {
        self.cycles += 1;
        let cycle_start = Instant::now();
        let captured_at = Local::now();
        let status = match self.device.poll().await {
            Ok(status) => status,
            Err(e) => {
                self.skipped += 1;
                warn!(
                    at = %captured_at.format(TS_FORMAT),
                    cycle = self.cycles,
                    error = %e,
                    "no reading this cycle"
                );
                return;
            }
        };

        let reading = Reading::new(captured_at, status);
        let completed = Instant::now();
        let added = self.energy.record(reading.power_w(), completed);
        debug!(
            cycle = self.cycles,
            exchange_ms = completed.duration_since(cycle_start).as_millis() as u64,
            power_w = reading.power_w(),
            added_wh = added,
            total_wh = self.energy.total_wh(),
            "reading recorded"
        );
        self.log.push(reading.clone());

        if let Err(e) = self.sink.append(&reading, self.settings.insert_row).await {
            self.remote_failures += 1;
            warn!(
                at = %reading.timestamp.format(TS_FORMAT),
                error = %e,
                "reading not uploaded"
            );
        }
        if let Err(e) = self
            .sink
            .update_summary(&self.settings.energy_cell, self.energy.total_wh())
            .await
        {
            self.remote_failures += 1;
            warn!(
                at = %reading.timestamp.format(TS_FORMAT),
                error = %e,
                "energy total not uploaded"
            );
        }
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}
