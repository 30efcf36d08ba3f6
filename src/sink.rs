//! Telemetry relay to a remote worksheet whose handle can go stale at any
//! time.
//!
//! The sink tracks its link explicitly:
//!
//! ```text
//!   Connected --op fails--> Reconnecting --open ok--> Connected --retry ok--> Connected
//!                                |                        |
//!                                +--open fails--> Failed <+--retry fails
//! ```
//!
//! Every operation gets exactly one reconnect-and-retry. A call that starts
//! while `Reconnecting` or `Failed` reconnects first and makes one attempt.

use crate::device::Reading;
use crate::error::SinkError;
use crate::sheets::{CellValue, SheetStore, SheetTarget, WorksheetHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connected(WorksheetHandle),
    /// The last operation failed; the handle must be reopened before use.
    Reconnecting,
    /// Reopened and still failing, or reopening itself failed.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Direct,
    AfterReconnect,
}

enum SheetOp<'a> {
    Insert {
        values: &'a [CellValue],
        position: usize,
    },
    Update {
        cell: &'a str,
        value: &'a CellValue,
    },
}

impl SheetOp<'_> {
    fn name(&self) -> &'static str {
        match self {
            SheetOp::Insert { .. } => "insert_row",
            SheetOp::Update { .. } => "update_cell",
        }
    }
}

pub struct TelemetrySink<S> {
    store: S,
    target: SheetTarget,
    link: LinkState,
}

impl<S: SheetStore> TelemetrySink<S> {
    /// Open the target once. Failing here is a setup failure.
    pub async fn connect(store: S, target: SheetTarget) -> Result<Self, SinkError> {
        let handle = store.open(&target).await?;
        Ok(Self {
            store,
            target,
            link: LinkState::Connected(handle),
        })
    }

    pub fn state(&self) -> &LinkState {
        &self.link
    }

    pub fn target(&self) -> &SheetTarget {
        &self.target
    }

    /// Insert the reading's row at `position`.
    pub async fn append(&mut self, reading: &Reading, position: usize) -> Result<Delivery, SinkError> {
        let row = reading_row(reading);
        self.append_row(&row, position).await
    }

    pub async fn append_row(&mut self, values: &[CellValue], position: usize) -> Result<Delivery, SinkError> {
        self.deliver(SheetOp::Insert { values, position }).await
    }

    /// Overwrite one cell; repeating the call with the same value is harmless.
    pub async fn update_summary(&mut self, cell: &str, value: f64) -> Result<Delivery, SinkError> {
        let value = CellValue::Number(value);
        self.deliver(SheetOp::Update { cell, value: &value }).await
    }

    /// Replace the handle with a freshly opened one for the same target.
    pub async fn reconnect(&mut self) -> Result<(), SinkError> {
        self.link = LinkState::Reconnecting;
        match self.store.open(&self.target).await {
            Ok(handle) => {
                info!(worksheet = %handle.title, "sheet link re-established");
                self.link = LinkState::Connected(handle);
                Ok(())
            }
            Err(e) => {
                self.link = LinkState::Failed;
                Err(e)
            }
        }
    }

    /// Delete up to `n_rows` rows starting at `first_row`, never more than
    /// the worksheet holds from there down, pausing `delay` between
    /// deletions. Any failure stops the reset and is returned.
    pub async fn reset(&mut self, n_rows: usize, first_row: usize, delay: Duration) -> Result<usize, SinkError> {
        let handle = self.handle().await?;
        let used = self.store.used_rows(&handle).await?;
        let available = (used + 1).saturating_sub(first_row);
        let to_delete = n_rows.min(available);
        info!(
            worksheet = %handle.title,
            used_rows = used,
            deleting = to_delete,
            "clearing previous rows"
        );

        for i in 0..to_delete {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            self.store.delete_row(&handle, first_row).await?;
            debug!(deleted = i + 1, of = to_delete, "row deleted");
        }
        Ok(to_delete)
    }

    async fn handle(&mut self) -> Result<WorksheetHandle, SinkError> {
        if let LinkState::Connected(handle) = &self.link {
            return Ok(handle.clone());
        }
        self.reconnect().await?;
        match &self.link {
            LinkState::Connected(handle) => Ok(handle.clone()),
            _ => Err(SinkError::NotFound(self.target.spreadsheet.clone())),
        }
    }

    async fn deliver(&mut self, op: SheetOp<'_>) -> Result<Delivery, SinkError> {
        if let LinkState::Connected(handle) = &self.link {
            let handle = handle.clone();
            match self.perform(&handle, &op).await {
                Ok(()) => return Ok(Delivery::Direct),
                Err(e) => {
                    warn!(op = op.name(), error = %e, "sheet operation failed; reconnecting");
                    self.link = LinkState::Reconnecting;
                }
            }
        }

        let handle = self.handle().await?;
        match self.perform(&handle, &op).await {
            Ok(()) => Ok(Delivery::AfterReconnect),
            Err(e) => {
                self.link = LinkState::Failed;
                Err(e)
            }
        }
    }

    async fn perform(&self, handle: &WorksheetHandle, op: &SheetOp<'_>) -> Result<(), SinkError> {
        match op {
            SheetOp::Insert { values, position } => self.store.insert_row(handle, values, *position).await,
            SheetOp::Update { cell, value } => self.store.update_cell(handle, cell, value).await,
        }
    }
}

/// `[timestamp, hour of day, pv V, battery V, current A, current1 A, current2 A, power W, temp]`
pub fn reading_row(reading: &Reading) -> Vec<CellValue> {
    let mut row = Vec::with_capacity(9);
    row.push(CellValue::Text(
        reading.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
    ));
    row.push(CellValue::Number(reading.hour_of_day()));
    row.extend(reading.status.channels().into_iter().map(CellValue::Number));
    row
}
