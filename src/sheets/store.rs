use crate::error::SinkError;
use async_trait::async_trait;
use serde::Serialize;

/// Logical identity of a worksheet; reopening the same target always yields
/// a handle to the same remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTarget {
    pub spreadsheet: String,
    pub spreadsheet_id: Option<String>,
    /// Zero-based tab index
    pub worksheet: usize,
}

/// An opened worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorksheetHandle {
    pub spreadsheet_id: String,
    pub sheet_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Number(v)
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

/// Tabular telemetry store. Rows and positions are 1-based, as in the
/// spreadsheet UI.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Resolve the target and return a fresh handle, re-authenticating as
    /// needed.
    async fn open(&self, target: &SheetTarget) -> Result<WorksheetHandle, SinkError>;

    /// Insert a row holding `values` at `position`, shifting existing rows
    /// down. A failed call leaves the worksheet unchanged.
    async fn insert_row(
        &self,
        sheet: &WorksheetHandle,
        values: &[CellValue],
        position: usize,
    ) -> Result<(), SinkError>;

    async fn update_cell(
        &self,
        sheet: &WorksheetHandle,
        cell: &str,
        value: &CellValue,
    ) -> Result<(), SinkError>;

    async fn delete_row(&self, sheet: &WorksheetHandle, position: usize) -> Result<(), SinkError>;

    /// Rows holding data, header included.
    async fn used_rows(&self, sheet: &WorksheetHandle) -> Result<usize, SinkError>;
}
