//! Balance statistics for the seven series-connected battery packs of a
//! string, from manually measured pack voltages.

use crate::error::BalanceError;
use crate::sheets::CellValue;
use chrono::{DateTime, Local, SecondsFormat};

pub const PACK_NAMES: [&str; 7] = ["A", "B", "C", "D", "E", "F", "G"];

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceReport {
    pub measured_at: DateTime<Local>,
    pub voltages: Vec<f64>,
    pub mean: f64,
    /// Per-pack deviation from the mean, in percent
    pub deviations_pct: Vec<f64>,
    /// Lowest and highest deviation
    pub out_of_balance: (f64, f64),
}

pub fn analyse(voltages: &[f64], measured_at: DateTime<Local>) -> Result<BalanceReport, BalanceError> {
    if voltages.is_empty() {
        return Err(BalanceError::Empty);
    }
    let mean = voltages.iter().sum::<f64>() / voltages.len() as f64;
    if mean.is_nan() || mean <= 0.0 {
        return Err(BalanceError::NonPositiveMean(mean));
    }

    let deviations_pct: Vec<f64> = voltages.iter().map(|v| 100.0 * v / mean - 100.0).collect();
    let low = deviations_pct.iter().copied().fold(f64::INFINITY, f64::min);
    let high = deviations_pct.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(BalanceReport {
        measured_at,
        voltages: voltages.to_vec(),
        mean,
        deviations_pct,
        out_of_balance: (low, high),
    })
}

impl BalanceReport {
    /// `<timestamp>,<v1>,...,<vn>` plus newline, voltages to six decimals.
    pub fn log_line(&self) -> String {
        let mut line = self.timestamp();
        for v in &self.voltages {
            line.push_str(&format!(",{:.6}", v));
        }
        line.push('\n');
        line
    }

    /// `[timestamp, mean, deviation per pack...]`
    pub fn sheet_row(&self) -> Vec<CellValue> {
        let mut row = Vec::with_capacity(self.deviations_pct.len() + 2);
        row.push(CellValue::Text(self.timestamp()));
        row.push(CellValue::Number(self.mean));
        row.extend(self.deviations_pct.iter().copied().map(CellValue::Number));
        row
    }

    fn timestamp(&self) -> String {
        self.measured_at.to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 18, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_balanced_string() {
        let report = analyse(&[12.8; 7], at()).unwrap();
        assert!((report.mean - 12.8).abs() < 1e-12);
        assert!(report.deviations_pct.iter().all(|d| d.abs() < 1e-9));
        assert!(report.out_of_balance.0.abs() < 1e-9);
        assert!(report.out_of_balance.1.abs() < 1e-9);
    }

    #[test]
    fn test_deviation_range() {
        let report = analyse(&[12.0, 13.0, 12.5, 12.5, 12.5, 12.5, 12.5], at()).unwrap();
        assert!((report.mean - 12.5).abs() < 1e-12);
        assert!((report.out_of_balance.0 - -4.0).abs() < 1e-9);
        assert!((report.out_of_balance.1 - 4.0).abs() < 1e-9);
        assert!((report.deviations_pct[1] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_input() {
        assert_eq!(analyse(&[], at()), Err(BalanceError::Empty));
        assert_eq!(analyse(&[0.0, 0.0], at()), Err(BalanceError::NonPositiveMean(0.0)));
    }

    #[test]
    fn test_log_line_and_sheet_row() {
        let report = analyse(&[12.0, 13.0], at()).unwrap();
        let line = report.log_line();
        assert!(line.starts_with("2026-10-18T08:30:00"));
        assert!(line.ends_with(",12.000000,13.000000\n"));

        let row = report.sheet_row();
        assert_eq!(row.len(), 4);
        assert_eq!(row[1], CellValue::Number(12.5));
        assert_eq!(row[2], CellValue::Number(-4.0));
    }
}
