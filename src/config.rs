use crate::sheets::SheetTarget;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub balance: BalanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout; a read returns whatever arrived once it expires.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_port() -> String {
    "/dev/ttyACM0".into()
}
fn default_baud_rate() -> u32 {
    2400
}
fn default_timeout_ms() -> u64 {
    2000
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session length measured from the first cycle. 13.5 hours by default.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_duration_secs() -> u64 {
    13 * 3600 + 1800
}
fn default_poll_interval_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl SessionConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    /// Path to the Google service account JSON key
    pub credentials_file: String,
    /// Spreadsheet title, resolved through Drive when `spreadsheet_id` is absent
    pub spreadsheet: String,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub log_worksheet: usize,
    #[serde(default = "default_summary_worksheet")]
    pub summary_worksheet: usize,
    /// 1-based row new entries are inserted at; 2 keeps the header in row 1.
    #[serde(default = "default_insert_row")]
    pub insert_row: usize,
    /// A1 reference of the running energy total on the log worksheet
    #[serde(default = "default_energy_cell")]
    pub energy_cell: String,
    /// Rows cleared from the log worksheet before a session starts
    #[serde(default = "default_reset_rows")]
    pub reset_rows: usize,
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,
}

fn default_summary_worksheet() -> usize {
    1
}
fn default_insert_row() -> usize {
    2
}
fn default_energy_cell() -> String {
    "L1".into()
}
fn default_reset_rows() -> usize {
    900
}
fn default_reset_delay_ms() -> u64 {
    1100
}

impl SheetsConfig {
    pub fn target(&self, worksheet: usize) -> SheetTarget {
        SheetTarget {
            spreadsheet: self.spreadsheet.clone(),
            spreadsheet_id: self.spreadsheet_id.clone(),
            worksheet,
        }
    }

    pub fn log_target(&self) -> SheetTarget {
        self.target(self.log_worksheet)
    }

    pub fn summary_target(&self) -> SheetTarget {
        self.target(self.summary_worksheet)
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: String,
}

fn default_output_dir() -> String {
    ".".into()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    #[serde(default = "default_balance_worksheet")]
    pub worksheet: usize,
    #[serde(default = "default_balance_log")]
    pub log_file: String,
}

fn default_balance_worksheet() -> usize {
    2
}
fn default_balance_log() -> String {
    "string1_pack_v_log.dat".into()
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            worksheet: default_balance_worksheet(),
            log_file: default_balance_log(),
        }
    }
}

impl Config {
    /// Read YAML from disk, expand `${VAR}` / `${VAR:-default}` from the
    /// environment, parse, then apply env overrides:
    /// `PCM60X_SERIAL_PORT` replaces `serial.port`,
    /// `GOOGLE_APPLICATION_CREDENTIALS` replaces `sheets.credentials_file`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, anyhow::Error> {
        let expanded = expand_env(raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(port) = std::env::var("PCM60X_SERIAL_PORT") {
            cfg.serial.port = port;
        }
        if let Ok(creds) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            cfg.sheets.credentials_file = creds;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.serial.port.is_empty(), "serial.port cannot be empty");
        anyhow::ensure!(self.serial.baud_rate > 0, "serial.baud_rate must be positive");
        anyhow::ensure!(
            self.session.poll_interval_secs > 0,
            "session.poll_interval_secs must be positive"
        );
        anyhow::ensure!(
            self.session.duration_secs > 0,
            "session.duration_secs must be positive"
        );
        anyhow::ensure!(
            !self.sheets.spreadsheet.is_empty() || self.sheets.spreadsheet_id.is_some(),
            "sheets.spreadsheet or sheets.spreadsheet_id must be set"
        );
        anyhow::ensure!(
            self.sheets.insert_row >= 1,
            "sheets.insert_row is 1-based and must be at least 1"
        );
        anyhow::ensure!(
            is_a1_cell(&self.sheets.energy_cell),
            "sheets.energy_cell '{}' is not an A1 cell reference",
            self.sheets.energy_cell
        );
        Ok(())
    }
}

/// `L1`, `AB12`: letters followed by a non-zero row number.
fn is_a1_cell(cell: &str) -> bool {
    let split = cell
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(cell.len());
    let (col, row) = cell.split_at(split);
    !col.is_empty()
        && col.chars().all(|c| c.is_ascii_uppercase())
        && row.parse::<u32>().map(|r| r > 0).unwrap_or(false)
}

/// Replace `${VAR}` with the variable's value and `${VAR:-fallback}` with the
/// value or the fallback when unset. `$$` is a literal `$`; any other `$` is
/// kept as written.
fn expand_env(input: &str) -> Result<String, anyhow::Error> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(body) = tail.strip_prefix('{') {
            let end = body
                .find('}')
                .ok_or_else(|| anyhow::anyhow!("unterminated placeholder: missing '}}'"))?;
            out.push_str(&resolve_placeholder(&body[..end])?);
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = tail;
        }
    }
    out.push_str(rest);

    Ok(out)
}

fn resolve_placeholder(placeholder: &str) -> Result<String, anyhow::Error> {
    let (name, fallback) = match placeholder.split_once(":-") {
        Some((name, fallback)) => (name, Some(fallback)),
        None => (placeholder, None),
    };
    match (std::env::var(name), fallback) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(fallback)) => Ok(fallback.to_string()),
        (Err(_), None) => Err(anyhow::anyhow!("missing environment variable: {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const MINIMAL: &str = r#"
sheets:
  credentials_file: "creds.json"
  spreadsheet: "pcm60x_charging_log"
"#;

    #[test]
    #[serial]
    fn test_defaults_fill_missing_sections() {
        std::env::remove_var("PCM60X_SERIAL_PORT");
        std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");

        let cfg = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.serial.port, "/dev/ttyACM0");
        assert_eq!(cfg.serial.baud_rate, 2400);
        assert_eq!(cfg.serial.timeout(), Duration::from_secs(2));
        assert_eq!(cfg.session.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.session.duration(), Duration::from_secs(48_600));
        assert_eq!(cfg.sheets.insert_row, 2);
        assert_eq!(cfg.sheets.log_target().worksheet, 0);
        assert_eq!(cfg.sheets.summary_target().worksheet, 1);
        assert_eq!(cfg.output.directory, ".");
        assert_eq!(cfg.balance.worksheet, 2);
    }

    #[test]
    #[serial]
    fn test_placeholders_expand() {
        std::env::set_var("PCM60X_TEST_SHEET", "from-env");
        std::env::remove_var("PCM60X_TEST_UNSET");

        let out = expand_env("a: ${PCM60X_TEST_SHEET}\nb: ${PCM60X_TEST_UNSET:-/tmp}\nc: $$5 $x").unwrap();
        assert_eq!(out, "a: from-env\nb: /tmp\nc: $5 $x");

        std::env::remove_var("PCM60X_TEST_SHEET");
    }

    #[test]
    #[serial]
    fn test_missing_placeholder_is_an_error() {
        std::env::remove_var("PCM60X_TEST_UNSET");
        assert!(expand_env("x: ${PCM60X_TEST_UNSET}").is_err());
        assert!(expand_env("x: ${UNTERMINATED").is_err());
    }

    #[test]
    #[serial]
    fn test_validation_rejects_bad_values() {
        std::env::remove_var("PCM60X_SERIAL_PORT");
        std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");

        let zero_interval = format!("{MINIMAL}session:\n  poll_interval_secs: 0\n");
        assert!(Config::from_yaml(&zero_interval).is_err());

        let bad_cell = r#"
sheets:
  credentials_file: "creds.json"
  spreadsheet: "log"
  energy_cell: "12B"
"#;
        assert!(Config::from_yaml(bad_cell).is_err());

        let zero_row = r#"
sheets:
  credentials_file: "creds.json"
  spreadsheet: "log"
  insert_row: 0
"#;
        assert!(Config::from_yaml(zero_row).is_err());
    }

    #[test]
    fn test_a1_cells() {
        assert!(is_a1_cell("L1"));
        assert!(is_a1_cell("AB120"));
        assert!(!is_a1_cell("L0"));
        assert!(!is_a1_cell("1L"));
        assert!(!is_a1_cell("l1"));
        assert!(!is_a1_cell(""));
    }
}
