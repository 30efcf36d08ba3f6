use thiserror::Error;

/// Setup failures outside the config and sheet layers. Anything surfacing
/// as an `AppError` ends the process before the acquisition loop starts.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

/// A response frame that cannot be turned into a `StatusFrame`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("field {field} is not valid text")]
    NotText { field: &'static str },
    #[error("field {field} is not numeric: {text:?}")]
    NotNumeric { field: &'static str, text: String },
}

/// One failed query/response exchange with the charge controller.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sheets API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("spreadsheet not found: {0}")]
    NotFound(String),
    #[error("worksheet index {index} out of range ({count} worksheets)")]
    NoSuchWorksheet { index: usize, count: usize },
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("summary upload failed: {0}")]
    Sink(#[from] SinkError),
    #[error("export failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("plot rendering failed: {0}")]
    Render(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BalanceError {
    #[error("no pack voltages given")]
    Empty,
    #[error("mean pack voltage must be positive, got {0}")]
    NonPositiveMean(f64),
}
