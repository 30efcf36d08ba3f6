pub mod balance;
pub mod config;
pub mod device;
pub mod error;
pub mod finalize;
pub mod session;
pub mod sheets;
pub mod sink;

// Re-export commonly used items
pub use config::Config;
pub use device::{Device, Reading, StatusFrame};
pub use error::AppError;
pub use finalize::{FinalizeReport, Finalizer, SessionFinalizer};
pub use session::{Session, SessionLog, SessionReport, SessionSettings};
pub use sink::{Delivery, LinkState, TelemetrySink};
