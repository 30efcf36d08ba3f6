pub mod auth;
pub mod google;
pub mod store;

pub use google::GoogleSheets;
pub use store::{CellValue, SheetStore, SheetTarget, WorksheetHandle};

#[cfg(test)]
pub use store::MockSheetStore;
