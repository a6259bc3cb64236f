pub mod json_store;
pub mod schema;

pub use json_store::JsonStore;
pub use schema::{ExplainRecord, HistoryData, HistoryEntry};

/// Receives the finished module's record when the session enters `Explain`.
pub trait ResultSink {
    fn hand_off(&mut self, record: &ExplainRecord) -> anyhow::Result<()>;
}
