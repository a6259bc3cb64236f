use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};

use crate::store::ResultSink;
use crate::store::schema::{ExplainRecord, HistoryData, HistoryEntry};

const EXPLAIN_FILE: &str = "explain.json";
const HISTORY_FILE: &str = "history.json";

pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new() -> Result<Self> {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("retakr");
        Self::with_base_dir(base_dir)
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn load<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.file_path(name);
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                    tracing::warn!(file = name, error = %err, "unreadable store file; using defaults");
                    T::default()
                }),
                Err(_) => T::default(),
            }
        } else {
            T::default()
        }
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let path = self.file_path(name);
        let tmp_path = path.with_extension("tmp");

        let json = serde_json::to_string_pretty(data)?;
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Replaces any record still waiting for the explain screen.
    pub fn write_explain(&self, record: &ExplainRecord) -> Result<()> {
        self.save(EXPLAIN_FILE, record)
    }

    /// Reads the pending explain record without consuming it.
    pub fn peek_explain(&self) -> Option<ExplainRecord> {
        let content = fs::read_to_string(self.file_path(EXPLAIN_FILE)).ok()?;
        let record: ExplainRecord = serde_json::from_str(&content).ok()?;
        (!record.needs_reset()).then_some(record)
    }

    /// Read-and-clear: a record is shown on the explain screen at most once.
    pub fn take_explain(&self) -> Option<ExplainRecord> {
        let path = self.file_path(EXPLAIN_FILE);
        if !path.exists() {
            return None;
        }
        let record = self.peek_explain();
        if let Err(err) = fs::remove_file(&path) {
            tracing::warn!(error = %err, "could not clear explain record");
        }
        if record.is_none() {
            tracing::warn!("discarded stale or corrupt explain record");
        }
        record
    }

    /// Returns empty history when the file is missing, corrupt or from an
    /// older schema.
    pub fn load_history(&self) -> HistoryData {
        let history: HistoryData = self.load(HISTORY_FILE);
        if history.needs_reset() {
            tracing::warn!(
                schema_version = history.schema_version,
                "history schema changed; starting fresh"
            );
            return HistoryData::default();
        }
        history
    }

    pub fn append_history(&self, record: &ExplainRecord) -> Result<()> {
        let mut history = self.load_history();
        history.entries.push(HistoryEntry::from(record));
        self.save(HISTORY_FILE, &history)
    }
}

impl ResultSink for JsonStore {
    fn hand_off(&mut self, record: &ExplainRecord) -> Result<()> {
        self.write_explain(record)?;
        self.append_history(record)?;
        tracing::debug!(dir = %self.base_dir.display(), "explain record handed off");
        Ok(())
    }
}
