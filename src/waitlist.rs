use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::telemetry::metrics::WAITLIST_SIGNUPS;

const TIMESTAMP_FORMAT: &str = "%y-%m-%d.%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub name: String,
    pub mail: String,
    pub timestamp: String,
}

#[derive(Error, Debug)]
pub enum WaitlistError {
    #[error("waitlist file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("waitlist file is not a JSON array: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Append-only JSON array of signups on local disk.
pub struct WaitlistStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl WaitlistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[tracing::instrument(name = "waitlist append", skip_all, fields(waitlist.path = %self.path.display()))]
    pub async fn append(&self, name: &str, mail: &str) -> Result<WaitlistEntry, WaitlistError> {
        let _guard = self.write_lock.lock().await;

        // Existing records are kept verbatim, whatever their shape.
        let mut records: Vec<serde_json::Value> = match tokio::fs::read_to_string(&self.path).await
        {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let entry = WaitlistEntry {
            name: name.to_string(),
            mail: mail.to_string(),
            timestamp: chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        };
        records.push(serde_json::to_value(&entry)?);

        let mut body = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut body, PrettyFormatter::with_indent(b"    "));
        records.serialize(&mut serializer)?;

        write_atomically(&self.path.with_extension("tmp"), &self.path, &body).await?;

        WAITLIST_SIGNUPS.add(1, &[]);
        tracing::info!(total = records.len(), "waitlist entry saved");

        Ok(entry)
    }
}

/// Writes `body` to `tmp` and renames it over `path`. `tmp` is removed on failure.
async fn write_atomically(tmp: &Path, path: &Path, body: &[u8]) -> std::io::Result<()> {
    let result = match tokio::fs::write(tmp, body).await {
        Ok(()) => tokio::fs::rename(tmp, path).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(tmp).await;
    }
    result
}
