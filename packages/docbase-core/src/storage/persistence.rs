//! Snapshot files for the memory storage adapter.
//!
//! A snapshot is a single JSON document guarded by a CRC32 checksum of its
//! class list. Writes go to a temporary file that is synced and then renamed
//! over the previous snapshot.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DbConfig;
use crate::error::{classify_io_error, is_transient_io_error, DbError};
use crate::schema::Schema;
use crate::Document;

const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Stored state of one class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSnapshot {
    pub class_name: String,
    /// Absent for collections without an explicit schema (join tables, volatile classes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(default)]
    pub objects: Vec<Document>,
    /// Field groups whose combined values must be unique
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    checksum: u32,
    classes: Vec<ClassSnapshot>,
}

fn checksum(classes: &[ClassSnapshot]) -> Result<u32, DbError> {
    let bytes = serde_json::to_vec(classes)?;
    let mut hasher = Hasher::new();
    hasher.update(&bytes);
    Ok(hasher.finalize())
}

/// Reads and writes snapshot files in a data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    /// Data directory path
    data_dir: PathBuf,
    /// Maximum retry attempts for transient I/O errors
    max_retries: u32,
    /// Delay between retry attempts in milliseconds
    retry_delay_ms: u64,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>, config: &DbConfig) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_retries: config.persistence_max_retries,
            retry_delay_ms: config.persistence_retry_delay_ms,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Writes a snapshot of every class.
    ///
    /// # Arguments
    /// * `classes` - Classes to persist
    ///
    /// # Returns
    /// `Result<(), DbError>` indicating success or failure.
    pub fn save(&self, classes: Vec<ClassSnapshot>) -> Result<(), DbError> {
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            checksum: checksum(&classes)?,
            classes,
        };
        let bytes = serde_json::to_vec(&file)?;
        self.retry("save_snapshot", || self.write_atomically(&bytes))
            .map_err(|e| classify_io_error(e, "Failed to write snapshot"))?;
        debug!(
            "Snapshot written to {} ({} classes)",
            self.data_dir.display(),
            file.classes.len()
        );
        Ok(())
    }

    fn write_atomically(&self, bytes: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let temp_path = self.data_dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        let final_path = self.data_dir.join(SNAPSHOT_FILE);

        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;

        fs::rename(&temp_path, &final_path)
    }

    /// Loads the latest snapshot. Returns `Ok(None)` when none was written yet.
    pub fn load(&self) -> Result<Option<Vec<ClassSnapshot>>, DbError> {
        let path = self.data_dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let contents = self
            .retry("load_snapshot", || {
                let mut contents = String::new();
                File::open(&path)?.read_to_string(&mut contents)?;
                Ok(contents)
            })
            .map_err(|e| classify_io_error(e, "Failed to read snapshot"))?;

        let file: SnapshotFile = serde_json::from_str(&contents)
            .map_err(|e| DbError::internal(format!("Failed to parse snapshot: {}", e)))?;
        if file.version != SNAPSHOT_VERSION {
            return Err(DbError::internal(format!(
                "Unsupported snapshot version: {}",
                file.version
            )));
        }
        if checksum(&file.classes)? != file.checksum {
            return Err(DbError::internal(format!(
                "Snapshot checksum mismatch in {}",
                path.display()
            )));
        }
        Ok(Some(file.classes))
    }

    /// Retries an operation that may fail with transient I/O errors.
    fn retry<T>(
        &self,
        context: &str,
        operation: impl Fn() -> std::io::Result<T>,
    ) -> std::io::Result<T> {
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(result) => return Ok(result),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.max_retries || !is_transient_io_error(&err) {
                        return Err(err);
                    }
                    warn!(
                        "Transient I/O error in {} (attempt {}/{}): {}",
                        context, attempt, self.max_retries, err
                    );
                    if self.retry_delay_ms > 0 {
                        std::thread::sleep(std::time::Duration::from_millis(self.retry_delay_ms));
                    }
                }
            }
        }
    }
}
