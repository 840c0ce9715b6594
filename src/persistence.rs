//! Where generated messages end up.
//!
//! Two strategies implement [`MessageSink`]: one text file per VIN, or the
//! source workbook rewritten with the row's `mail_content` cell filled in.
//! Both write to a temporary file and rename it over the target while
//! holding a per-path lock, so concurrent requests never interleave partial
//! writes.

use crate::dataset::{CellValue, Dataset};
use crate::errors::{AppError, ResultExt};
use crate::models::{CustomerVehicleRecord, GeneratedMessage, MAIL_CONTENT_COLUMN};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use uuid::Uuid;

/// Persistence strategy selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistenceMode {
    /// `<mail_folder>/<vin>.txt`
    #[default]
    File,
    /// Rewrite the workbook with the message in `mail_content`.
    Spreadsheet,
}

impl PersistenceMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "file" | "txt" => Some(PersistenceMode::File),
            "spreadsheet" | "excel" | "xlsx" => Some(PersistenceMode::Spreadsheet),
            _ => None,
        }
    }
}

/// Where the dataset of a request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// A workbook opened from disk; spreadsheet write-back goes to this file.
    Path(PathBuf),
    /// A workbook received over HTTP under the given client file name.
    Upload { file_name: String },
}

/// Everything a sink may need about the matched row.
pub struct PersistTarget<'a> {
    pub dataset: &'a Dataset,
    pub row_index: usize,
    pub record: &'a CustomerVehicleRecord,
    pub source: &'a DatasetSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub sink: &'static str,
    pub location: PathBuf,
}

#[async_trait]
pub trait MessageSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn persist(
        &self,
        target: &PersistTarget<'_>,
        message: &GeneratedMessage,
    ) -> Result<PersistOutcome, AppError>;
}

type LockMap = HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>;

/// One async mutex per output path.
///
/// Entries live only while some task holds or waits for the lock, so the
/// map does not grow with every VIN ever written.
#[derive(Clone, Default)]
pub struct FileLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl FileLocks {
    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn for_path(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.map();
        // Waiters cancelled before acquiring never reach `release`
        map.retain(|p, lock| p == path || Arc::strong_count(lock) > 1);
        map.entry(path.to_path_buf()).or_default().clone()
    }

    /// Waits for exclusive access to `path`.
    pub async fn lock(&self, path: &Path) -> PathGuard {
        let guard = self.for_path(path).lock_owned().await;
        PathGuard {
            locks: self.clone(),
            path: path.to_path_buf(),
            guard: Some(guard),
        }
    }

    /// Number of paths currently locked or waited on.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Drops the entry for `path` unless another task still holds a handle.
    fn release(&self, path: &Path) {
        let mut map = self.map();
        // Handles are only cloned under the map lock, so a count of one
        // means the map holds the last reference.
        if map.get(path).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(path);
        }
    }
}

/// Exclusive access to one output path; releases its map entry on drop.
pub struct PathGuard {
    locks: FileLocks,
    path: PathBuf,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.path);
    }
}

/// Writes `bytes` to a sibling temp file and renames it over `path`.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating directory {}", dir.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::Persistence(format!("{} has no file name", path.display())))?;
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(AppError::Persistence(format!(
            "replacing {}: {}",
            path.display(),
            e
        )));
    }

    Ok(())
}

fn vin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid VIN pattern"))
}

/// Stores each message as `<folder>/<vin>.txt`, the message being the whole
/// file content.
pub struct FileSink {
    folder: PathBuf,
    locks: FileLocks,
}

impl FileSink {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            locks: FileLocks::default(),
        }
    }

    /// Path the message for `vin` is written to.
    pub fn path_for(&self, vin: &str) -> Result<PathBuf, AppError> {
        if !vin_pattern().is_match(vin) {
            return Err(AppError::Persistence(format!(
                "VIN '{}' cannot be used as a file name",
                vin
            )));
        }
        Ok(self.folder.join(format!("{}.txt", vin)))
    }
}

#[async_trait]
impl MessageSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn persist(
        &self,
        target: &PersistTarget<'_>,
        message: &GeneratedMessage,
    ) -> Result<PersistOutcome, AppError> {
        let vin = target
            .record
            .vin
            .as_deref()
            .ok_or_else(|| AppError::Persistence("matched record has no VIN".to_string()))?;
        let path = self.path_for(vin)?;

        let _guard = self.locks.lock(&path).await;
        write_atomically(&path, message.text.as_bytes()).await?;

        tracing::info!("✓ Saved message for VIN {} to {}", vin, path.display());
        Ok(PersistOutcome {
            sink: self.name(),
            location: path,
        })
    }
}

fn sanitize_file_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "dataset".to_string()
    } else {
        cleaned
    }
}

/// Rewrites the first sheet with the message in the row's `mail_content`
/// cell. Other sheets of the source workbook are not carried over.
pub struct SpreadsheetSink {
    upload_dir: PathBuf,
    locks: FileLocks,
}

impl SpreadsheetSink {
    /// `upload_dir` receives rewritten copies of uploaded workbooks.
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            locks: FileLocks::default(),
        }
    }

    /// Output path: the source file itself (as `.xlsx`), or a sanitised
    /// copy of the upload name under `upload_dir`.
    pub fn path_for(&self, source: &DatasetSource) -> PathBuf {
        match source {
            DatasetSource::Path(path) => {
                let is_xlsx = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
                if is_xlsx {
                    path.clone()
                } else {
                    path.with_extension("xlsx")
                }
            }
            DatasetSource::Upload { file_name } => self
                .upload_dir
                .join(format!("{}.xlsx", sanitize_file_stem(file_name))),
        }
    }
}

#[async_trait]
impl MessageSink for SpreadsheetSink {
    fn name(&self) -> &'static str {
        "spreadsheet"
    }

    async fn persist(
        &self,
        target: &PersistTarget<'_>,
        message: &GeneratedMessage,
    ) -> Result<PersistOutcome, AppError> {
        let path = self.path_for(target.source);

        let mut dataset = target.dataset.clone();
        dataset.set_cell(
            target.row_index,
            MAIL_CONTENT_COLUMN,
            CellValue::Text(message.text.clone()),
        )?;
        let bytes = dataset.to_xlsx_bytes()?;

        let _guard = self.locks.lock(&path).await;
        write_atomically(&path, &bytes).await?;

        tracing::info!(
            "✓ Updated row {} of {} with generated message",
            target.row_index,
            path.display()
        );
        Ok(PersistOutcome {
            sink: self.name(),
            location: path,
        })
    }
}

/// Builds the sink for `mode`.
pub fn sink_for(
    mode: PersistenceMode,
    mail_folder: &Path,
    spreadsheet_dir: &Path,
) -> Arc<dyn MessageSink> {
    match mode {
        PersistenceMode::File => Arc::new(FileSink::new(mail_folder)),
        PersistenceMode::Spreadsheet => Arc::new(SpreadsheetSink::new(spreadsheet_dir)),
    }
}
