use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Media class derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaClass {
    Image,
    Video,
}

/// Where a resolved timestamp came from, in decreasing order of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimestampSource {
    PrimaryMetadata,
    SecondaryMetadata,
    FileSystem,
}

impl TimestampSource {
    /// Metadata-backed sources are reliable; the filesystem fallback is not.
    pub fn is_reliable(self) -> bool {
        !matches!(self, TimestampSource::FileSystem)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    Pattern,
    AlreadyRenamed,
    ConvertFailed,
}

/// Per-file working state, owned by the pipeline for the duration of one
/// run. `path` and `extension` track the current on-disk identity and are
/// updated in place by the conversion phase.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub original_name: String,
    pub extension: String,
    pub class: MediaClass,
    pub timestamp: DateTime<Utc>,
    pub source: TimestampSource,
    pub converted: bool,
    pub skip_reason: Option<SkipReason>,
    pub final_name: Option<String>,
}

impl FileRecord {
    pub fn metadata_reliable(&self) -> bool {
        self.source.is_reliable()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecuteStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertDetail {
    pub source_path: String,
    pub destination_path: Option<String>,
    pub status: ExecuteStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameDetail {
    pub source_path: String,
    pub destination_path: Option<String>,
    pub status: ExecuteStatus,
    pub reason: Option<String>,
}

/// A file that could not be resolved at all (hard per-file failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveFailure {
    pub source_path: String,
    pub reason: String,
}

/// Run-wide accumulator, created at run start and reported at run end.
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    pub scanned: usize,
    pub skipped_by_extension: usize,
    pub resolved: usize,
    pub resolve_failed: usize,
    pub heic_converted: usize,
    pub mov_converted: usize,
    pub convert_failed: usize,
    pub renamed: usize,
    pub rename_failed: usize,
    pub skipped_pattern: usize,
    pub skipped_canonical: usize,
    pub commit: bool,
    pub elapsed: Duration,
}

impl BatchStats {
    pub fn total_converted(&self) -> usize {
        self.heic_converted + self.mov_converted
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped_pattern + self.skipped_canonical
    }

    /// Hard failures drive the non-zero process exit; soft skips and
    /// conversion/rename failures do not.
    pub fn has_hard_failures(&self) -> bool {
        self.resolve_failed > 0
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: BatchStats,
    pub resolve_failures: Vec<ResolveFailure>,
    pub convert_details: Vec<ConvertDetail>,
    pub rename_details: Vec<RenameDetail>,
}
