use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables for one run. Loaded from an optional JSON file; every field
/// falls back to its default when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunSettings {
    /// Worker pool width for the metadata collection phase.
    pub worker_threads: usize,
    /// Upper bound for one external converter process.
    pub convert_timeout_secs: u64,
    /// A converted video smaller than this is treated as a failed output.
    pub min_video_output_bytes: u64,
    /// Allow falling back to ffprobe when embedded metadata is unreadable.
    pub use_ffprobe: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            worker_threads: 8,
            convert_timeout_secs: 600,
            min_video_output_bytes: 100_000,
            use_ffprobe: true,
        }
    }
}

pub fn load_settings(path: Option<&Path>) -> Result<RunSettings, AppError> {
    let Some(path) = path else {
        return Ok(RunSettings::default());
    };
    if !path.is_file() {
        return Err(AppError::Settings(format!(
            "設定ファイルが存在しません: {}",
            path.display()
        )));
    }
    let content = fs::read_to_string(path).map_err(|e| AppError::Settings(e.to_string()))?;
    let settings: RunSettings =
        serde_json::from_str(&content).map_err(|e| AppError::Settings(e.to_string()))?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &RunSettings) -> Result<(), AppError> {
    if !(1..=64).contains(&settings.worker_threads) {
        return Err(AppError::Settings(
            "workerThreads は1〜64で指定してください".to_string(),
        ));
    }
    if settings.convert_timeout_secs == 0 {
        return Err(AppError::Settings(
            "convertTimeoutSecs は1以上にしてください".to_string(),
        ));
    }
    Ok(())
}
