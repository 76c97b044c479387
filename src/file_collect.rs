use crate::error::AppError;
use crate::model::MediaClass;
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "heic"];
pub const VIDEO_EXTENSIONS: &[&str] = &["m4v", "mov", "mp4"];

static IMAGE_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| IMAGE_EXTENSIONS.iter().copied().collect());
static VIDEO_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| VIDEO_EXTENSIONS.iter().copied().collect());

/// Classify a lowercase extension into its media class, if supported.
pub fn media_class(extension: &str) -> Option<MediaClass> {
    if IMAGE_SET.contains(extension) {
        return Some(MediaClass::Image);
    }
    if VIDEO_SET.contains(extension) {
        return Some(MediaClass::Video);
    }
    None
}

#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub extension: String,
    pub class: MediaClass,
}

#[derive(Debug, Clone)]
pub struct CollectResult {
    pub candidates: Vec<CandidateFile>,
    pub skipped_by_extension: usize,
}

/// Enumerate the target folder and admit files with a supported extension.
/// Non-recursive unless `include_subfolders` is set. A missing or
/// unreadable folder is a hard error; everything after that is per-file.
pub fn collect_candidates(
    folder: &Path,
    include_subfolders: bool,
) -> Result<CollectResult, AppError> {
    if !folder.is_dir() {
        return Err(AppError::InvalidRequest(format!(
            "対象フォルダが存在しません: {}",
            folder.display()
        )));
    }
    let folder = safe_canonicalize(folder).map_err(|e| {
        AppError::InvalidRequest(format!(
            "パスの正規化に失敗しました `{}`: {}",
            folder.display(),
            e
        ))
    })?;

    let mut files: BTreeSet<PathBuf> = BTreeSet::new();
    if include_subfolders {
        for entry in WalkDir::new(&folder) {
            let entry =
                entry.map_err(|e| AppError::Io(format!("フォルダの走査に失敗しました: {}", e)))?;
            if entry.file_type().is_file() {
                files.insert(entry.path().to_path_buf());
            }
        }
    } else {
        let entries = fs::read_dir(&folder)
            .map_err(|e| AppError::InvalidRequest(format!("フォルダの読み込みに失敗しました: {}", e)))?;
        for entry in entries {
            let entry = entry
                .map_err(|e| AppError::Io(format!("フォルダエントリの読み込みに失敗しました: {}", e)))?;
            let path = entry.path();
            if path.is_file() {
                files.insert(path);
            }
        }
    }

    let mut candidates = Vec::new();
    let mut skipped_by_extension = 0usize;
    for path in files {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref().and_then(media_class) {
            Some(class) => candidates.push(CandidateFile {
                extension: extension.unwrap_or_default(),
                class,
                path,
            }),
            None => skipped_by_extension += 1,
        }
    }

    Ok(CollectResult {
        candidates,
        skipped_by_extension,
    })
}

/// `canonicalize()` wrapper that strips the Windows `\\?\` prefix.
fn safe_canonicalize(path: &Path) -> std::io::Result<PathBuf> {
    let canonical = path.canonicalize()?;
    Ok(strip_verbatim(canonical))
}

#[cfg(windows)]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(stripped) = s.strip_prefix(r"\\?\") {
        PathBuf::from(stripped)
    } else {
        path
    }
}

#[cfg(not(windows))]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    path
}
