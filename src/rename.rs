use crate::fs_atomic::move_no_replace;
use crate::model::{ExecuteStatus, FileRecord, RenameDetail, SkipReason};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Filename stems eligible for renaming. Order matters: the first match
/// decides where the preserved extra text starts.
static RENAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(IM_|IMG_|IMG_E|VD_)\d+",
        r"(?i)^\d+(_\d+)?",
        r"(?i)^[A-Z]{4}\d{4}",
        r"(?i)^BulkPics \d+",
        r"(?i)^P([A-Z]|\d)\d{6}",
        r"^\d{8}-\d+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("failed to compile rename pattern"))
    .collect()
});

/// The canonical output shape `YYYYMMDD-N`. Matching it keeps re-runs
/// idempotent.
static CANONICAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{8})-(\d+)").expect("failed to compile canonical pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Skip(SkipReason),
    Rename { extra: String },
}

/// Classify one stem against the known shapes and the idempotence rule.
/// The resolved metadata date wins over a previously assigned canonical
/// name, but an unreliable (filesystem-fallback) timestamp never
/// overrules an existing canonical name.
pub(crate) fn evaluate_stem(
    stem: &str,
    metadata_reliable: bool,
    resolved_date: NaiveDate,
) -> Decision {
    let Some(matched) = RENAME_PATTERNS.iter().find_map(|pattern| pattern.find(stem)) else {
        return Decision::Skip(SkipReason::Pattern);
    };

    if let Some(captures) = CANONICAL_PATTERN.captures(stem) {
        if !metadata_reliable {
            return Decision::Skip(SkipReason::AlreadyRenamed);
        }
        if let Ok(date) = NaiveDate::parse_from_str(&captures[1], "%Y%m%d") {
            if date <= resolved_date {
                return Decision::Skip(SkipReason::AlreadyRenamed);
            }
        }
        // Date mismatch (or unparseable digits): metadata is authoritative.
        let end = captures.get(0).map_or(0, |m| m.end());
        return Decision::Rename {
            extra: stem[end..].to_string(),
        };
    }

    Decision::Rename {
        extra: stem[matched.end()..].to_string(),
    }
}

fn normalize_extra(extra: &str) -> String {
    match extra.chars().next() {
        None => String::new(),
        Some('-' | '_' | ' ' | '.') => extra.to_string(),
        Some(_) => format!("-{}", extra),
    }
}

fn parse_canonical_name(name: &str) -> Option<(NaiveDate, u32)> {
    let captures = CANONICAL_PATTERN.captures(name)?;
    let date = NaiveDate::parse_from_str(&captures[1], "%Y%m%d").ok()?;
    let sequence: u32 = captures[2].parse().ok()?;
    Some((date, sequence))
}

fn skip_reason_label(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::Pattern => "パターンに一致しません",
        SkipReason::AlreadyRenamed => "リネーム済みのためスキップしました",
        SkipReason::ConvertFailed => "変換に失敗したためスキップしました",
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenameOutcome {
    pub renamed: usize,
    pub failed: usize,
    pub skipped_pattern: usize,
    pub skipped_canonical: usize,
    pub details: Vec<RenameDetail>,
}

/// Compute and apply (or simulate) canonical names for the whole batch.
/// Runs on a single thread: sequence state is shared across files and the
/// folder namespace is mutated, so nothing here may race.
pub fn rename_records(records: &mut [FileRecord], folder: &Path, commit: bool) -> RenameOutcome {
    let mut outcome = RenameOutcome::default();

    // In simulation the converted outputs are not on disk yet; account
    // for their names so allocation matches what commit mode would do.
    let mut pending_names: HashMap<PathBuf, Vec<String>> = HashMap::new();
    if !commit {
        for record in records.iter().filter(|r| r.converted) {
            if let (Some(parent), Some(name)) = (record.path.parent(), record.path.file_name()) {
                pending_names
                    .entry(parent.to_path_buf())
                    .or_default()
                    .push(name.to_string_lossy().to_string());
            }
        }
    }

    // Reproducible processing order: resolved UTC date, then original
    // filename. Repeated runs over an unchanged set assign identically.
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        (
            records[a].timestamp.date_naive(),
            records[a].original_name.as_str(),
        )
            .cmp(&(
                records[b].timestamp.date_naive(),
                records[b].original_name.as_str(),
            ))
    });

    // Live name set per directory, seeded from disk, plus the sequence
    // numbers already taken per date. Skipped canonical files keep their
    // slots occupied through these.
    let mut dir_names: HashMap<PathBuf, HashSet<String>> = HashMap::new();
    let mut used: HashMap<NaiveDate, HashSet<u32>> = HashMap::new();

    for index in order {
        if matches!(records[index].skip_reason, Some(SkipReason::ConvertFailed)) {
            outcome.details.push(RenameDetail {
                source_path: records[index].path.to_string_lossy().to_string(),
                destination_path: None,
                status: ExecuteStatus::Skipped,
                reason: Some(skip_reason_label(SkipReason::ConvertFailed).to_string()),
            });
            continue;
        }

        let record = &records[index];
        let stem = record
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let date = record.timestamp.date_naive();
        let decision = evaluate_stem(&stem, record.metadata_reliable(), date);
        let source_display = record.path.to_string_lossy().to_string();
        let current_name = record
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent = record.path.parent().unwrap_or(folder).to_path_buf();
        let extension = record.extension.clone();

        match decision {
            Decision::Skip(reason) => {
                debug!("スキップ {}: {}", current_name, skip_reason_label(reason));
                records[index].skip_reason = Some(reason);
                match reason {
                    SkipReason::Pattern => outcome.skipped_pattern += 1,
                    SkipReason::AlreadyRenamed => outcome.skipped_canonical += 1,
                    SkipReason::ConvertFailed => {}
                }
                outcome.details.push(RenameDetail {
                    source_path: source_display,
                    destination_path: None,
                    status: ExecuteStatus::Skipped,
                    reason: Some(skip_reason_label(reason).to_string()),
                });
            }
            Decision::Rename { extra } => {
                let extra = normalize_extra(&extra);
                let prefix = date.format("%Y%m%d").to_string();
                let names = dir_names_entry(&mut dir_names, &mut used, &pending_names, &parent);
                let used_for_date = used.entry(date).or_default();

                // Smallest sequence whose number and candidate name are
                // both free.
                let mut sequence = 0u32;
                let destination_name = loop {
                    if !used_for_date.contains(&sequence) {
                        let candidate = format!("{}-{}{}.{}", prefix, sequence, extra, extension);
                        if !names.contains(&candidate) {
                            break candidate;
                        }
                    }
                    sequence += 1;
                };
                let destination = parent.join(&destination_name);

                let applied = if commit {
                    match move_no_replace(&records[index].path, &destination) {
                        Ok(()) => {
                            info!("リネーム: {} -> {}", current_name, destination_name);
                            true
                        }
                        Err(error) => {
                            warn!("リネームに失敗しました {}: {}", current_name, error);
                            outcome.failed += 1;
                            outcome.details.push(RenameDetail {
                                source_path: source_display.clone(),
                                destination_path: Some(destination.to_string_lossy().to_string()),
                                status: ExecuteStatus::Failed,
                                reason: Some(error),
                            });
                            false
                        }
                    }
                } else {
                    info!(
                        "リネーム（ドライラン）: {} -> {}",
                        current_name, destination_name
                    );
                    true
                };

                if applied {
                    used_for_date.insert(sequence);
                    names.remove(&current_name);
                    names.insert(destination_name.clone());

                    let record = &mut records[index];
                    if commit {
                        record.path = destination.clone();
                    }
                    record.final_name = Some(destination_name.clone());
                    outcome.renamed += 1;
                    outcome.details.push(RenameDetail {
                        source_path: source_display,
                        destination_path: Some(destination.to_string_lossy().to_string()),
                        status: ExecuteStatus::Succeeded,
                        reason: None,
                    });
                }
            }
        }
    }

    outcome
}

fn dir_names_entry<'a>(
    dir_names: &'a mut HashMap<PathBuf, HashSet<String>>,
    used: &mut HashMap<NaiveDate, HashSet<u32>>,
    pending: &HashMap<PathBuf, Vec<String>>,
    dir: &Path,
) -> &'a mut HashSet<String> {
    match dir_names.entry(dir.to_path_buf()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let mut names: HashSet<String> = fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .filter(|e| e.path().is_file())
                        .map(|e| e.file_name().to_string_lossy().to_string())
                        .collect()
                })
                .unwrap_or_default();
            if let Some(extra) = pending.get(dir) {
                names.extend(extra.iter().cloned());
            }
            for name in &names {
                if let Some((date, sequence)) = parse_canonical_name(name) {
                    used.entry(date).or_default().insert(sequence);
                }
            }
            entry.insert(names)
        }
    }
}
