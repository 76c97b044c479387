use crate::error::AppError;
use crate::file_collect::CandidateFile;
use crate::model::{FileRecord, ResolveFailure};
use crate::settings::RunSettings;
use crate::timestamp;
use rayon::prelude::*;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct CollectOutcome {
    pub records: Vec<FileRecord>,
    pub failures: Vec<ResolveFailure>,
}

/// Resolve timestamps for all candidates on a bounded worker pool.
/// Resolution is short, independent, I/O-bound work, so it fans out; the
/// pool is joined before returning and later phases never observe a
/// record ahead of that barrier. A single file's hard failure becomes a
/// failure row, never an abort.
pub fn collect_records(
    candidates: Vec<CandidateFile>,
    settings: &RunSettings,
) -> Result<CollectOutcome, AppError> {
    let total = candidates.len();
    if total == 0 {
        return Ok(CollectOutcome::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.worker_threads)
        .build()
        .map_err(|e| AppError::Pool(e.to_string()))?;

    let use_ffprobe = settings.use_ffprobe;
    let (tx, rx) = mpsc::channel::<Result<FileRecord, ResolveFailure>>();

    let worker = std::thread::spawn(move || {
        pool.install(|| {
            candidates.into_par_iter().for_each_with(tx, |sender, candidate| {
                let _ = sender.send(build_record(candidate, use_ffprobe));
            });
        });
    });

    let mut records = Vec::with_capacity(total);
    let mut failures = Vec::new();
    let mut received = 0usize;
    while received < total {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(record)) => {
                received += 1;
                debug!(
                    "{}: タイムスタンプ {} ({:?})",
                    record.original_name, record.timestamp, record.source
                );
                records.push(record);
            }
            Ok(Err(failure)) => {
                received += 1;
                warn!("{}: {}", failure.source_path, failure.reason);
                failures.push(failure);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = worker.join();

    // Arrival order is completion order; re-sort so downstream phases see
    // a deterministic set regardless of scheduling.
    records.sort_by(|a, b| a.original_name.cmp(&b.original_name));
    failures.sort_by(|a, b| a.source_path.cmp(&b.source_path));

    Ok(CollectOutcome { records, failures })
}

fn build_record(candidate: CandidateFile, use_ffprobe: bool) -> Result<FileRecord, ResolveFailure> {
    let original_name = candidate
        .path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    match timestamp::resolve(&candidate.path, candidate.class, use_ffprobe) {
        Ok(resolved) => Ok(FileRecord {
            original_name,
            extension: candidate.extension,
            class: candidate.class,
            timestamp: resolved.timestamp,
            source: resolved.source,
            converted: false,
            skip_reason: None,
            final_name: None,
            path: candidate.path,
        }),
        Err(error) => Err(ResolveFailure {
            source_path: candidate.path.to_string_lossy().to_string(),
            reason: error.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaClass, TimestampSource};
    use std::fs;
    use std::path::PathBuf;

    fn test_settings() -> RunSettings {
        RunSettings {
            use_ffprobe: false,
            ..RunSettings::default()
        }
    }

    fn candidate(path: PathBuf, extension: &str, class: MediaClass) -> CandidateFile {
        CandidateFile {
            path,
            extension: extension.to_string(),
            class,
        }
    }

    #[test]
    fn empty_input_yields_empty_outcome() {
        let outcome = collect_records(Vec::new(), &test_settings()).unwrap();
        assert!(outcome.records.is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn collects_one_record_per_file() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["IMG_0002.jpg", "IMG_0001.jpg", "IMG_0003.jpg"] {
            fs::write(dir.path().join(name), b"no metadata").unwrap();
        }
        let candidates = ["IMG_0002.jpg", "IMG_0001.jpg", "IMG_0003.jpg"]
            .iter()
            .map(|name| candidate(dir.path().join(name), "jpg", MediaClass::Image))
            .collect();

        let outcome = collect_records(candidates, &test_settings()).unwrap();
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.failures.is_empty());
        // Sorted regardless of completion order.
        let names: Vec<_> = outcome
            .records
            .iter()
            .map(|r| r.original_name.as_str())
            .collect();
        assert_eq!(names, ["IMG_0001.jpg", "IMG_0002.jpg", "IMG_0003.jpg"]);
        // Plain bytes carry no metadata: filesystem fallback, unreliable.
        assert!(outcome
            .records
            .iter()
            .all(|r| r.source == TimestampSource::FileSystem && !r.metadata_reliable()));
    }

    #[test]
    fn hard_failure_is_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.jpg"), b"x").unwrap();
        let candidates = vec![
            candidate(dir.path().join("ok.jpg"), "jpg", MediaClass::Image),
            candidate(dir.path().join("vanished.jpg"), "jpg", MediaClass::Image),
        ];

        let outcome = collect_records(candidates, &test_settings()).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].source_path.ends_with("vanished.jpg"));
    }
}
