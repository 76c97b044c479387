use crate::convert::{self, ConvertOutcome};
use crate::error::AppError;
use crate::file_collect;
use crate::metadata;
use crate::model::{BatchStats, RunReport};
use crate::rename;
use crate::settings::RunSettings;
use crate::timestamp;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub folder: PathBuf,
    pub commit: bool,
    pub include_subfolders: bool,
    pub no_convert: bool,
}

/// Drive the phases in strict order: catalog → collect (parallel, joined)
/// → convert (sequential) → rename (sequential). Only folder-level setup
/// failures abort; everything per-file is recorded and the batch
/// continues.
pub fn process_folder(request: &RunRequest, settings: &RunSettings) -> Result<RunReport, AppError> {
    let start = Instant::now();
    info!("処理を開始します: {}", request.folder.display());
    if !request.commit {
        info!("ドライランモードで実行します（適用するには --commit）");
    }
    if settings.use_ffprobe && !timestamp::is_ffprobe_available() {
        warn!("ffprobe が見つかりません。メタデータの補助読み取りは行いません");
    }

    let collect = file_collect::collect_candidates(&request.folder, request.include_subfolders)?;
    let scanned = collect.candidates.len();
    let skipped_by_extension = collect.skipped_by_extension;
    info!(
        "対象ファイル: {}件（拡張子対象外: {}件）",
        scanned, skipped_by_extension
    );

    let collected = metadata::collect_records(collect.candidates, settings)?;
    let mut records = collected.records;
    let resolve_failures = collected.failures;

    let convert_outcome = if request.no_convert {
        info!("変換フェーズをスキップします（--no-convert）");
        ConvertOutcome::default()
    } else {
        convert::convert_records(&mut records, request.commit, settings)
    };

    let rename_outcome = rename::rename_records(&mut records, &request.folder, request.commit);

    let stats = BatchStats {
        scanned,
        skipped_by_extension,
        resolved: records.len(),
        resolve_failed: resolve_failures.len(),
        heic_converted: convert_outcome.heic_converted,
        mov_converted: convert_outcome.mov_converted,
        convert_failed: convert_outcome.failed,
        renamed: rename_outcome.renamed,
        rename_failed: rename_outcome.failed,
        skipped_pattern: rename_outcome.skipped_pattern,
        skipped_canonical: rename_outcome.skipped_canonical,
        commit: request.commit,
        elapsed: start.elapsed(),
    };
    log_summary(&stats);

    Ok(RunReport {
        stats,
        resolve_failures,
        convert_details: convert_outcome.details,
        rename_details: rename_outcome.details,
    })
}

fn log_summary(stats: &BatchStats) {
    info!(
        "変換: 合計{}件（.heic→.jpg {}件 / .mov→.mp4 {}件 / 失敗 {}件）",
        stats.total_converted(),
        stats.heic_converted,
        stats.mov_converted,
        stats.convert_failed
    );
    if stats.commit {
        info!(
            "リネーム: {}件（失敗 {}件）",
            stats.renamed, stats.rename_failed
        );
    } else {
        info!(
            "リネーム予定: {}件（適用するには --commit を指定してください）",
            stats.renamed
        );
    }
    info!(
        "スキップ: {}件（パターン不一致 {}件 / リネーム済み {}件）",
        stats.total_skipped(),
        stats.skipped_pattern,
        stats.skipped_canonical
    );
    if stats.resolve_failed > 0 {
        warn!("メタデータ取得の失敗: {}件", stats.resolve_failed);
    }
    info!("処理時間: {:.2}秒", stats.elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;

    fn test_settings() -> RunSettings {
        RunSettings {
            use_ffprobe: false,
            ..RunSettings::default()
        }
    }

    fn request(folder: &std::path::Path, commit: bool) -> RunRequest {
        RunRequest {
            folder: folder.to_path_buf(),
            commit,
            include_subfolders: false,
            no_convert: false,
        }
    }

    #[test]
    fn missing_folder_aborts_before_any_phase() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(&dir.path().join("nope"), false);
        assert!(process_folder(&req, &test_settings()).is_err());
    }

    #[test]
    fn simulation_never_mutates_the_folder() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("IMG_0001.jpg"), b"a").unwrap();
        fs::write(dir.path().join("IMG_0002.jpg"), b"b").unwrap();
        fs::write(dir.path().join("vacation_photo.jpg"), b"c").unwrap();
        fs::write(dir.path().join("notes.txt"), b"d").unwrap();

        let report = process_folder(&request(dir.path(), false), &test_settings()).unwrap();

        assert_eq!(report.stats.scanned, 3);
        assert_eq!(report.stats.skipped_by_extension, 1);
        assert_eq!(report.stats.renamed, 2);
        assert_eq!(report.stats.skipped_pattern, 1);
        assert!(!report.stats.has_hard_failures());
        // Disk untouched.
        assert!(dir.path().join("IMG_0001.jpg").exists());
        assert!(dir.path().join("IMG_0002.jpg").exists());
        assert!(dir.path().join("vacation_photo.jpg").exists());
    }

    #[test]
    fn commit_renames_and_second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("IMG_0001.jpg"), b"a").unwrap();
        fs::write(dir.path().join("IMG_0002.jpg"), b"b").unwrap();

        let first = process_folder(&request(dir.path(), true), &test_settings()).unwrap();
        assert_eq!(first.stats.renamed, 2);

        // Plain test bytes resolve through the filesystem fallback, so
        // the date prefix is today's UTC date.
        let prefix = Utc::now().format("%Y%m%d").to_string();
        assert!(dir.path().join(format!("{}-0.jpg", prefix)).exists());
        assert!(dir.path().join(format!("{}-1.jpg", prefix)).exists());

        let second = process_folder(&request(dir.path(), true), &test_settings()).unwrap();
        assert_eq!(second.stats.renamed, 0);
        assert_eq!(second.stats.skipped_canonical, 2);
    }

    #[test]
    fn simulated_conversion_feeds_the_rename_plan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("IMG_3001.heic"), b"heic").unwrap();

        let report = process_folder(&request(dir.path(), false), &test_settings()).unwrap();

        assert_eq!(report.stats.heic_converted, 1);
        assert_eq!(report.stats.renamed, 1);
        let prefix = Utc::now().format("%Y%m%d").to_string();
        let planned: Vec<_> = report
            .rename_details
            .iter()
            .filter_map(|d| d.destination_path.as_deref())
            .collect();
        assert_eq!(planned.len(), 1);
        // The plan reflects the post-conversion extension.
        assert!(planned[0].ends_with(&format!("{}-0.jpg", prefix)));
        // And the dry run created nothing.
        assert!(dir.path().join("IMG_3001.heic").exists());
        assert!(!dir.path().join("IMG_3001.jpg").exists());
    }

    #[test]
    fn no_convert_skips_the_conversion_phase() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("IMG_3001.heic"), b"heic").unwrap();
        let req = RunRequest {
            no_convert: true,
            ..request(dir.path(), false)
        };

        let report = process_folder(&req, &test_settings()).unwrap();
        assert_eq!(report.stats.total_converted(), 0);
        // The .heic is still renameable under its own extension.
        assert_eq!(report.stats.renamed, 1);
        let planned = report.rename_details[0].destination_path.as_deref().unwrap();
        assert!(planned.ends_with(".heic"));
    }
}
