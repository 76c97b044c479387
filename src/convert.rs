use crate::fs_atomic::recoverable_delete;
use crate::model::{ConvertDetail, ExecuteStatus, FileRecord, MediaClass, SkipReason};
use crate::settings::RunSettings;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ConvertOutcome {
    pub heic_converted: usize,
    pub mov_converted: usize,
    pub failed: usize,
    pub details: Vec<ConvertDetail>,
}

/// Convert legacy formats in place: `.heic` → `.jpg` (ImageMagick) and
/// `.mov` → `.mp4` (ffmpeg). Strictly sequential; the converters are
/// heavyweight external processes. Records are updated in place so the
/// rename phase sees the post-conversion path and extension — in
/// simulation mode as well, without touching the disk.
pub fn convert_records(
    records: &mut [FileRecord],
    commit: bool,
    settings: &RunSettings,
) -> ConvertOutcome {
    let mut outcome = ConvertOutcome::default();
    for record in records.iter_mut() {
        match record.extension.as_str() {
            "heic" => convert_one(record, "jpg", commit, settings, &mut outcome),
            "mov" => convert_one(record, "mp4", commit, settings, &mut outcome),
            _ => debug!("変換不要: {}", record.original_name),
        }
    }
    outcome
}

fn convert_one(
    record: &mut FileRecord,
    target_ext: &str,
    commit: bool,
    settings: &RunSettings,
    outcome: &mut ConvertOutcome,
) {
    let source = record.path.clone();
    let destination = source.with_extension(target_ext);
    let source_name = record.original_name.clone();
    let is_video = matches!(record.class, MediaClass::Video);

    let result: Result<Option<String>, String> = if destination.exists() {
        info!(
            "変換をスキップ: {} は既に存在します",
            destination.display()
        );
        Ok(Some("変換済みの出力が既に存在します".to_string()))
    } else if !commit {
        info!(
            "変換（ドライラン）: {} -> {}",
            source_name,
            destination.display()
        );
        Ok(None)
    } else {
        info!("変換: {} -> {}", source_name, destination.display());
        run_conversion(&source, &destination, is_video, settings)
    };

    match result {
        Ok(note) => {
            // Trash the original only after an actual conversion this run;
            // a pre-existing output leaves it in place, and the dry run
            // touches nothing.
            if commit && note.is_none() {
                if let Err(error) = recoverable_delete(&source) {
                    warn!("{}: {}", source.display(), error);
                }
            }
            record.path = destination.clone();
            record.extension = target_ext.to_string();
            record.converted = true;
            match record.class {
                MediaClass::Image => outcome.heic_converted += 1,
                MediaClass::Video => outcome.mov_converted += 1,
            }
            outcome.details.push(ConvertDetail {
                source_path: source.to_string_lossy().to_string(),
                destination_path: Some(destination.to_string_lossy().to_string()),
                status: ExecuteStatus::Succeeded,
                reason: note,
            });
        }
        Err(error) => {
            warn!("変換に失敗しました {}: {}", source.display(), error);
            record.skip_reason = Some(SkipReason::ConvertFailed);
            outcome.failed += 1;
            outcome.details.push(ConvertDetail {
                source_path: source.to_string_lossy().to_string(),
                destination_path: Some(destination.to_string_lossy().to_string()),
                status: ExecuteStatus::Failed,
                reason: Some(error),
            });
        }
    }
}

fn run_conversion(
    source: &Path,
    destination: &Path,
    is_video: bool,
    settings: &RunSettings,
) -> Result<Option<String>, String> {
    let mut command = if is_video {
        ffmpeg_command(source, destination)
    } else {
        magick_command(source, destination)
    };

    let status = run_with_timeout(
        &mut command,
        Duration::from_secs(settings.convert_timeout_secs),
    )?;
    if !status.success() {
        // A failed converter may leave a half-written output behind.
        let _ = fs::remove_file(destination);
        return Err(format!(
            "変換プロセスが異常終了しました (exit: {:?})",
            status.code()
        ));
    }
    if !destination.is_file() {
        return Err("変換後のファイルが見つかりません".to_string());
    }
    if is_video {
        let size = fs::metadata(destination).map(|m| m.len()).unwrap_or(0);
        if size < settings.min_video_output_bytes {
            let _ = fs::remove_file(destination);
            return Err(format!("変換後のファイルが小さすぎます ({} bytes)", size));
        }
    }
    Ok(None)
}

/// Run the converter with an explicit upper bound; expiry kills the child
/// and counts as a conversion failure. Output streams are discarded so
/// the poll loop cannot block on a full pipe.
fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<std::process::ExitStatus, String> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("変換プロセスの起動に失敗しました: {}", e))?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!(
                        "変換がタイムアウトしました ({}秒)",
                        timeout.as_secs()
                    ));
                }
                thread::sleep(Duration::from_millis(200));
            }
            Err(error) => return Err(format!("変換プロセスの監視に失敗しました: {}", error)),
        }
    }
}

fn magick_command(source: &Path, destination: &Path) -> Command {
    let mut cmd = Command::new("magick");
    cmd.arg(source)
        .args(["-define", "heic:preserve-exif=true"])
        .arg(destination);
    cmd
}

fn ffmpeg_command(source: &Path, destination: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-i"])
        .arg(source)
        .args([
            "-c:v",
            "libx264",
            "-preset",
            "fast",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-movflags",
            "+faststart",
        ])
        .arg(destination);
    cmd
}
