use crate::error::AppError;
use crate::model::{MediaClass, TimestampSource};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use exif::{In, Reader, Tag, Value};
use once_cell::sync::Lazy;
use std::fs;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy)]
pub struct ResolvedTimestamp {
    pub timestamp: DateTime<Utc>,
    pub source: TimestampSource,
}

static FFPROBE_AVAILABLE: Lazy<bool> = Lazy::new(|| {
    Command::new("ffprobe")
        .arg("-version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
});

pub fn is_ffprobe_available() -> bool {
    *FFPROBE_AVAILABLE
}

/// Resolve a file's creation moment: embedded metadata first, then the
/// ffprobe fallback, then the filesystem modification time. Parse failures
/// inside the first two steps fall through silently; only a failing stat
/// in the last step escapes as an error.
pub fn resolve(
    path: &Path,
    class: MediaClass,
    use_ffprobe: bool,
) -> Result<ResolvedTimestamp, AppError> {
    let embedded = read_embedded_datetime(path, class)
        .map(|ts| (ts, TimestampSource::PrimaryMetadata))
        .or_else(|| {
            if use_ffprobe {
                read_ffprobe_datetime(path).map(|ts| (ts, TimestampSource::SecondaryMetadata))
            } else {
                None
            }
        });
    if let Some((timestamp, source)) = embedded {
        return Ok(ResolvedTimestamp { timestamp, source });
    }

    let timestamp = read_modified_datetime(path).map_err(|e| {
        AppError::Io(format!(
            "ファイル情報の取得に失敗しました `{}`: {}",
            path.display(),
            e
        ))
    })?;
    Ok(ResolvedTimestamp {
        timestamp,
        source: TimestampSource::FileSystem,
    })
}

fn read_embedded_datetime(path: &Path, class: MediaClass) -> Option<DateTime<Utc>> {
    match class {
        MediaClass::Image => read_exif_datetime(path),
        MediaClass::Video => read_iso_bmff_creation_datetime(path),
    }
}

fn read_modified_datetime(path: &Path) -> std::io::Result<DateTime<Utc>> {
    let metadata = fs::metadata(path)?;
    let modified = metadata.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Capture timestamp from EXIF. Priority: DateTimeOriginal > DateTime.
fn read_exif_datetime(path: &Path) -> Option<DateTime<Utc>> {
    let file = fs::File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))?;
    // Extract the raw ASCII bytes directly; display_value() wraps the
    // string in double quotes.
    let raw = match &field.value {
        Value::Ascii(vec) if !vec.is_empty() => String::from_utf8(vec[0].clone()).ok()?,
        _ => return None,
    };
    parse_exif_datetime(&raw)
}

/// EXIF datetimes carry no timezone; they are taken as UTC.
pub(crate) fn parse_exif_datetime(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim().trim_matches('\0');
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

#[derive(Debug, Clone, Copy)]
struct AtomRange {
    data_start: u64,
    data_end: u64,
}

/// Creation time from the `moov/mvhd` atom of an ISO BMFF container
/// (mp4/mov/m4v), without spawning any external process.
fn read_iso_bmff_creation_datetime(path: &Path) -> Option<DateTime<Utc>> {
    let mut file = fs::File::open(path).ok()?;
    let file_len = file.metadata().ok()?.len();
    let moov = find_atom(&mut file, 0, file_len, *b"moov")?;
    let mvhd = find_atom(&mut file, moov.data_start, moov.data_end, *b"mvhd")?;
    parse_mvhd_creation_time(&mut file, mvhd)
}

fn find_atom(file: &mut fs::File, start: u64, end: u64, wanted: [u8; 4]) -> Option<AtomRange> {
    let mut offset = start;
    while offset + 8 <= end {
        file.seek(SeekFrom::Start(offset)).ok()?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header).ok()?;
        let mut atom_size =
            u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let atom_kind = [header[4], header[5], header[6], header[7]];
        let mut header_size = 8u64;

        if atom_size == 1 {
            // 64-bit extended size follows the header.
            let mut ext = [0u8; 8];
            file.read_exact(&mut ext).ok()?;
            atom_size = u64::from_be_bytes(ext);
            header_size = 16;
        } else if atom_size == 0 {
            // Size 0 means "to end of file".
            atom_size = end.saturating_sub(offset);
        }
        if atom_size < header_size {
            return None;
        }
        let atom_end = offset.saturating_add(atom_size).min(end);
        if atom_end <= offset {
            return None;
        }

        if atom_kind == wanted {
            return Some(AtomRange {
                data_start: offset + header_size,
                data_end: atom_end,
            });
        }
        offset = atom_end;
    }
    None
}

fn parse_mvhd_creation_time(file: &mut fs::File, mvhd: AtomRange) -> Option<DateTime<Utc>> {
    if mvhd.data_end <= mvhd.data_start {
        return None;
    }
    file.seek(SeekFrom::Start(mvhd.data_start)).ok()?;
    let mut ver_flags = [0u8; 4];
    file.read_exact(&mut ver_flags).ok()?;
    let qt_seconds = if ver_flags[0] == 1 {
        read_u64_be(file)?
    } else {
        u64::from(read_u32_be(file)?)
    };
    qt_epoch_to_utc(qt_seconds)
}

fn read_u32_be(file: &mut fs::File) -> Option<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf).ok()?;
    Some(u32::from_be_bytes(buf))
}

fn read_u64_be(file: &mut fs::File) -> Option<u64> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf).ok()?;
    Some(u64::from_be_bytes(buf))
}

/// QuickTime epoch (1904-01-01) to UTC. A stored value of 0 means the
/// writer left the field unset.
pub(crate) fn qt_epoch_to_utc(qt_seconds: u64) -> Option<DateTime<Utc>> {
    const QT_TO_UNIX_OFFSET: i64 = 2_082_844_800;
    if qt_seconds == 0 {
        return None;
    }
    let unix = i64::try_from(qt_seconds).ok()?.checked_sub(QT_TO_UNIX_OFFSET)?;
    DateTime::<Utc>::from_timestamp(unix, 0)
}

fn read_ffprobe_datetime(path: &Path) -> Option<DateTime<Utc>> {
    if !*FFPROBE_AVAILABLE {
        return None;
    }
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_entries",
            "format_tags=creation_time",
            "-i",
        ])
        .arg(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let data: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    let raw = data.get("format")?.get("tags")?.get("creation_time")?.as_str()?;
    parse_iso_datetime(raw)
}

pub(crate) fn parse_iso_datetime(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn parses_exif_datetime() {
        let dt = parse_exif_datetime("2023:10:15 12:30:45").unwrap();
        assert_eq!(dt.to_rfc3339(), "2023-10-15T12:30:45+00:00");
    }

    #[test]
    fn trims_exif_padding() {
        let dt = parse_exif_datetime(" 2023:10:15 12:30:45\0").unwrap();
        assert_eq!(dt.year(), 2023);
    }

    #[test]
    fn rejects_garbage_exif_value() {
        assert!(parse_exif_datetime("not a date").is_none());
        assert!(parse_exif_datetime("2023-10-15 12:30:45").is_none());
    }

    #[test]
    fn qt_epoch_conversion() {
        // The QuickTime epoch offset lands exactly on the Unix epoch.
        let dt = qt_epoch_to_utc(2_082_844_800).unwrap();
        assert_eq!(dt.to_rfc3339(), "1970-01-01T00:00:00+00:00");
        let dt = qt_epoch_to_utc(2_082_844_800 + 86_400).unwrap();
        assert_eq!(dt.to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }

    #[test]
    fn qt_zero_means_unset() {
        assert!(qt_epoch_to_utc(0).is_none());
    }

    #[test]
    fn parses_iso_variants() {
        let z = parse_iso_datetime("2023-10-17T08:00:00Z").unwrap();
        assert_eq!(z.to_rfc3339(), "2023-10-17T08:00:00+00:00");

        // Offsets are normalized to UTC.
        let offset = parse_iso_datetime("2023-10-17T17:00:00+09:00").unwrap();
        assert_eq!(offset.to_rfc3339(), "2023-10-17T08:00:00+00:00");

        let fractional = parse_iso_datetime("2023-10-17T08:00:00.123456Z").unwrap();
        assert_eq!(fractional.date_naive().to_string(), "2023-10-17");

        let naive = parse_iso_datetime("2023-10-17 08:00:00").unwrap();
        assert_eq!(naive.to_rfc3339(), "2023-10-17T08:00:00+00:00");
    }

    #[test]
    fn unreadable_metadata_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        fs::write(&path, b"not really a jpeg").unwrap();

        let resolved = resolve(&path, MediaClass::Image, false).unwrap();
        assert_eq!(resolved.source, TimestampSource::FileSystem);
        assert!(!resolved.source.is_reliable());
    }

    #[test]
    fn missing_file_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vanished.jpg");
        assert!(resolve(&path, MediaClass::Image, false).is_err());
    }

    #[test]
    fn reads_mvhd_from_minimal_container() {
        // moov atom wrapping a version-0 mvhd whose creation time is one
        // day past the Unix epoch.
        let qt_seconds: u32 = 2_082_844_800 + 86_400;
        let mut mvhd_payload = vec![0u8, 0, 0, 0]; // version + flags
        mvhd_payload.extend_from_slice(&qt_seconds.to_be_bytes()); // creation
        mvhd_payload.extend_from_slice(&0u32.to_be_bytes()); // modification

        let mut mvhd = Vec::new();
        mvhd.extend_from_slice(&(8 + mvhd_payload.len() as u32).to_be_bytes());
        mvhd.extend_from_slice(b"mvhd");
        mvhd.extend_from_slice(&mvhd_payload);

        let mut moov = Vec::new();
        moov.extend_from_slice(&(8 + mvhd.len() as u32).to_be_bytes());
        moov.extend_from_slice(b"moov");
        moov.extend_from_slice(&mvhd);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, &moov).unwrap();

        let dt = read_iso_bmff_creation_datetime(&path).unwrap();
        assert_eq!(dt.to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }
}
