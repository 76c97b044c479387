use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

/// Move `source` to `destination` without ever clobbering an existing
/// file. Falls back to copy+delete when a plain rename fails (cross-device
/// destinations).
pub fn move_no_replace(source: &Path, destination: &Path) -> Result<(), String> {
    if destination.exists() {
        return Err(format!(
            "出力先に同名のファイルが存在します: {}",
            destination.display()
        ));
    }

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            let temp = temp_path_for(destination);
            fs::copy(source, &temp)
                .map_err(|e| format!("一時ファイルへのコピーに失敗しました: {}", e))?;
            if let Err(error) = fs::rename(&temp, destination) {
                let _ = fs::remove_file(&temp);
                return Err(format!("一時ファイルの移動に失敗しました: {}", error));
            }
            fs::remove_file(source).map_err(|remove_error| {
                format!(
                    "リネーム失敗: {}; コピー後の元ファイル削除にも失敗しました: {}",
                    rename_error, remove_error
                )
            })
        }
    }
}

/// Recoverable delete capability: the file goes to the system trash,
/// never a permanent erase.
pub fn recoverable_delete(path: &Path) -> Result<(), String> {
    trash::delete(path).map_err(|e| format!("ゴミ箱への移動に失敗しました: {}", e))
}

fn temp_path_for(destination: &Path) -> PathBuf {
    let mut temp = destination.to_path_buf();
    let ext = destination
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("");
    let suffix = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let temp_ext = if ext.is_empty() {
        format!("tmpmove_{}", suffix)
    } else {
        format!("{}.tmpmove_{}", ext, suffix)
    };
    temp.set_extension(temp_ext);
    temp
}
