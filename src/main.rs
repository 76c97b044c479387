use clap::Parser;
use media_bulk_rename::pipeline::{process_folder, RunRequest};
use media_bulk_rename::settings::load_settings;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// 写真・動画フォルダの一括変換＆リネームツール
#[derive(Debug, Parser)]
#[command(name = "media-bulk-rename", version)]
struct Cli {
    /// 処理対象のフォルダ
    #[arg(long, default_value = ".")]
    folder: PathBuf,

    /// 変更をディスクに適用する（未指定ならドライラン）
    #[arg(short, long)]
    commit: bool,

    /// .heic / .mov の変換を行わない
    #[arg(long)]
    no_convert: bool,

    /// サブフォルダも処理対象に含める
    #[arg(long)]
    include_subfolders: bool,

    /// 設定ファイル（JSON）のパス
    #[arg(long)]
    settings: Option<PathBuf>,

    /// ログ出力を増やす（-v: debug, -vv: trace）
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = setup_logging(cli.verbose);

    let settings = match load_settings(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            error!("{}", error);
            return ExitCode::from(2);
        }
    };

    let request = RunRequest {
        folder: cli.folder,
        commit: cli.commit,
        include_subfolders: cli.include_subfolders,
        no_convert: cli.no_convert,
    };

    match process_folder(&request, &settings) {
        // Per-file hard failures surface through the exit code so scripts
        // can detect them without parsing log text.
        Ok(report) if report.stats.has_hard_failures() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{}", error);
            ExitCode::from(2)
        }
    }
}

fn setup_logging(verbosity: u8) -> tracing_appender::non_blocking::WorkerGuard {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let file_appender = tracing_appender::rolling::daily(".", "media-bulk-rename.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false),
        )
        .init();
    guard
}
