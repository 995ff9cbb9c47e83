use anyhow::{bail, Context, Result};
use env_logger::{Env, Target};
use pcm_recorder::audio_input::AudioInput;
use pcm_recorder::audio_output::AudioOutput;
use pcm_recorder::config::{Config, ConfigSource};
use pcm_recorder::device::CpalBackend;
use pcm_recorder::session::{PlayRequest, RecordingToggle, SessionController};
use pcm_recorder::tui::TuiApp;
use std::fs::{self, File};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

/// 実行モード
enum Mode {
    Interactive,
    Record,
    Play,
}

fn main() -> Result<()> {
    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // デバイス一覧表示モード
    if args.len() > 1 && args[1] == "--show-interfaces" {
        AudioInput::list_devices()?;
        println!();
        AudioOutput::list_devices()?;
        return Ok(());
    }

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    let (mode, config_arg) = match args.get(1).map(String::as_str) {
        Some("--record") => (Mode::Record, args.get(2)),
        Some("--play") => (Mode::Play, args.get(2)),
        Some(arg) if arg.starts_with("--") => bail!("不明なオプション: {}", arg),
        _ => (Mode::Interactive, args.get(1)),
    };
    let config_path = config_arg.map(String::as_str).unwrap_or("config.toml");

    // 設定を読み込み
    let (config, source) = Config::load_with_source(config_path)?;
    init_logger(&config, matches!(mode, Mode::Interactive))?;

    log::info!("pcm-recorder を起動します");
    if source == ConfigSource::Default {
        log::warn!(
            "設定ファイルが見つかりません。デフォルト設定を使用します: {}",
            config_path
        );
    }
    log::debug!("設定: {:?}", config);

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let session = build_session(&config);

    match mode {
        Mode::Interactive => TuiApp::new(session, running).run()?,
        Mode::Record => record(session, &running)?,
        Mode::Play => play(session, &running)?,
    }

    log::info!("pcm-recorder を終了しました");

    Ok(())
}

/// ロガーを初期化（TUI表示中はファイルへ出力）
fn init_logger(config: &Config, to_file: bool) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(config.output.log_level.as_str()));
    builder.format_timestamp(None);

    if to_file {
        let log_path = config.output.log_file_path();
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("ログディレクトリの作成に失敗: {:?}", parent))?;
        }
        let file = File::create(&log_path)
            .with_context(|| format!("ログファイルの作成に失敗: {:?}", log_path))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn build_session(config: &Config) -> SessionController {
    let backend = Arc::new(CpalBackend::new(
        config.audio.input_device.clone(),
        config.audio.output_device.clone(),
    ));
    let format = config.audio.format(backend.as_ref());

    SessionController::new(
        backend,
        format,
        config.output.recording_path.clone(),
        config.audio.microphone_access.into(),
    )
}

/// Ctrl+C まで録音して保存
fn record(mut session: SessionController, running: &AtomicBool) -> Result<()> {
    if session.toggle_recording()? != RecordingToggle::Started {
        bail!("録音を開始できませんでした");
    }
    println!("録音中... (Ctrl+C で停止)");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
        session.poll();
        if !session.status().is_recording {
            break;
        }
    }

    let status = session.status();
    if !status.is_recording {
        // 停止要求の前にループが終了した
        bail!(
            "録音が中断されました: {}",
            status.last_error.unwrap_or_default()
        );
    }

    if let RecordingToggle::Saved(report) = session.toggle_recording()? {
        println!(
            "Audio saved at: {} ({} バイト, {:.1} 秒)",
            session.file_path().display(),
            report.bytes_written,
            session
                .format()
                .duration_of(report.bytes_written as usize)
                .as_secs_f32()
        );
        if report.tolerated_read_errors > 0 {
            log::warn!("読み込みエラーを {} 回スキップしました", report.tolerated_read_errors);
        }
    }

    Ok(())
}

/// 保存済みの録音を再生（Ctrl+C で中断）
fn play(mut session: SessionController, running: &AtomicBool) -> Result<()> {
    let request = session.play(|progress: f32| {
        log::info!("再生進捗: {:.0}%", progress * 100.0);
    })?;
    if request != PlayRequest::Started {
        bail!("再生を開始できませんでした");
    }
    println!("再生中: {} (Ctrl+C で停止)", session.file_path().display());

    while running.load(Ordering::SeqCst) && session.status().is_playing {
        thread::sleep(Duration::from_millis(100));
    }

    let report = if running.load(Ordering::SeqCst) {
        session.wait_playback()?
    } else {
        session.stop_playback()?
    };

    if let Some(report) = report {
        println!(
            "再生終了: {:?} ({} / {} バイト)",
            report.outcome, report.bytes_played, report.total_bytes
        );
    }

    Ok(())
}
