//! pcm-recorder - マイク録音と再生のシンプルなユーティリティ
//!
//! マイク入力を無圧縮のPCMファイルに録音し、そのファイルを進捗を通知しながら再生する。
//!
//! # 主な機能
//!
//! - **録音ループ**: 入力デバイスから固定サイズのバッファを読み込みファイルへ追記
//! - **再生ループ**: ファイルを読み込み出力デバイスへ書き込み、チャンク毎に進捗を通知
//! - **セッション管理**: 録音と再生が同時に動かないよう状態を管理
//! - **TUI**: キー操作で録音・再生を切り替え
//!
//! # アーキテクチャ
//!
//! ```text
//!                    [SessionController]
//!                     │               │
//!              start_capture     start_playback
//!                     ↓               ↓
//! [AudioInput] → [Capture Loop]  [Playback Loop] → [AudioOutput]
//!                     │               ↑
//!                     ↓               │
//!                   [audio_record.pcm]
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use pcm_recorder::config::Config;
//! use pcm_recorder::device::CpalBackend;
//! use pcm_recorder::session::{MicrophoneAccess, SessionController};
//! use std::sync::Arc;
//!
//! let config = Config::load_or_default("config.toml").unwrap();
//! let backend = Arc::new(CpalBackend::default());
//! let format = config.audio.format(backend.as_ref());
//!
//! let mut session = SessionController::new(
//!     backend,
//!     format,
//!     config.output.recording_path,
//!     MicrophoneAccess::Granted,
//! );
//! session.toggle_recording().unwrap(); // 録音開始
//! session.toggle_recording().unwrap(); // 停止して保存
//! session.play(|progress: f32| println!("{:.0}%", progress * 100.0)).unwrap();
//! ```

pub mod audio_input;
pub mod audio_output;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod playback;
pub mod session;
pub mod tui;
pub mod types;
mod worker;

#[cfg(test)]
mod mock_device;

pub use error::AudioError;
pub use worker::CancelToken;
