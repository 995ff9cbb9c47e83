//! 録音・再生セッションの状態管理
//!
//! どちらのループを動かしてよいかを判断し、録音と再生が同時に動かないことを保証する。
//! 共有状態のロックはI/Oの間は保持しない。

use crate::capture::{start_capture, CaptureHandle};
use crate::device::AudioBackend;
use crate::error::AudioError;
use crate::playback::{start_playback, PlaybackHandle, PlaybackObserver};
use crate::types::{AudioFormatConfig, CaptureReport, PlaybackOutcome, PlaybackReport, SessionStatus};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// マイクへのアクセス権
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MicrophoneAccess {
    Granted,
    Denied,
}

impl From<bool> for MicrophoneAccess {
    fn from(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }
}

/// `toggle_recording` の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingToggle {
    /// 録音を開始した
    Started,
    /// 録音を停止して保存した
    Saved(CaptureReport),
    /// 再生中のため何もしなかった
    Rejected,
}

/// `play` の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayRequest {
    Started,
    /// 録音中または再生中のため何もしなかった
    Rejected,
}

/// コントローラーが所有するセッション状態
#[derive(Debug)]
struct RecordingSession {
    recording_active: bool,
    playback_active: bool,
    has_saved_audio: bool,
    file_path: PathBuf,
    progress: f32,
    last_playback: Option<PlaybackOutcome>,
    last_error: Option<String>,
}

impl RecordingSession {
    fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            is_recording: self.recording_active,
            is_playing: self.playback_active,
            has_saved_audio: self.has_saved_audio,
            progress: self.progress,
            file_path: self.file_path.clone(),
            last_playback: self.last_playback.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// 録音・再生のセッションコントローラー
///
/// UI層はこの型だけを操作する。状態は `status()` のスナップショットで観測する。
pub struct SessionController {
    backend: Arc<dyn AudioBackend>,
    format: AudioFormatConfig,
    microphone: MicrophoneAccess,
    session: Arc<Mutex<RecordingSession>>,
    capture: Option<CaptureHandle>,
    playback: Option<PlaybackHandle>,
}

impl SessionController {
    /// コントローラーを作成
    ///
    /// `file_path` に空でない録音ファイルが既にあれば、保存済みとして扱う。
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        format: AudioFormatConfig,
        file_path: impl Into<PathBuf>,
        microphone: MicrophoneAccess,
    ) -> Self {
        let file_path = file_path.into();
        let has_saved_audio = has_recording(&file_path);
        if has_saved_audio {
            log::info!("既存の録音ファイルを検出しました: {:?}", file_path);
        }

        Self {
            backend,
            format,
            microphone,
            session: Arc::new(Mutex::new(RecordingSession {
                recording_active: false,
                playback_active: false,
                has_saved_audio,
                file_path,
                progress: 0.0,
                last_playback: None,
                last_error: None,
            })),
            capture: None,
            playback: None,
        }
    }

    /// 録音の開始・停止を切り替える
    ///
    /// 停止時は録音ループの終了を待ってから保存済みにする。
    /// 再生中は `Rejected` を返して何もしない。
    pub fn toggle_recording(&mut self) -> Result<RecordingToggle, AudioError> {
        self.reap_playback();

        if let Some(capture) = self.capture.take() {
            return self.finish_capture(capture);
        }

        let (path, previously_saved) = {
            let mut session = self.session.lock();
            if session.playback_active {
                log::warn!("再生中は録音を開始できません");
                return Ok(RecordingToggle::Rejected);
            }
            if self.microphone == MicrophoneAccess::Denied {
                return Err(AudioError::PermissionDenied);
            }

            let previously_saved = session.has_saved_audio;
            session.recording_active = true;
            session.has_saved_audio = false;
            session.progress = 0.0;
            session.last_error = None;
            (session.file_path.clone(), previously_saved)
        };

        match start_capture(self.backend.clone(), self.format, &path) {
            Ok(handle) => {
                self.capture = Some(handle);
                Ok(RecordingToggle::Started)
            }
            Err(e) => {
                log::error!("録音を開始できません: {}", e);
                let mut session = self.session.lock();
                session.recording_active = false;
                session.has_saved_audio = previously_saved;
                Err(e)
            }
        }
    }

    fn finish_capture(&mut self, capture: CaptureHandle) -> Result<RecordingToggle, AudioError> {
        let result = capture.stop();

        let mut session = self.session.lock();
        session.recording_active = false;
        match result {
            Ok(report) => {
                session.has_saved_audio = true;
                Ok(RecordingToggle::Saved(report))
            }
            Err(e) => {
                log::error!("録音が異常終了しました: {}", e);
                session.has_saved_audio = false;
                session.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// 保存済みの録音を再生する
    ///
    /// 録音中・再生中は `Rejected` を返して何もしない。
    /// 保存済みの録音がない場合は `FileNotFound` を返し、状態は変わらない。
    pub fn play(
        &mut self,
        observer: impl PlaybackObserver + 'static,
    ) -> Result<PlayRequest, AudioError> {
        self.reap_playback();

        let (path, previous_progress, previous_outcome) = {
            let mut session = self.session.lock();
            if session.recording_active || session.playback_active {
                log::warn!("録音中または再生中のため再生要求を無視しました");
                return Ok(PlayRequest::Rejected);
            }
            if !session.has_saved_audio {
                return Err(AudioError::FileNotFound(session.file_path.clone()));
            }

            let previous = (session.progress, session.last_playback.take());
            session.playback_active = true;
            session.progress = 0.0;
            (session.file_path.clone(), previous.0, previous.1)
        };

        let observer = SessionObserver {
            session: self.session.clone(),
            inner: Box::new(observer),
        };

        match start_playback(self.backend.clone(), self.format, &path, observer) {
            Ok(handle) => {
                self.playback = Some(handle);
                Ok(PlayRequest::Started)
            }
            Err(e) => {
                log::error!("再生を開始できません: {}", e);
                let mut session = self.session.lock();
                session.playback_active = false;
                session.progress = previous_progress;
                session.last_playback = previous_outcome;
                Err(e)
            }
        }
    }

    /// 再生を中断して終了を待つ（再生中でなければ `None`）
    pub fn stop_playback(&mut self) -> Result<Option<PlaybackReport>, AudioError> {
        match self.playback.take() {
            Some(handle) => {
                let result = handle.stop();
                self.settle_playback(result).map(Some)
            }
            None => Ok(None),
        }
    }

    /// 再生が終わるまで待つ（再生中でなければ `None`）
    pub fn wait_playback(&mut self) -> Result<Option<PlaybackReport>, AudioError> {
        match self.playback.take() {
            Some(handle) => {
                let result = handle.wait();
                self.settle_playback(result).map(Some)
            }
            None => Ok(None),
        }
    }

    /// 終了済みのワーカーを回収する
    ///
    /// 書き込みエラーで録音ループが先に終わった場合もここで状態に反映される。
    pub fn poll(&mut self) {
        self.reap_playback();

        if self.capture.as_ref().is_some_and(|c| c.is_finished()) {
            if let Some(capture) = self.capture.take() {
                // エラーは last_error に記録済み
                let _ = self.finish_capture(capture);
            }
        }
    }

    /// 現在の状態のスナップショット
    pub fn status(&self) -> SessionStatus {
        self.session.lock().snapshot()
    }

    pub fn set_microphone_access(&mut self, access: MicrophoneAccess) {
        self.microphone = access;
    }

    pub fn format(&self) -> &AudioFormatConfig {
        &self.format
    }

    pub fn file_path(&self) -> PathBuf {
        self.session.lock().file_path.clone()
    }

    fn reap_playback(&mut self) {
        if self.playback.as_ref().is_some_and(|p| p.is_finished()) {
            if let Some(handle) = self.playback.take() {
                let result = handle.wait();
                let _ = self.settle_playback(result);
            }
        }
    }

    /// ワーカーが異常終了した場合でも再生中フラグを落とす
    fn settle_playback(
        &self,
        result: Result<PlaybackReport, AudioError>,
    ) -> Result<PlaybackReport, AudioError> {
        if let Err(e) = &result {
            log::error!("再生ワーカーが異常終了しました: {}", e);
            let mut session = self.session.lock();
            session.playback_active = false;
            session.last_error = Some(e.to_string());
        }
        result
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.take() {
            if let Err(e) = capture.stop() {
                log::warn!("終了時の録音停止に失敗: {}", e);
            }
        }
        if let Some(playback) = self.playback.take() {
            if let Err(e) = playback.stop() {
                log::warn!("終了時の再生停止に失敗: {}", e);
            }
        }
    }
}

/// 再生の進捗と終了をセッション状態へ反映するオブザーバー
struct SessionObserver {
    session: Arc<Mutex<RecordingSession>>,
    inner: Box<dyn PlaybackObserver>,
}

impl PlaybackObserver for SessionObserver {
    fn on_progress(&mut self, progress: f32) {
        self.session.lock().progress = progress;
        self.inner.on_progress(progress);
    }

    fn on_finished(&mut self, report: &PlaybackReport) {
        {
            let mut session = self.session.lock();
            session.playback_active = false;
            session.last_playback = Some(report.outcome.clone());
            if let PlaybackOutcome::Aborted(msg) = &report.outcome {
                session.last_error = Some(msg.clone());
            }
        }
        self.inner.on_finished(report);
    }
}

fn has_recording(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
