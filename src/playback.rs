use crate::device::{AudioBackend, PlaybackDevice};
use crate::error::AudioError;
use crate::types::{AudioFormatConfig, PlaybackOutcome, PlaybackReport};
use crate::worker::{spawn_worker, CancelToken, WorkerHandle};
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;

/// 再生の進捗を受け取るオブザーバー
///
/// 再生ワーカーのスレッドから呼ばれる。
pub trait PlaybackObserver: Send {
    /// 進捗 (0.0 ~ 1.0) を通知
    ///
    /// 値は単調増加し、正常に最後まで再生した場合に限り最後に 1.0 がちょうど1回届く。
    fn on_progress(&mut self, progress: f32);

    /// 再生が終了した（完了・中断・キャンセルのいずれも）
    fn on_finished(&mut self, _report: &PlaybackReport) {}
}

impl<F> PlaybackObserver for F
where
    F: FnMut(f32) + Send,
{
    fn on_progress(&mut self, progress: f32) {
        self(progress)
    }
}

/// 実行中の再生ループのハンドル
pub struct PlaybackHandle {
    token: CancelToken,
    worker: WorkerHandle<PlaybackReport>,
}

impl PlaybackHandle {
    /// 再生を中断して終了を待つ
    pub fn stop(self) -> Result<PlaybackReport, AudioError> {
        self.token.cancel();
        self.worker.join()
    }

    /// 再生が終わるまで待つ
    pub fn wait(self) -> Result<PlaybackReport, AudioError> {
        self.worker.join()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

/// 録音ファイルの再生を開始
///
/// ファイルが存在しない・空の場合は `FileNotFound` を返し、
/// 出力デバイスは開かず進捗も一切通知しない。
pub fn start_playback(
    backend: Arc<dyn AudioBackend>,
    format: AudioFormatConfig,
    path: &Path,
    observer: impl PlaybackObserver + 'static,
) -> Result<PlaybackHandle, AudioError> {
    let total_size = match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
        _ => return Err(AudioError::FileNotFound(path.to_path_buf())),
    };

    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => AudioError::FileNotFound(path.to_path_buf()),
        _ => AudioError::storage("録音ファイルのオープンに失敗", e),
    })?;

    log::info!("再生を開始します: {:?} ({} バイト)", path, total_size);

    let token = CancelToken::new();
    let loop_token = token.clone();
    let mut observer: Box<dyn PlaybackObserver> = Box::new(observer);

    let init = move || backend.open_output(&format);
    let run = move |mut device: Box<dyn PlaybackDevice>| {
        let report = run_playback_loop(
            device.as_mut(),
            file,
            total_size,
            &format,
            &loop_token,
            observer.as_mut(),
        );
        drop(device);
        log::debug!("再生デバイスを解放しました");

        observer.on_finished(&report);
        report
    };

    let worker = spawn_worker("playback", init, run)?;

    Ok(PlaybackHandle { token, worker })
}

/// 再生ループ本体
///
/// 正常終了時はファイルを閉じ、デバイスの出力完了を待ってから 1.0 を通知する。
fn run_playback_loop<R: Read>(
    device: &mut dyn PlaybackDevice,
    mut reader: R,
    total_size: u64,
    format: &AudioFormatConfig,
    token: &CancelToken,
    observer: &mut dyn PlaybackObserver,
) -> PlaybackReport {
    let mut buffer = format.allocate_buffer();
    let mut total_read: u64 = 0;

    let outcome = loop {
        if token.is_cancelled() {
            log::info!("再生を中断しました ({} / {} バイト)", total_read, total_size);
            break PlaybackOutcome::Cancelled;
        }

        let read_size = match read_full(&mut reader, &mut buffer) {
            Ok(0) => break PlaybackOutcome::Completed,
            Ok(n) => n,
            Err(e) => {
                let err = AudioError::storage("録音ファイルの読み込みに失敗", e);
                log::error!("{}", err);
                break PlaybackOutcome::Aborted(err.to_string());
            }
        };

        if let Err(e) = device.write(&buffer[..read_size]) {
            log::error!("再生デバイスへの書き込みに失敗: {}", e);
            break PlaybackOutcome::Aborted(e.to_string());
        }

        total_read += read_size as u64;
        // 1.0 は出力完了後に1回だけ通知する
        if total_read < total_size {
            observer.on_progress(progress_fraction(total_read, total_size));
        }
    };

    drop(reader);

    if outcome == PlaybackOutcome::Completed {
        device.drain();
        observer.on_progress(1.0);
        log::info!("再生が完了しました ({} バイト)", total_read);
    }

    PlaybackReport {
        bytes_played: total_read,
        total_bytes: total_size,
        outcome,
    }
}

/// 再生途中の進捗（1.0 未満に丸める）
///
/// f32 では大きなファイルの末尾付近が 1.0 に丸められてしまうため f64 で計算する。
fn progress_fraction(total_read: u64, total_size: u64) -> f32 {
    let ratio = total_read as f64 / total_size.max(1) as f64;
    (ratio as f32).min(1.0 - f32::EPSILON)
}

/// バッファが埋まるかEOFに達するまで読み込む
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_device::MockBackend;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_format() -> AudioFormatConfig {
        AudioFormatConfig::new(16000).with_min_buffer_size(4096)
    }

    fn write_recording(dir: &TempDir, len: usize) -> PathBuf {
        let path = dir.path().join("audio_record.pcm");
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        fs::write(&path, data).unwrap();
        path
    }

    fn progress_recorder() -> (Arc<Mutex<Vec<f32>>>, impl FnMut(f32) + Send + 'static) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = values.clone();
        (values, move |p: f32| sink.lock().push(p))
    }

    #[test]
    fn test_playback_three_buffers() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_recording(&temp_dir, 12288);
        let backend = MockBackend::new();
        let (progress, observer) = progress_recorder();

        let handle = start_playback(Arc::new(backend.clone()), test_format(), &path, observer).unwrap();
        let report = handle.wait().unwrap();

        assert!(report.is_completed());
        assert_eq!(report.bytes_played, 12288);
        assert_eq!(backend.write_count(), 3);
        assert_eq!(backend.written_bytes(), fs::read(&path).unwrap());
        assert_eq!(backend.outputs_released(), 1);

        let values = progress.lock().clone();
        assert_eq!(values.len(), 3);
        assert!((values[0] - 1.0 / 3.0).abs() < 1e-6);
        assert!((values[1] - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(values[2], 1.0);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_partial_last_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_recording(&temp_dir, 5000);
        let backend = MockBackend::new();
        let (progress, observer) = progress_recorder();

        let report = start_playback(Arc::new(backend.clone()), test_format(), &path, observer)
            .unwrap()
            .wait()
            .unwrap();

        assert!(report.is_completed());
        assert_eq!(backend.written_bytes().len(), 5000);
        assert_eq!(progress.lock().iter().filter(|&&p| p == 1.0).count(), 1);
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("audio_record.pcm");
        let backend = MockBackend::new();
        let (progress, observer) = progress_recorder();

        let result = start_playback(Arc::new(backend.clone()), test_format(), &path, observer);

        assert!(matches!(result, Err(AudioError::FileNotFound(p)) if p == path));
        assert!(progress.lock().is_empty());
        assert_eq!(backend.outputs_opened(), 0);
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_recording(&temp_dir, 0);
        let backend = MockBackend::new();
        let (progress, observer) = progress_recorder();

        let result = start_playback(Arc::new(backend.clone()), test_format(), &path, observer);

        assert!(matches!(result, Err(AudioError::FileNotFound(_))));
        assert!(progress.lock().is_empty());
        assert_eq!(backend.outputs_opened(), 0);
    }

    #[test]
    fn test_write_error_aborts_without_completion() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_recording(&temp_dir, 12288);
        let backend = MockBackend::new().fail_output_write_at(1);
        let (progress, observer) = progress_recorder();

        let report = start_playback(Arc::new(backend.clone()), test_format(), &path, observer)
            .unwrap()
            .wait()
            .unwrap();

        assert!(matches!(report.outcome, PlaybackOutcome::Aborted(_)));
        assert_eq!(report.bytes_played, 4096);
        assert_eq!(progress.lock().len(), 1);
        assert!(!progress.lock().contains(&1.0));
        assert_eq!(backend.outputs_released(), 1);
    }

    #[test]
    fn test_stop_cancels_playback() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_recording(&temp_dir, 4096 * 50);
        let backend = MockBackend::new().with_write_delay(Duration::from_millis(5));
        let (progress, observer) = progress_recorder();

        let handle = start_playback(Arc::new(backend.clone()), test_format(), &path, observer).unwrap();
        while backend.write_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let report = handle.stop().unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::Cancelled);
        assert!(report.bytes_played < report.total_bytes);
        assert!(!progress.lock().contains(&1.0));
        assert_eq!(backend.outputs_released(), 1);
    }

    #[test]
    fn test_output_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_recording(&temp_dir, 4096);
        let backend = MockBackend::new().output_unavailable();
        let (progress, observer) = progress_recorder();

        let result = start_playback(Arc::new(backend), test_format(), &path, observer);

        assert!(matches!(result, Err(AudioError::DeviceUnavailable(_))));
        assert!(progress.lock().is_empty());
    }

    #[test]
    fn test_on_finished_receives_report() {
        struct Recorder(Arc<Mutex<Option<PlaybackReport>>>);

        impl PlaybackObserver for Recorder {
            fn on_progress(&mut self, _progress: f32) {}

            fn on_finished(&mut self, report: &PlaybackReport) {
                *self.0.lock() = Some(report.clone());
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let path = write_recording(&temp_dir, 8192);
        let finished = Arc::new(Mutex::new(None));

        start_playback(
            Arc::new(MockBackend::new()),
            test_format(),
            &path,
            Recorder(finished.clone()),
        )
        .unwrap()
        .wait()
        .unwrap();

        let report = finished.lock().clone().unwrap();
        assert!(report.is_completed());
        assert_eq!(report.total_bytes, 8192);
    }

    /// 書き込みを捨てるだけの出力デバイス
    struct NullDevice;

    impl PlaybackDevice for NullDevice {
        fn write(&mut self, _data: &[u8]) -> Result<(), AudioError> {
            Ok(())
        }
    }

    #[test]
    fn test_large_file_emits_single_completion() {
        // 2^25 バイト読んだ時点の比率は f32 では 1.0 に丸められる
        let total_size: u64 = (1 << 25) + 2;
        let format = AudioFormatConfig::new(16000).with_min_buffer_size(1 << 20);
        let reader = std::io::repeat(0).take(total_size);
        let mut values = Vec::new();
        let mut observer = |p: f32| values.push(p);

        let report = run_playback_loop(
            &mut NullDevice,
            reader,
            total_size,
            &format,
            &CancelToken::new(),
            &mut observer,
        );

        assert!(report.is_completed());
        assert_eq!(report.bytes_played, total_size);
        assert_eq!(values.len(), 33);
        assert_eq!(values.iter().filter(|&&p| p == 1.0).count(), 1);
        assert_eq!(values.last(), Some(&1.0));
        assert!(values[..values.len() - 1].iter().all(|&p| p < 1.0));
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_progress_fraction_stays_below_one() {
        assert_eq!(progress_fraction(0, 100), 0.0);
        assert_eq!(progress_fraction(50, 100), 0.5);
        assert!(progress_fraction(100_000_000, 100_000_002) < 1.0);
        assert!(progress_fraction(1 << 25, (1 << 25) + 2) < 1.0);
    }

    #[test]
    fn test_read_full_short_reader() {
        let data = vec![7u8; 10];
        let mut buf = vec![0u8; 4];
        let mut reader = &data[..];

        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }
}
