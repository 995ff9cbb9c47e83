use crate::device::{AudioBackend, CaptureDevice};
use crate::error::AudioError;
use crate::types::{AudioFormatConfig, CaptureReport};
use crate::worker::{spawn_worker, CancelToken, WorkerHandle};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 実行中の録音ループのハンドル
pub struct CaptureHandle {
    token: CancelToken,
    worker: WorkerHandle<Result<CaptureReport, AudioError>>,
    path: PathBuf,
}

impl CaptureHandle {
    /// 録音を停止してループの終了を待つ
    ///
    /// 戻った時点でファイルは閉じられ、デバイスは解放されている。
    pub fn stop(self) -> Result<CaptureReport, AudioError> {
        self.token.cancel();
        let report = self.worker.join()??;

        log::info!(
            "録音を保存しました: {:?} ({} バイト, {} バッファ)",
            self.path,
            report.bytes_written,
            report.buffers_written
        );

        Ok(report)
    }

    /// ループが終了しているか（書き込みエラーで先に終わった場合など）
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

/// 録音ループを開始
///
/// 入力デバイスを開いてから `path` を作成（既存ファイルは切り詰め）し、
/// キャンセルされるまで1バッファずつ読み込んでファイルへ追記する。
///
/// デバイスまたはファイルのオープンに失敗した場合はループを開始せずにエラーを返す。
pub fn start_capture(
    backend: Arc<dyn AudioBackend>,
    format: AudioFormatConfig,
    path: &Path,
) -> Result<CaptureHandle, AudioError> {
    let token = CancelToken::new();
    let file_path = path.to_path_buf();

    let init_path = file_path.clone();
    let init = move || -> Result<(Box<dyn CaptureDevice>, BufWriter<File>), AudioError> {
        let device = backend.open_input(&format)?;
        let writer = create_output_file(&init_path)?;
        Ok((device, writer))
    };

    let loop_token = token.clone();
    let run = move |(mut device, mut writer): (Box<dyn CaptureDevice>, BufWriter<File>)|
          -> Result<CaptureReport, AudioError> {
        let result = run_capture_loop(device.as_mut(), &mut writer, &format, &loop_token);

        // 終了時はファイルを閉じてからデバイスを解放する
        let flushed = writer
            .flush()
            .map_err(|e| AudioError::storage("録音ファイルのフラッシュに失敗", e));
        drop(writer);
        drop(device);
        log::debug!("録音デバイスを解放しました");

        let report = result?;
        flushed?;
        Ok(report)
    };

    let worker = spawn_worker("capture", init, run)?;

    log::info!("録音を開始しました: {:?}", file_path);

    Ok(CaptureHandle {
        token,
        worker,
        path: file_path,
    })
}

/// 録音ファイルを作成（既存の内容は破棄）
fn create_output_file(path: &Path) -> Result<BufWriter<File>, AudioError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| AudioError::storage("出力ディレクトリの作成に失敗", e))?;
        }
    }

    let file = File::create(path).map_err(|e| AudioError::storage("録音ファイルの作成に失敗", e))?;
    Ok(BufWriter::new(file))
}

/// 録音ループ本体
///
/// 読み込みエラーは「そのバッファはデータなし」として扱いループを継続する。
/// 既に書き込んだ内容には影響しない。ファイルへの書き込み失敗はループを終了させる。
pub fn run_capture_loop<W: Write>(
    device: &mut dyn CaptureDevice,
    writer: &mut W,
    format: &AudioFormatConfig,
    token: &CancelToken,
) -> Result<CaptureReport, AudioError> {
    let mut buffer = format.allocate_buffer();
    let mut report = CaptureReport::default();

    while !token.is_cancelled() {
        match device.read(&mut buffer) {
            Ok(0) => {}
            Ok(read_size) => {
                let read_size = read_size.min(buffer.len());
                writer
                    .write_all(&buffer[..read_size])
                    .map_err(|e| AudioError::storage("録音ファイルへの書き込みに失敗", e))?;
                report.bytes_written += read_size as u64;
                report.buffers_written += 1;
                log::trace!("録音データ書き込み: {} バイト", read_size);
            }
            Err(e) => {
                report.tolerated_read_errors += 1;
                log::warn!("録音デバイスの読み込みに失敗 (スキップ): {}", e);
            }
        }
    }

    Ok(report)
}
