use crate::device::CaptureDevice;
use crate::error::AudioError;
use crate::types::{AudioFormatConfig, SampleI16, MIN_BUFFER_FLOOR_BYTES};
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// コールバックから受け取るチャンクのキュー長
const CHUNK_QUEUE_LEN: usize = 256;

/// オーディオデバイスからのモノラル音声入力
///
/// cpal のコールバックで受け取ったサンプルをキューに積み、
/// `read` でバッファ単位のブロッキング読み込みとして取り出す。
pub struct AudioInput {
    stream: Option<cpal::Stream>,
    chunk_rx: Receiver<Vec<SampleI16>>,
    pending: VecDeque<u8>,
    stream_error: Arc<Mutex<Option<String>>>,
    frame_size: usize,
    read_timeout: Duration,
}

impl AudioInput {
    /// 入力ストリームを開いて開始
    pub fn open(device_id: &str, format: &AudioFormatConfig) -> Result<Self, AudioError> {
        let device = Self::find_device(device_id)?;

        log::info!(
            "入力デバイス: {}",
            device.name().unwrap_or_else(|_| "不明なデバイス".to_string())
        );

        // サンプルフォーマットはデバイスのデフォルトに合わせる
        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceUnavailable(format!("デフォルト入力設定が取得できません: {}", e)))?;

        log::debug!(
            "デバイス設定: {:?}, {}Hz, {}ch",
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );

        let stream_config = cpal::StreamConfig {
            channels: format.channels(),
            sample_rate: cpal::SampleRate(format.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(CHUNK_QUEUE_LEN);
        let stream_error = Arc::new(Mutex::new(None));

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &stream_config, chunk_tx, stream_error.clone())?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &stream_config, chunk_tx, stream_error.clone())?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &stream_config, chunk_tx, stream_error.clone())?
            }
            cpal::SampleFormat::I32 => {
                Self::build_stream::<i32>(&device, &stream_config, chunk_tx, stream_error.clone())?
            }
            other => {
                return Err(AudioError::DeviceUnavailable(format!(
                    "サポートされていないサンプルフォーマット: {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(format!("ストリームの開始に失敗: {}", e)))?;

        log::info!(
            "音声入力ストリームを開始しました ({}Hz, {}ch)",
            format.sample_rate(),
            format.channels()
        );

        Ok(Self {
            stream: Some(stream),
            chunk_rx,
            pending: VecDeque::with_capacity(format.min_buffer_size() * 2),
            stream_error,
            frame_size: format.frame_size(),
            read_timeout: (format.buffer_duration() * 2).max(Duration::from_millis(50)),
        })
    }

    /// ストリームを構築
    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        chunk_tx: Sender<Vec<SampleI16>>,
        stream_error: Arc<Mutex<Option<String>>>,
    ) -> Result<cpal::Stream, AudioError>
    where
        T: SizedSample + Send + 'static,
        SampleI16: FromSample<T>,
    {
        let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
            let samples: Vec<SampleI16> = data.iter().map(|&s| s.to_sample::<SampleI16>()).collect();

            // コールバック内ではブロックしない
            match chunk_tx.try_send(samples) {
                Ok(_) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!("入力キューが満杯のためチャンクを破棄しました");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        };

        let error_callback = move |err: cpal::StreamError| {
            log::error!("入力ストリームエラー: {}", err);
            *stream_error.lock() = Some(err.to_string());
        };

        device
            .build_input_stream(config, data_callback, error_callback, None)
            .map_err(|e| AudioError::DeviceUnavailable(format!("入力ストリームの構築に失敗: {}", e)))
    }

    /// ストリームを停止
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("音声入力ストリームを停止しました");
        }
    }

    /// デバイスが報告する最小バッファサイズ（バイト）を取得
    ///
    /// 取得できない場合は `None`。
    pub fn query_min_buffer_size(device_id: &str, format: &AudioFormatConfig) -> Option<usize> {
        let device = Self::find_device(device_id).ok()?;
        let sample_rate = format.sample_rate();

        let range = device.supported_input_configs().ok()?.find(|range| {
            range.channels() == format.channels()
                && range.min_sample_rate().0 <= sample_rate
                && range.max_sample_rate().0 >= sample_rate
        })?;

        match range.buffer_size() {
            cpal::SupportedBufferSize::Range { min, .. } => {
                let bytes = (*min as usize * format.frame_size()).max(MIN_BUFFER_FLOOR_BYTES);
                Some(format.align_to_frame(bytes))
            }
            cpal::SupportedBufferSize::Unknown => None,
        }
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        let host = cpal::default_host();
        println!("利用可能な入力デバイス:");
        println!();

        for (idx, device) in host.input_devices()?.enumerate() {
            let name = device.name()?;
            println!("  [{}] {}", idx, name);

            device.supported_input_configs()?.for_each(|config_range| {
                println!(
                    "      フォーマット: {:?}, {}-{}Hz, {}ch",
                    config_range.sample_format(),
                    config_range.min_sample_rate().0,
                    config_range.max_sample_rate().0,
                    config_range.channels()
                );
            });
            println!();
        }

        Ok(())
    }

    /// デバイス名から入力デバイスを取得（"default" でデフォルトデバイス）
    fn find_device(device_id: &str) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();

        if device_id == "default" {
            return host
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceUnavailable("デフォルト入力デバイスが見つかりません".to_string()));
        }

        host.input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(format!("デバイス一覧の取得に失敗: {}", e)))?
            .find(|d| d.name().ok().as_deref() == Some(device_id))
            .ok_or_else(|| AudioError::DeviceUnavailable(format!("デバイスが見つかりません: {}", device_id)))
    }
}

impl CaptureDevice for AudioInput {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        if let Some(err) = self.stream_error.lock().take() {
            return Err(AudioError::DeviceIoError(err));
        }

        let deadline = Instant::now() + self.read_timeout;
        fill_pending(&mut self.pending, &self.chunk_rx, buf.len(), deadline)?;

        Ok(take_frames(&mut self.pending, buf, self.frame_size))
    }
}

/// `want` バイトそろうまでチャンクを受け取る
///
/// 期限を過ぎた場合はそろった分だけで戻る。
fn fill_pending(
    pending: &mut VecDeque<u8>,
    chunk_rx: &Receiver<Vec<SampleI16>>,
    want: usize,
    deadline: Instant,
) -> Result<(), AudioError> {
    while pending.len() < want {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match chunk_rx.recv_timeout(remaining) {
            Ok(samples) => {
                for sample in samples {
                    pending.extend(sample.to_le_bytes());
                }
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(AudioError::DeviceIoError(
                    "入力ストリームが切断されました".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// キューの先頭からフレーム単位で `buf` に取り出す
///
/// 取り出すのは `buf` に収まる最大のフレーム数分。端数のバイトはキューに残る。
fn take_frames(pending: &mut VecDeque<u8>, buf: &mut [u8], frame_size: usize) -> usize {
    let available = pending.len().min(buf.len());
    let n = available - available % frame_size.max(1);
    for (dst, src) in buf[..n].iter_mut().zip(pending.drain(..n)) {
        *dst = src;
    }
    n
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        self.stop();
    }
}
