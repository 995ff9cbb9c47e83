use crate::device::PlaybackDevice;
use crate::error::AudioError;
use crate::types::{AudioFormatConfig, SampleI16};
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 書き込み待ちチャンクのキュー長（これを超えると write がブロックする）
const CHUNK_QUEUE_LEN: usize = 4;

/// キュー投入を再試行する間隔
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// drain 時のポーリング間隔
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// drain で待つ時間の余裕分
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// 音声出力デバイス
///
/// `write` で受け取ったPCMを有界キューに積み、cpal のコールバックが取り出して再生する。
/// キューが一杯の間は `write` がブロックするため、ファイル読み込みは再生速度に律速される。
pub struct AudioOutput {
    stream: Option<Stream>,
    chunk_tx: Sender<Vec<SampleI16>>,
    queued_samples: Arc<AtomicUsize>,
    stream_error: Arc<Mutex<Option<String>>>,
    carry: Option<u8>,
    sample_rate: u32,
}

impl AudioOutput {
    /// 出力ストリームを開いて開始
    pub fn open(device_id: &str, format: &AudioFormatConfig) -> Result<Self, AudioError> {
        let device = Self::find_device(device_id)?;

        log::info!(
            "出力デバイス: {}",
            device.name().unwrap_or_else(|_| "不明なデバイス".to_string())
        );

        // デバイスのデフォルト設定を取得してサンプルフォーマットを確認
        let default_config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceUnavailable(format!("デフォルト出力設定が取得できません: {}", e)))?;

        let config = StreamConfig {
            channels: format.channels(),
            sample_rate: cpal::SampleRate(format.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        log::info!(
            "出力ストリーム開始: フォーマット={:?}, サンプルレート={}Hz, チャンネル={}",
            default_config.sample_format(),
            config.sample_rate.0,
            config.channels
        );

        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded::<Vec<SampleI16>>(CHUNK_QUEUE_LEN);
        let queued_samples = Arc::new(AtomicUsize::new(0));
        let stream_error = Arc::new(Mutex::new(None));

        let shared = CallbackShared {
            chunk_rx,
            queued_samples: queued_samples.clone(),
            stream_error: stream_error.clone(),
        };

        // デバイスのサンプルフォーマットに応じてストリームを構築
        let stream = match default_config.sample_format() {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, shared)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, shared)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, shared)?,
            SampleFormat::I32 => Self::build_stream::<i32>(&device, &config, shared)?,
            other => {
                return Err(AudioError::DeviceUnavailable(format!(
                    "サポートされていないサンプルフォーマット: {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(format!("ストリームの再生開始に失敗: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            chunk_tx,
            queued_samples,
            stream_error,
            carry: None,
            sample_rate: format.sample_rate(),
        })
    }

    /// 指定されたサンプルフォーマットで出力ストリームを構築
    fn build_stream<T>(device: &Device, config: &StreamConfig, shared: CallbackShared) -> Result<Stream, AudioError>
    where
        T: SizedSample + FromSample<SampleI16> + Send + 'static,
    {
        let CallbackShared {
            chunk_rx,
            queued_samples,
            stream_error,
        } = shared;

        let mut pending: VecDeque<SampleI16> = VecDeque::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let consumed = fill_from_queue(data, &mut pending, &chunk_rx);
                    if consumed > 0 {
                        queued_samples.fetch_sub(consumed, Ordering::SeqCst);
                    }
                },
                move |err: cpal::StreamError| {
                    log::error!("出力ストリームエラー: {}", err);
                    *stream_error.lock() = Some(err.to_string());
                },
                None,
            )
            .map_err(|e| AudioError::DeviceUnavailable(format!("出力ストリームの構築に失敗: {}", e)))
    }

    fn check_stream_error(&self) -> Result<(), AudioError> {
        match self.stream_error.lock().take() {
            Some(err) => Err(AudioError::DeviceIoError(err)),
            None => Ok(()),
        }
    }

    /// 音声ストリームを停止
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("出力ストリームを停止しました");
        }
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        let host = cpal::default_host();
        println!("利用可能な出力デバイス:");
        println!();

        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        for (idx, device) in host.output_devices()?.enumerate() {
            let name = device.name()?;
            let marker = if default_name.as_deref() == Some(name.as_str()) {
                " (デフォルト)"
            } else {
                ""
            };
            println!("  [{}] {}{}", idx, name, marker);

            if let Ok(config) = device.default_output_config() {
                println!(
                    "      サンプルレート: {} Hz, チャンネル数: {}",
                    config.sample_rate().0,
                    config.channels()
                );
            }
        }

        Ok(())
    }

    /// デバイス名から出力デバイスを取得（"default" でデフォルトデバイス）
    fn find_device(device_id: &str) -> Result<Device, AudioError> {
        let host = cpal::default_host();

        if device_id == "default" {
            return host
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceUnavailable("デフォルト出力デバイスが見つかりません".to_string()));
        }

        host.output_devices()
            .map_err(|e| AudioError::DeviceUnavailable(format!("デバイス一覧の取得に失敗: {}", e)))?
            .find(|d| d.name().map(|n| n == device_id).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceUnavailable(format!("出力デバイス '{}' が見つかりません", device_id)))
    }
}

/// コールバックに渡す共有状態
struct CallbackShared {
    chunk_rx: Receiver<Vec<SampleI16>>,
    queued_samples: Arc<AtomicUsize>,
    stream_error: Arc<Mutex<Option<String>>>,
}

impl PlaybackDevice for AudioOutput {
    fn write(&mut self, data: &[u8]) -> Result<(), AudioError> {
        self.check_stream_error()?;

        let mut samples = decode_le_samples(&mut self.carry, data);
        if samples.is_empty() {
            return Ok(());
        }

        let count = samples.len();
        self.queued_samples.fetch_add(count, Ordering::SeqCst);

        loop {
            match self.chunk_tx.send_timeout(samples, SEND_RETRY_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(rejected)) => {
                    // キューが空かない間にストリームが死んでいないか確認
                    if let Err(e) = self.check_stream_error() {
                        self.queued_samples.fetch_sub(count, Ordering::SeqCst);
                        return Err(e);
                    }
                    samples = rejected;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.queued_samples.fetch_sub(count, Ordering::SeqCst);
                    return Err(AudioError::DeviceIoError(
                        "出力ストリームが切断されました".to_string(),
                    ));
                }
            }
        }
    }

    fn drain(&mut self) {
        let remaining = self.queued_samples.load(Ordering::SeqCst);
        let deadline = Instant::now() + drain_budget(remaining, self.sample_rate);

        if !wait_until_drained(&self.queued_samples, &self.stream_error, deadline) {
            log::warn!(
                "出力キューを空にできませんでした (残り {} サンプル)",
                self.queued_samples.load(Ordering::SeqCst)
            );
        }
    }
}

/// バイト列を i16 サンプルに変換
///
/// 奇数バイトで終わる場合、最後の1バイトは `carry` に持ち越して次回の先頭に付ける。
fn decode_le_samples(carry: &mut Option<u8>, data: &[u8]) -> Vec<SampleI16> {
    let mut bytes = Vec::with_capacity(data.len() + 1);
    if let Some(b) = carry.take() {
        bytes.push(b);
    }
    bytes.extend_from_slice(data);

    let chunks = bytes.chunks_exact(2);
    *carry = chunks.remainder().first().copied();
    chunks
        .map(|pair| SampleI16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// コールバックのバッファをキューのサンプルで埋める
///
/// キューが空になった後は無音で埋める。戻り値は実際に再生したサンプル数。
fn fill_from_queue<T>(
    data: &mut [T],
    pending: &mut VecDeque<SampleI16>,
    chunk_rx: &Receiver<Vec<SampleI16>>,
) -> usize
where
    T: Sample + FromSample<SampleI16>,
{
    let mut consumed = 0;
    for sample in data.iter_mut() {
        if pending.is_empty() {
            if let Ok(chunk) = chunk_rx.try_recv() {
                pending.extend(chunk);
            }
        }
        *sample = match pending.pop_front() {
            Some(s) => {
                consumed += 1;
                T::from_sample(s)
            }
            None => T::EQUILIBRIUM,
        };
    }
    consumed
}

/// キューに残ったサンプルを出力し終えるまでの待ち時間の上限
fn drain_budget(remaining_samples: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(remaining_samples as f64 / sample_rate.max(1) as f64) + DRAIN_GRACE
}

/// キューが空になるまで待つ
///
/// 期限切れまたはストリームエラーの場合は `false`。
fn wait_until_drained(
    queued_samples: &AtomicUsize,
    stream_error: &Mutex<Option<String>>,
    deadline: Instant,
) -> bool {
    while queued_samples.load(Ordering::SeqCst) > 0 {
        if stream_error.lock().is_some() || Instant::now() >= deadline {
            return false;
        }
        thread::sleep(DRAIN_POLL_INTERVAL);
    }
    true
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
