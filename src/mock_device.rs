//! テスト用のモックバックエンド
//!
//! 入力は合成PCM（オープン回数と同じ値のバイト列）を指定チャンク数だけ返し、
//! 出力は受け取ったバイト列を記録する。

use crate::device::{AudioBackend, CaptureDevice, PlaybackDevice};
use crate::error::AudioError;
use crate::types::AudioFormatConfig;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// チャンクを使い切った後の読み込みで待つ時間
const IDLE_READ_DELAY: Duration = Duration::from_millis(1);

#[derive(Default)]
struct Shared {
    bytes_captured: AtomicUsize,
    inputs_opened: AtomicUsize,
    inputs_released: AtomicUsize,
    outputs_opened: AtomicUsize,
    outputs_released: AtomicUsize,
    written: Mutex<Vec<u8>>,
    write_count: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    input_chunks: Option<usize>,
    read_errors_at: HashSet<usize>,
    read_delay: Duration,
    input_unavailable: bool,
    output_unavailable: bool,
    fail_write_at: Option<usize>,
    write_delay: Duration,
    min_buffer_size: Option<usize>,
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            input_chunks: Some(0),
            ..Self::default()
        }
    }

    /// 入力が返すチャンク数
    pub fn with_input_chunks(mut self, chunks: usize) -> Self {
        self.input_chunks = Some(chunks);
        self
    }

    /// 停止されるまでチャンクを返し続ける
    pub fn endless_input(mut self) -> Self {
        self.input_chunks = None;
        self
    }

    /// 指定した回数目（0始まり）の read をエラーにする（チャンクは消費しない）
    pub fn with_read_errors_at(mut self, calls: &[usize]) -> Self {
        self.read_errors_at = calls.iter().copied().collect();
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn input_unavailable(mut self) -> Self {
        self.input_unavailable = true;
        self
    }

    pub fn output_unavailable(mut self) -> Self {
        self.output_unavailable = true;
        self
    }

    /// 指定した回数目（0始まり）の write をエラーにする
    pub fn fail_output_write_at(mut self, call: usize) -> Self {
        self.fail_write_at = Some(call);
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_min_buffer_size(mut self, bytes: usize) -> Self {
        self.min_buffer_size = Some(bytes);
        self
    }

    pub fn bytes_captured(&self) -> usize {
        self.shared.bytes_captured.load(Ordering::SeqCst)
    }

    pub fn inputs_opened(&self) -> usize {
        self.shared.inputs_opened.load(Ordering::SeqCst)
    }

    pub fn inputs_released(&self) -> usize {
        self.shared.inputs_released.load(Ordering::SeqCst)
    }

    pub fn outputs_opened(&self) -> usize {
        self.shared.outputs_opened.load(Ordering::SeqCst)
    }

    pub fn outputs_released(&self) -> usize {
        self.shared.outputs_released.load(Ordering::SeqCst)
    }

    /// 出力デバイスに書き込まれた全バイト
    pub fn written_bytes(&self) -> Vec<u8> {
        self.shared.written.lock().clone()
    }

    /// 成功した write の回数
    pub fn write_count(&self) -> usize {
        self.shared.write_count.load(Ordering::SeqCst)
    }
}

impl AudioBackend for MockBackend {
    fn open_input(&self, _format: &AudioFormatConfig) -> Result<Box<dyn CaptureDevice>, AudioError> {
        if self.input_unavailable {
            return Err(AudioError::DeviceUnavailable("モック入力デバイスなし".to_string()));
        }

        let opened = self.shared.inputs_opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockInput {
            fill: opened as u8,
            remaining: self.input_chunks,
            read_errors_at: self.read_errors_at.clone(),
            read_delay: self.read_delay,
            calls: 0,
            shared: self.shared.clone(),
        }))
    }

    fn open_output(&self, _format: &AudioFormatConfig) -> Result<Box<dyn PlaybackDevice>, AudioError> {
        if self.output_unavailable {
            return Err(AudioError::DeviceUnavailable("モック出力デバイスなし".to_string()));
        }

        self.shared.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockOutput {
            fail_write_at: self.fail_write_at,
            write_delay: self.write_delay,
            calls: 0,
            shared: self.shared.clone(),
        }))
    }

    fn min_buffer_size(&self, _format: &AudioFormatConfig) -> Option<usize> {
        self.min_buffer_size
    }
}

struct MockInput {
    fill: u8,
    remaining: Option<usize>,
    read_errors_at: HashSet<usize>,
    read_delay: Duration,
    calls: usize,
    shared: Arc<Shared>,
}

impl CaptureDevice for MockInput {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        let call = self.calls;
        self.calls += 1;

        if self.read_errors_at.contains(&call) {
            return Err(AudioError::DeviceIoError(format!("モック読み込みエラー ({})", call)));
        }

        match self.remaining {
            Some(0) => {
                thread::sleep(IDLE_READ_DELAY);
                return Ok(0);
            }
            Some(ref mut n) => *n -= 1,
            None => {}
        }

        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }

        buf.fill(self.fill);
        self.shared.bytes_captured.fetch_add(buf.len(), Ordering::SeqCst);
        Ok(buf.len())
    }
}

impl Drop for MockInput {
    fn drop(&mut self) {
        self.shared.inputs_released.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockOutput {
    fail_write_at: Option<usize>,
    write_delay: Duration,
    calls: usize,
    shared: Arc<Shared>,
}

impl PlaybackDevice for MockOutput {
    fn write(&mut self, data: &[u8]) -> Result<(), AudioError> {
        let call = self.calls;
        self.calls += 1;

        if self.fail_write_at == Some(call) {
            return Err(AudioError::DeviceIoError("モック書き込みエラー".to_string()));
        }

        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }

        self.shared.written.lock().extend_from_slice(data);
        self.shared.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockOutput {
    fn drop(&mut self) {
        self.shared.outputs_released.fetch_add(1, Ordering::SeqCst);
    }
}
