use crate::audio_input::AudioInput;
use crate::audio_output::AudioOutput;
use crate::error::AudioError;
use crate::types::AudioFormatConfig;

/// 録音デバイス（ブロッキング読み込み）
///
/// 値がドロップされた時点でストリームを停止・解放する。
pub trait CaptureDevice {
    /// 最大 `buf.len()` バイトを読み込む
    ///
    /// 1バッファ分のデータがそろうまでブロックする。
    /// 返すバイト数は常にフレームサイズの倍数。
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError>;
}

/// 再生デバイス（ブロッキング書き込み）
///
/// 値がドロップされた時点でストリームを停止・解放する。
pub trait PlaybackDevice {
    /// `data` を全てデバイスに渡す
    ///
    /// デバイス側のキューが一杯の間はブロックする。
    fn write(&mut self, data: &[u8]) -> Result<(), AudioError>;

    /// キューに残っているデータを出力し終えるまで待つ
    fn drain(&mut self) {}
}

/// オーディオデバイスの生成元
///
/// デバイスはワーカースレッド上で開かれ、そのスレッド内で解放される。
pub trait AudioBackend: Send + Sync {
    fn open_input(&self, format: &AudioFormatConfig) -> Result<Box<dyn CaptureDevice>, AudioError>;

    fn open_output(
        &self,
        format: &AudioFormatConfig,
    ) -> Result<Box<dyn PlaybackDevice>, AudioError>;

    /// フォーマットに対するデバイスの最小バッファサイズ（バイト）
    fn min_buffer_size(&self, _format: &AudioFormatConfig) -> Option<usize> {
        None
    }
}

/// cpal を使ったバックエンド
#[derive(Clone, Debug)]
pub struct CpalBackend {
    input_device: String,
    output_device: String,
}

impl CpalBackend {
    /// デバイス名を指定して作成（"default" でシステムのデフォルト）
    pub fn new(input_device: impl Into<String>, output_device: impl Into<String>) -> Self {
        Self {
            input_device: input_device.into(),
            output_device: output_device.into(),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new("default", "default")
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(&self, format: &AudioFormatConfig) -> Result<Box<dyn CaptureDevice>, AudioError> {
        Ok(Box::new(AudioInput::open(&self.input_device, format)?))
    }

    fn open_output(
        &self,
        format: &AudioFormatConfig,
    ) -> Result<Box<dyn PlaybackDevice>, AudioError> {
        Ok(Box::new(AudioOutput::open(&self.output_device, format)?))
    }

    fn min_buffer_size(&self, format: &AudioFormatConfig) -> Option<usize> {
        AudioInput::query_min_buffer_size(&self.input_device, format)
    }
}
