use std::path::PathBuf;
use std::time::Duration;

/// 16ビット整数型のオーディオサンプル
///
/// PCM形式の音声データを表現するための型エイリアス。
/// -32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// デフォルトのサンプリングレート (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// デバイスから最小バッファサイズが取得できない場合のバッファサイズ (バイト)
pub const DEFAULT_BUFFER_SIZE_BYTES: usize = 4096;

/// デバイスが報告する最小バッファサイズの下限 (バイト)
pub const MIN_BUFFER_FLOOR_BYTES: usize = 1024;

/// 録音・再生で共通に使う固定オーディオフォーマット
///
/// モノラル / 16bit 符号付きリトルエンディアン PCM。
/// PCMファイルにはヘッダがないため、書き込み側と読み込み側で
/// 同じ設定を使う必要がある。
///
/// `min_buffer_size` は常にフレームサイズの倍数になる。
///
/// # Examples
///
/// ```
/// # use pcm_recorder::types::AudioFormatConfig;
/// let format = AudioFormatConfig::new(44100).with_min_buffer_size(4095);
/// assert_eq!(format.frame_size(), 2);
/// assert_eq!(format.min_buffer_size(), 4096);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormatConfig {
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    min_buffer_size: usize,
}

impl AudioFormatConfig {
    /// モノラル16bitのフォーマットを作成
    pub fn new(sample_rate: u32) -> Self {
        let format = Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
            min_buffer_size: 0,
        };
        format.with_min_buffer_size(DEFAULT_BUFFER_SIZE_BYTES)
    }

    /// 最小バッファサイズを設定（フレームサイズの倍数に切り上げ）
    pub fn with_min_buffer_size(mut self, bytes: usize) -> Self {
        self.min_buffer_size = self.align_to_frame(bytes);
        self
    }

    /// サンプリングレート (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// チャンネル数（常に1）
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// 量子化ビット数（常に16）
    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    /// 1回のデバイスI/Oで受け渡すバイト数
    pub fn min_buffer_size(&self) -> usize {
        self.min_buffer_size
    }

    /// 1フレームのバイト数
    pub fn frame_size(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// 1秒あたりのバイト数
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_size()
    }

    /// バイト数をフレームサイズの倍数に切り上げる（最低1フレーム）
    pub fn align_to_frame(&self, bytes: usize) -> usize {
        let frame = self.frame_size();
        bytes.max(frame).div_ceil(frame) * frame
    }

    /// バイト数に相当する再生時間
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bytes_per_second = self.bytes_per_second().max(1);
        Duration::from_secs_f64(bytes as f64 / bytes_per_second as f64)
    }

    /// 1バッファ分の再生時間
    pub fn buffer_duration(&self) -> Duration {
        self.duration_of(self.min_buffer_size)
    }

    /// 1バッファ分の作業領域を確保
    pub fn allocate_buffer(&self) -> Vec<u8> {
        vec![0u8; self.min_buffer_size]
    }
}

impl Default for AudioFormatConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

/// セッションの状態
///
/// ```text
/// Idle ──toggle──▶ Recording ──toggle──▶ Saved ──play──▶ Playing
///                      ▲                   │  ▲             │
///                      └──────toggle───────┘  └──完了/中断──┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// 保存済み録音なし
    Idle,
    /// 録音中
    Recording,
    /// 録音保存済み（再生可能）
    Saved,
    /// 再生中
    Playing,
}

/// 録音停止時の結果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureReport {
    /// ファイルに書き込んだバイト数
    pub bytes_written: u64,
    /// 書き込んだバッファ数
    pub buffers_written: u64,
    /// 許容した読み込みエラーの回数
    pub tolerated_read_errors: u64,
}

/// 再生の終了状態
///
/// 進捗値だけでは中断と完了を区別できないため、明示的に保持する。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// 最後まで再生した（進捗 1.0 を通知済み）
    Completed,
    /// デバイスまたはファイルのエラーで中断した
    Aborted(String),
    /// 呼び出し側の停止要求で中断した
    Cancelled,
}

/// 再生終了時の結果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackReport {
    /// デバイスに書き込んだバイト数
    pub bytes_played: u64,
    /// 再生開始時のファイルサイズ
    pub total_bytes: u64,
    /// 終了状態
    pub outcome: PlaybackOutcome,
}

impl PlaybackReport {
    pub fn is_completed(&self) -> bool {
        self.outcome == PlaybackOutcome::Completed
    }
}

/// UI層に公開するセッション状態のスナップショット
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub is_recording: bool,
    pub is_playing: bool,
    pub has_saved_audio: bool,
    /// 再生進捗 (0.0 ~ 1.0)
    pub progress: f32,
    /// 録音ファイルのパス
    pub file_path: PathBuf,
    /// 直近の再生の終了状態
    pub last_playback: Option<PlaybackOutcome>,
    /// 直近のエラーメッセージ
    pub last_error: Option<String>,
}

impl SessionStatus {
    /// フラグから状態を導出
    pub fn phase(&self) -> SessionPhase {
        if self.is_recording {
            SessionPhase::Recording
        } else if self.is_playing {
            SessionPhase::Playing
        } else if self.has_saved_audio {
            SessionPhase::Saved
        } else {
            SessionPhase::Idle
        }
    }
}
