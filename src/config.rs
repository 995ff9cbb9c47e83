use crate::device::AudioBackend;
use crate::types::{AudioFormatConfig, DEFAULT_BUFFER_SIZE_BYTES, DEFAULT_SAMPLE_RATE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// オーディオ入出力設定
///
/// 録音・再生に使うデバイスとフォーマットに関する設定。
///
/// # デフォルト値
///
/// - `input_device`: "default" (システムのデフォルト入力)
/// - `output_device`: "default" (システムのデフォルト出力)
/// - `sample_rate`: 44100 Hz
/// - `buffer_size_bytes`: なし (デバイスの最小バッファサイズを使用)
/// - `microphone_access`: true
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_device")]
    pub input_device: String,
    #[serde(default = "default_device")]
    pub output_device: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// 1回のデバイスI/Oのバイト数（指定時はデバイスの報告値より優先）
    pub buffer_size_bytes: Option<usize>,
    /// マイクの使用を許可するか
    #[serde(default = "default_microphone_access")]
    pub microphone_access: bool,
}

/// 出力設定
///
/// 録音ファイルとログに関する設定。
///
/// # デフォルト値
///
/// - `recording_path`: "<キャッシュディレクトリ>/pcm-recorder/audio_record.pcm"
/// - `log_level`: "info"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_recording_path")]
    pub recording_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default functions
fn default_device() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_microphone_access() -> bool {
    true
}

fn default_recording_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pcm-recorder")
        .join("audio_record.pcm")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: default_device(),
            output_device: default_device(),
            sample_rate: default_sample_rate(),
            buffer_size_bytes: None,
            microphone_access: default_microphone_access(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            recording_path: default_recording_path(),
            log_level: default_log_level(),
        }
    }
}

impl AudioConfig {
    /// 録音・再生で使うフォーマットを決定
    ///
    /// バッファサイズは設定値、デバイスの最小バッファサイズ、
    /// デフォルト値 (4096 バイト) の順に採用する。
    pub fn format(&self, backend: &dyn AudioBackend) -> AudioFormatConfig {
        let base = AudioFormatConfig::new(self.sample_rate);

        let buffer_size = match self.buffer_size_bytes {
            Some(bytes) => bytes,
            None => backend.min_buffer_size(&base).unwrap_or_else(|| {
                log::debug!("デバイスの最小バッファサイズが取得できないためデフォルト値を使用します");
                DEFAULT_BUFFER_SIZE_BYTES
            }),
        };

        let format = base.with_min_buffer_size(buffer_size);
        log::info!(
            "オーディオフォーマット: {}Hz, {}ch, {}bit, バッファ {} バイト",
            format.sample_rate(),
            format.channels(),
            format.bits_per_sample(),
            format.min_buffer_size()
        );
        format
    }
}

impl OutputConfig {
    /// ログファイルのパス（録音ファイルと同じディレクトリ）
    pub fn log_file_path(&self) -> PathBuf {
        self.recording_path.with_file_name("pcm-recorder.log")
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use pcm_recorder::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し（既存のファイルは上書き）
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (config, source) = Self::load_with_source(path.as_ref())?;
        if source == ConfigSource::Default {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
        }
        Ok(config)
    }

    /// `load_or_default` と同じだが、どこから読み込んだかも返す
    ///
    /// ロガー初期化前に呼ぶ場合は、こちらを使って後から警告を出す。
    pub fn load_with_source<P: AsRef<Path>>(path: P) -> Result<(Self, ConfigSource)> {
        if path.as_ref().exists() {
            Ok((Self::from_file(path)?, ConfigSource::File))
        } else {
            Ok((Config::default(), ConfigSource::Default))
        }
    }
}

/// 設定の読み込み元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// 設定ファイル
    File,
    /// ファイルがなかったためデフォルト値
    Default,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_device::MockBackend;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.input_device, "default");
        assert_eq!(config.audio.output_device, "default");
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.audio.buffer_size_bytes, None);
        assert!(config.audio.microphone_access);
        assert!(config.output.recording_path.ends_with("pcm-recorder/audio_record.pcm"));
        assert_eq!(config.output.log_level, "info");
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        Config::write_default(path).unwrap();

        let config = Config::from_file(path).unwrap();
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.output.recording_path, default_recording_path());
    }

    #[test]
    fn test_custom_config() {
        let toml_content = r#"
[audio]
input_device = "USB Microphone"
output_device = "Speakers"
sample_rate = 16000
buffer_size_bytes = 2048
microphone_access = false

[output]
recording_path = "/tmp/test/audio_record.pcm"
log_level = "debug"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, "USB Microphone");
        assert_eq!(config.audio.output_device, "Speakers");
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.buffer_size_bytes, Some(2048));
        assert!(!config.audio.microphone_access);
        assert_eq!(
            config.output.recording_path,
            PathBuf::from("/tmp/test/audio_record.pcm")
        );
        assert_eq!(config.output.log_level, "debug");
        assert_eq!(
            config.output.log_file_path(),
            PathBuf::from("/tmp/test/pcm-recorder.log")
        );
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let config = Config::load_or_default("nonexistent_file.toml").unwrap();
        assert_eq!(config.audio.sample_rate, 44100);
    }

    #[test]
    fn test_load_with_source() {
        let (config, source) = Config::load_with_source("nonexistent_file.toml").unwrap();
        assert_eq!(source, ConfigSource::Default);
        assert_eq!(config.audio.sample_rate, 44100);

        let temp_file = NamedTempFile::new().unwrap();
        Config::write_default(temp_file.path()).unwrap();
        let (_, source) = Config::load_with_source(temp_file.path()).unwrap();
        assert_eq!(source, ConfigSource::File);
    }

    #[test]
    fn test_invalid_config() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[audio]\nsample_rate = \"fast\"\n").unwrap();
        temp_file.flush().unwrap();

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_partial_config() {
        // 一部の設定のみ記述した場合、残りはデフォルト値が使われる
        let toml_content = r#"
[audio]
sample_rate = 48000
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.input_device, "default");
        assert!(config.audio.microphone_access);
        assert_eq!(config.output.log_level, "info");
    }

    #[test]
    fn test_format_buffer_size_priority() {
        let mut audio = AudioConfig::default();
        let device = MockBackend::new().with_min_buffer_size(1764);

        // デバイスの報告値
        assert_eq!(audio.format(&device).min_buffer_size(), 1764);

        // 取得できなければデフォルト
        assert_eq!(audio.format(&MockBackend::new()).min_buffer_size(), 4096);

        // 設定値が最優先（フレーム境界に切り上げ）
        audio.buffer_size_bytes = Some(3001);
        let format = audio.format(&device);
        assert_eq!(format.min_buffer_size(), 3002);
        assert_eq!(format.sample_rate(), 44100);
    }
}
