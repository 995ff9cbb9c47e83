use std::path::PathBuf;
use thiserror::Error;

/// 録音・再生パイプラインのエラー
///
/// いずれも1回の操作に閉じたエラーで、プロセスを終了させるものはない。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// マイクへのアクセスが許可されていない
    #[error("マイクへのアクセスが許可されていません")]
    PermissionDenied,

    /// 入出力デバイスを開けない、または設定できない
    #[error("デバイスが利用できません: {0}")]
    DeviceUnavailable(String),

    /// ファイルの作成・読み書きに失敗
    #[error("ストレージエラー: {0}")]
    StorageError(String),

    /// 再生対象の録音ファイルがない（または空）
    #[error("録音ファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    /// ストリーム途中のデバイスI/O失敗
    #[error("デバイスI/Oエラー: {0}")]
    DeviceIoError(String),

    /// バックグラウンドワーカーの起動失敗・異常終了
    #[error("ワーカーエラー: {0}")]
    Worker(String),
}

impl AudioError {
    /// I/Oエラーを StorageError に変換
    pub fn storage(context: &str, err: std::io::Error) -> Self {
        Self::StorageError(format!("{}: {}", context, err))
    }
}
