use crate::error::AudioError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// ループ停止用のキャンセルトークン
///
/// 録音ループ・再生ループはI/Oの合間に1回だけこのトークンを確認する。
/// そのため停止までの遅延は最大で1バッファ分のI/O時間になる。
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 停止を要求
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 停止が要求されているか
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// バックグラウンドワーカーのハンドル
pub(crate) struct WorkerHandle<R> {
    name: String,
    handle: JoinHandle<Option<R>>,
}

impl<R> WorkerHandle<R> {
    /// ワーカーの終了を待って結果を取得
    pub(crate) fn join(self) -> Result<R, AudioError> {
        match self.handle.join() {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(AudioError::Worker(format!(
                "{} は初期化に失敗して終了しました",
                self.name
            ))),
            Err(_) => Err(AudioError::Worker(format!(
                "{} が異常終了しました",
                self.name
            ))),
        }
    }

    /// ワーカーが終了しているか
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// ワーカースレッドを起動
///
/// `init` はワーカースレッド上で実行され、デバイスやファイルなど
/// スレッドが専有するリソースを確保する。`init` の結果を待ってから戻るため、
/// 確保に失敗した場合は呼び出し元に同期的にエラーが返り、ループは始まらない。
/// 確保したリソースは `run` の終了時に必ず解放される。
pub(crate) fn spawn_worker<S, R, I, F>(
    name: &str,
    init: I,
    run: F,
) -> Result<WorkerHandle<R>, AudioError>
where
    I: FnOnce() -> Result<S, AudioError> + Send + 'static,
    F: FnOnce(S) -> R + Send + 'static,
    R: Send + 'static,
{
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);

    let thread_name = name.to_string();
    let handle = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || match init() {
            Ok(state) => {
                let _ = ready_tx.send(Ok(()));
                Some(run(state))
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                None
            }
        })
        .map_err(|e| AudioError::Worker(format!("{} の起動に失敗: {}", name, e)))?;

    let worker = WorkerHandle {
        name: thread_name,
        handle,
    };

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(worker),
        Ok(Err(e)) => {
            let _ = worker.handle.join();
            Err(e)
        }
        Err(_) => Err(worker
            .join()
            .err()
            .unwrap_or_else(|| AudioError::Worker(format!("{} の初期化結果を受信できません", name)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_spawn_worker_runs_after_init() {
        let worker = spawn_worker("test-worker", || Ok(21), |value: i32| value * 2).unwrap();
        assert_eq!(worker.join().unwrap(), 42);
    }

    #[test]
    fn test_spawn_worker_init_failure_is_synchronous() {
        let result = spawn_worker::<(), (), _, _>(
            "test-worker",
            || Err(AudioError::DeviceUnavailable("テスト".to_string())),
            |_| panic!("init に失敗したら run は呼ばれない"),
        );

        match result {
            Err(AudioError::DeviceUnavailable(msg)) => assert_eq!(msg, "テスト"),
            other => panic!("予期しない結果: {:?}", other.err()),
        }
    }

    #[test]
    fn test_spawn_worker_panic_in_init() {
        let result = spawn_worker::<(), (), _, _>(
            "test-worker",
            || panic!("init panic"),
            |_| (),
        );
        assert!(matches!(result, Err(AudioError::Worker(_))));
    }
}
