//! 終了時の後始末
//!
//! 開いている出力先をプロセス全体で1つの一覧に登録して、正常終了時と
//! SIGINT、SIGTERM、SIGABRTの受信時に、すべて閉じる。
//! 終了フックとシグナルの登録は、プロセスごとに1回だけ行う。

use std::{
    io::{self, Write},
    sync::{Arc, LazyLock, Mutex, Once, PoisonError, Weak},
};

use crate::appenders::RollingFileAppender;

/// 登録された出力先の一覧
///
/// 出力先の寿命は延ばさない。ドロップされた出力先は、次の登録時に取り除かれる。
#[derive(Debug, Default)]
pub(crate) struct Registry {
    appenders: Mutex<Vec<Weak<RollingFileAppender>>>,
}

impl Registry {
    pub(crate) fn register(&self, appender: &Arc<RollingFileAppender>) {
        let mut appenders = self.appenders.lock().unwrap_or_else(PoisonError::into_inner);
        appenders.retain(|appender| appender.strong_count() > 0);
        appenders.push(Arc::downgrade(appender));
    }

    pub(crate) fn close_all(&self) {
        let appenders: Vec<_> = self
            .appenders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for appender in appenders {
            appender.close();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.appenders.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::default);

static INSTALL: Once = Once::new();

/// 出力先を終了時に閉じる対象として登録する。
///
/// 初回の呼び出しで、終了フックとシグナルハンドラーを登録する。
pub(crate) fn register(appender: &Arc<RollingFileAppender>) {
    REGISTRY.register(appender);
    INSTALL.call_once(install);
}

/// 登録されているすべての出力先を閉じて、標準出力をフラッシュする。
///
/// 何度呼び出してもよい。閉じた出力先を閉じても何も起こらない。
pub fn shutdown() {
    REGISTRY.close_all();
    let _ = io::stdout().flush();
}

#[cfg(unix)]
fn install() {
    extern "C" fn on_exit() {
        // 終了処理中にパニックを巻き戻すことはできない
        let _ = std::panic::catch_unwind(shutdown);
    }

    // SAFETY: `on_exit`は引数を取らず、パニックを外に出さない。
    if unsafe { libc::atexit(on_exit) } != 0 {
        tracing::debug!("failed to register exit hook");
    }

    install_signal_handlers();
}

#[cfg(not(unix))]
fn install() {}

#[cfg(unix)]
fn install_signal_handlers() {
    use signal_hook::{
        consts::{SIGABRT, SIGINT, SIGTERM},
        iterator::Signals,
        low_level::emulate_default_handler,
    };

    let mut signals = match Signals::new([SIGINT, SIGTERM, SIGABRT]) {
        Ok(signals) => signals,
        Err(err) => {
            tracing::debug!(error = %err, "failed to register signal handlers");
            return;
        }
    };

    let spawned = std::thread::Builder::new()
        .name("log-shutdown".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                shutdown();
                let _ = emulate_default_handler(signal);
            }
        });
    if let Err(err) = spawned {
        tracing::debug!(error = %err, "failed to start signal thread");
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn appender(dir: &TempDir, name: &str) -> Arc<RollingFileAppender> {
        Arc::new(RollingFileAppender::new(dir.path().join(name), 0, 1).unwrap())
    }

    #[test]
    fn test_close_all_closes_registered_appenders() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::default();
        let first = appender(&dir, "a.log");
        let second = appender(&dir, "b.log");
        registry.register(&first);
        registry.register(&second);

        registry.close_all();
        registry.close_all();

        assert!(first.is_closed());
        assert!(second.is_closed());
        assert!(!first.lock_path().exists());
        assert!(!second.lock_path().exists());
    }

    #[test]
    fn test_dropped_appenders_are_pruned() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::default();
        let dropped = appender(&dir, "a.log");
        registry.register(&dropped);
        drop(dropped);

        let kept = appender(&dir, "b.log");
        registry.register(&kept);

        assert_eq!(1, registry.len());
        registry.close_all();
        assert!(kept.is_closed());
    }

    #[test]
    fn test_register_installs_hooks_once() {
        let dir = TempDir::new().unwrap();
        register(&appender(&dir, "a.log"));
        register(&appender(&dir, "b.log"));

        assert!(INSTALL.is_completed());
    }
}
