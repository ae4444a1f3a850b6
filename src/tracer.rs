//! 関数呼び出しの記録
//!
//! 対象の関数を呼び出す前に引数を、呼び出した後に戻り値を記録する。
//! 関数がエラーを返却した場合やパニックした場合は、エラーレベルで記録してから、
//! そのまま呼び出し元に返却する（パニックは再開する）。
//!
//! 呼び出しのたびに`get_logger`でロガーを作成するため、ロックファイルの掃除と
//! ローテーションも呼び出しのたびに実行される。

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe, Location},
    sync::Arc,
};

use crate::{
    config::LoggerConfig,
    logger::{get_logger, get_logger_with, Logger},
    metrics::Enricher,
    record::{base_name, Callsite, Identity, Level},
};

/// 記録する引数
///
/// 値は`Debug`で表示されるため、文字列は引用符付きになる。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    rendered: Vec<String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 位置引数を追加する。
    pub fn arg(mut self, value: &dyn fmt::Debug) -> Self {
        self.rendered.push(format!("{:?}", value));
        self
    }

    /// キーワード引数を`name=value`で追加する。
    pub fn kwarg(mut self, name: &str, value: &dyn fmt::Debug) -> Self {
        self.rendered.push(format!("{}={:?}", name, value));
        self
    }
}

impl fmt::Display for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered.join(", "))
    }
}

/// 関数の結果
enum Outcome {
    Returned(String),
    Failed(String),
}

/// 関数呼び出しを記録する。
#[derive(Clone)]
pub struct Tracer {
    config: LoggerConfig,
    enricher: Option<Arc<dyn Enricher>>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

impl Tracer {
    /// 呼び出しのたびに、この設定でロガーを作成する`Tracer`を作成する。
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            enricher: None,
        }
    }

    pub fn with_log_file_name(mut self, log_file_name: impl Into<String>) -> Self {
        self.config.log_file_name = log_file_name.into();
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// 関数を呼び出して、引数と戻り値を記録する。
    ///
    /// # 引数
    ///
    /// - name: 記録する関数名。
    /// - args: 記録する引数。
    /// - f: 呼び出す関数。
    ///
    /// # 戻り値
    ///
    /// `f`の戻り値。
    #[track_caller]
    pub fn call<R, F>(&self, name: &str, args: &CallArgs, f: F) -> R
    where
        R: fmt::Debug,
        F: FnOnce() -> R,
    {
        let identity = Identity::new(base_name(Location::caller().file()), name);
        self.trace(&identity, args, f, |value| Outcome::Returned(format!("{:?}", value)))
    }

    /// `Result`を返却する関数を呼び出して記録する。
    ///
    /// `Err`はエラーレベルで記録して、変更せずに返却する。
    #[track_caller]
    pub fn call_fallible<T, E, F>(&self, name: &str, args: &CallArgs, f: F) -> Result<T, E>
    where
        T: fmt::Debug,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        let identity = Identity::new(base_name(Location::caller().file()), name);
        self.trace(&identity, args, f, describe_result)
    }

    /// 1引数の関数を、呼び出しを記録する関数に変換する。
    ///
    /// 複数の引数はタプルで渡す。ファイル名には`wrap`を呼び出した場所が記録される。
    #[track_caller]
    pub fn wrap<A, R, F>(self, name: &'static str, f: F) -> impl Fn(A) -> R
    where
        A: fmt::Debug,
        R: fmt::Debug,
        F: Fn(A) -> R,
    {
        let identity = Identity::new(base_name(Location::caller().file()), name);
        move |arg: A| {
            let args = CallArgs::new().arg(&arg);
            self.trace(&identity, &args, || f(arg), |value| {
                Outcome::Returned(format!("{:?}", value))
            })
        }
    }

    /// `Result`を返却する1引数の関数を、呼び出しを記録する関数に変換する。
    #[track_caller]
    pub fn wrap_fallible<A, T, E, F>(self, name: &'static str, f: F) -> impl Fn(A) -> Result<T, E>
    where
        A: fmt::Debug,
        T: fmt::Debug,
        E: fmt::Display,
        F: Fn(A) -> Result<T, E>,
    {
        let identity = Identity::new(base_name(Location::caller().file()), name);
        move |arg: A| {
            let args = CallArgs::new().arg(&arg);
            self.trace(&identity, &args, || f(arg), describe_result)
        }
    }

    fn logger(&self) -> Option<Logger> {
        let result = match &self.enricher {
            Some(enricher) => get_logger_with(&self.config, enricher.clone()),
            None => get_logger(&self.config),
        };
        match result {
            Ok(logger) => Some(logger),
            Err(err) => {
                tracing::warn!(error = %err, "failed to create logger, calling untraced");
                None
            }
        }
    }

    fn trace<R, F, D>(&self, identity: &Identity, args: &CallArgs, f: F, describe: D) -> R
    where
        F: FnOnce() -> R,
        D: FnOnce(&R) -> Outcome,
    {
        let Some(logger) = self.logger() else {
            return f();
        };
        let callsite = Callsite::new(file!(), "trace");
        let log = |level: Level, message: String| {
            logger.log_as(level, callsite.clone(), identity, message)
        };

        log(Level::Info, format!("Arguments: {} - Begin function", args));
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                match describe(&value) {
                    Outcome::Returned(repr) => {
                        log(Level::Info, format!("Returned: - End function {}", repr))
                    }
                    Outcome::Failed(err) => log(Level::Error, format!("Exception: {}", err)),
                }
                value
            }
            Err(payload) => {
                log(Level::Error, format!("Exception: {}", panic_message(payload.as_ref())));
                panic::resume_unwind(payload)
            }
        }
    }
}

fn describe_result<T: fmt::Debug, E: fmt::Display>(result: &Result<T, E>) -> Outcome {
    match result {
        Ok(value) => Outcome::Returned(format!("{:?}", value)),
        Err(err) => Outcome::Failed(err.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
