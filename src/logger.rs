//! ロガーの作成と出力
//!
//! `get_logger`はログディレクトリを作成し、古いロックファイルを掃除して、
//! ローテーションを実行してから、ログファイルを開いた`Logger`を返却する。

use std::{
    fmt,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::{
    fmt::{writer::BoxMakeWriter, MakeWriter},
    layer::Context,
    Layer,
};

use crate::{
    appenders::RollingFileAppender,
    config::LoggerConfig,
    error::Result,
    locks::cleanup_stale_locks,
    metrics::{Enricher, MemoryEnricher},
    record::{Callsite, Identity, Level, LineFormat, Record},
    rotation, shutdown,
};

/// プロセス全体で共有する、メモリ使用率の`Enricher`
static MEMORY: LazyLock<Arc<MemoryEnricher>> = LazyLock::new(|| Arc::new(MemoryEnricher::new()));

/// 設定に従ってロガーを作成する。
///
/// レコードにはメモリ使用率が付与される。
///
/// # 引数
///
/// - config: ロガーの設定。
///
/// # 戻り値
///
/// `Logger`インスタンス。ログファイルを開けない場合だけエラーになる。
pub fn get_logger(config: &LoggerConfig) -> Result<Logger> {
    get_logger_with(config, MEMORY.clone())
}

/// レコードを補強する`Enricher`を指定して、ロガーを作成する。
///
/// `config.console`が`true`の場合は、同じ行を標準出力にも書き込む。
pub fn get_logger_with(config: &LoggerConfig, enricher: Arc<dyn Enricher>) -> Result<Logger> {
    let console = config.console.then(|| BoxMakeWriter::new(io::stdout));
    create_logger(config, enricher, console)
}

/// コンソールの出力先を指定して、ロガーを作成する。
fn create_logger(
    config: &LoggerConfig,
    enricher: Arc<dyn Enricher>,
    console: Option<BoxMakeWriter>,
) -> Result<Logger> {
    let directory = config.directory();
    if let Err(err) = fs::create_dir_all(&directory) {
        tracing::debug!(
            directory = %directory.display(),
            error = %err,
            "failed to create log directory"
        );
    }

    if config.locks.enabled {
        cleanup_stale_locks(&directory, config.locks.stale_minutes, config.locks.verbose);
    }

    let path = resolve_log_path(config, &directory);
    rotation::apply(&path, &config.rotation);

    let appender = Arc::new(RollingFileAppender::new(
        &path,
        config.rotation.appender_max_bytes(),
        config.rotation.backup_count,
    )?);
    shutdown::register(&appender);

    Ok(Logger {
        inner: Arc::new(Inner {
            name: config.log_file_name.clone(),
            level: config.level,
            format: config.line_format(),
            file: appender,
            console,
            enricher,
        }),
    })
}

/// ログファイルのパスを決定する。
///
/// `log_file_name`のファイルが既に存在する場合は、そのパスをそのまま使う。
fn resolve_log_path(config: &LoggerConfig, directory: &Path) -> PathBuf {
    let literal = Path::new(&config.log_file_name);
    if literal.is_file() {
        literal.to_path_buf()
    } else {
        directory.join(format!("{}.log", config.log_file_name))
    }
}

/// ロガー
///
/// 複製しても同じ出力先を共有する。
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    level: Level,
    format: LineFormat,
    file: Arc<RollingFileAppender>,
    console: Option<BoxMakeWriter>,
    enricher: Arc<dyn Enricher>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("level", &self.inner.level)
            .field("path", &self.inner.file.path())
            .field("console", &self.inner.console.is_some())
            .finish()
    }
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn level(&self) -> Level {
        self.inner.level
    }

    /// ログファイルのパス
    pub fn path(&self) -> &Path {
        self.inner.file.path()
    }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.inner.level
    }

    /// メッセージを出力する。
    pub fn log(&self, level: Level, callsite: Callsite, message: impl fmt::Display) {
        if self.enabled(level) {
            self.emit(Record::new(level, callsite, message.to_string()));
        }
    }

    /// 呼び出し元を上書きして、メッセージを出力する。
    pub fn log_as(
        &self,
        level: Level,
        callsite: Callsite,
        identity: &Identity,
        message: impl fmt::Display,
    ) {
        if self.enabled(level) {
            let record =
                Record::new(level, callsite, message.to_string()).with_identity(identity.clone());
            self.emit(record);
        }
    }

    /// レコードを補強して、すべての出力先に書き込む。
    pub fn emit(&self, mut record: Record) {
        if !self.enabled(record.level) {
            return;
        }
        self.inner.enricher.enrich(&mut record);
        let line = self.inner.format.format(&record);

        // 書き込みの失敗は呼び出し元に伝えない
        let _ = self.inner.file.make_writer().write_all(line.as_bytes());
        if let Some(console) = &self.inner.console {
            let _ = console.make_writer().write_all(line.as_bytes());
        }
    }

    #[track_caller]
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Level::Debug, Callsite::caller(), message);
    }

    #[track_caller]
    pub fn info(&self, message: impl fmt::Display) {
        self.log(Level::Info, Callsite::caller(), message);
    }

    #[track_caller]
    pub fn warning(&self, message: impl fmt::Display) {
        self.log(Level::Warning, Callsite::caller(), message);
    }

    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.log(Level::Error, Callsite::caller(), message);
    }

    #[track_caller]
    pub fn critical(&self, message: impl fmt::Display) {
        self.log(Level::Critical, Callsite::caller(), message);
    }

    /// `tracing`のイベントをこのロガーに出力するレイヤーを返却する。
    ///
    /// フィールド`func_name_override`と`file_name_override`は、呼び出し元の上書きになる。
    pub fn layer(&self) -> LoggerLayer {
        LoggerLayer {
            logger: self.clone(),
        }
    }

    /// ログファイルを閉じる。閉じた後の出力は破棄される。
    pub fn close(&self) {
        self.inner.file.close();
    }
}

/// `tracing`のイベントを`Logger`に出力するレイヤー
///
/// イベントからは関数名がわからないため、`func_name_override`がない場合の関数名は`-`になる。
#[derive(Debug, Clone)]
pub struct LoggerLayer {
    logger: Logger,
}

impl<S: Subscriber> Layer<S> for LoggerLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = Level::from(metadata.level());
        if !self.logger.enabled(level) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let callsite = Callsite::new(metadata.file().unwrap_or(metadata.target()), "-");
        let (message, identity) = visitor.finish();
        let record = Record::new(level, callsite, message).with_identity(identity);
        self.logger.emit(record);
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Vec<String>,
    identity: Identity,
}

impl EventVisitor {
    /// メッセージの後に、その他のフィールドを`name=value`で続ける。
    fn finish(self) -> (String, Identity) {
        let mut message = self.message;
        for field in self.fields {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&field);
        }
        (message, self.identity)
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "func_name_override" => self.identity.func_name = Some(value.to_string()),
            "file_name_override" => self.identity.file_name = Some(value.to_string()),
            "message" => self.message = value.to_string(),
            name => self.fields.push(format!("{}={:?}", name, value)),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "func_name_override" => self.identity.func_name = Some(format!("{:?}", value)),
            "file_name_override" => self.identity.file_name = Some(format!("{:?}", value)),
            "message" => self.message = format!("{:?}", value),
            name => self.fields.push(format!("{}={:?}", name, value)),
        }
    }
}

/// 呼び出し元の関数名を返却する。
#[doc(hidden)]
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = name.strip_suffix("::f").unwrap_or(name);
        let name = name.trim_end_matches("::{{closure}}");
        name.rsplit("::").next().unwrap_or(name)
    }};
}

/// 呼び出し元の`Callsite`を作成する。
#[macro_export]
macro_rules! callsite {
    () => {
        $crate::Callsite::new(file!(), $crate::function_name!())
    };
}

/// 呼び出し元のファイル名と関数名を付けて出力する。
///
/// ```ignore
/// log_at!(logger, Level::Info, "Process {} started", num);
/// ```
#[macro_export]
macro_rules! log_at {
    ($logger:expr, $level:expr, $($arg:tt)+) => {
        $logger.log($level, $crate::callsite!(), format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::Level::Debug, $($arg)+) };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::Level::Info, $($arg)+) };
}

#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::Level::Warning, $($arg)+) };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::Level::Error, $($arg)+) };
}

#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $($arg:tt)+) => { $crate::log_at!($logger, $crate::Level::Critical, $($arg)+) };
}
