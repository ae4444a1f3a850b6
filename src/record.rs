//! ログレコードと出力行の書式

use std::{borrow::Cow, fmt, path::Path};

use serde::Deserialize;
use time::{macros::format_description, OffsetDateTime};

/// ログの重要度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(from = "String")]
pub enum Level {
    #[default]
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    /// 出力行に表示するレベル名を返却する。
    pub fn name(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    /// レベル名からレベルを取得する。
    ///
    /// 大文字と小文字は区別しない。認識できない名前は、最も緩い`Debug`になる。
    pub fn from_name(name: &str) -> Level {
        match name.trim().to_ascii_lowercase().as_str() {
            "info" => Level::Info,
            "warning" => Level::Warning,
            "error" => Level::Error,
            "critical" => Level::Critical,
            _ => Level::Debug,
        }
    }
}

impl From<&str> for Level {
    fn from(name: &str) -> Self {
        Level::from_name(name)
    }
}

impl From<String> for Level {
    fn from(name: String) -> Self {
        Level::from_name(&name)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::INFO => Level::Info,
            _ => Level::Debug,
        }
    }
}

/// ログを出力した場所
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callsite {
    /// ソースファイル名（ディレクトリを除く）
    pub file_name: Cow<'static, str>,
    /// 関数名
    pub func_name: Cow<'static, str>,
}

impl Callsite {
    /// `Callsite`を作成する。
    ///
    /// # 引数
    ///
    /// - file: ソースファイルのパス。ディレクトリ部分は取り除かれる。
    /// - func_name: 関数名。
    pub fn new(file: &str, func_name: impl Into<Cow<'static, str>>) -> Callsite {
        Callsite {
            file_name: Cow::Owned(base_name(file)),
            func_name: func_name.into(),
        }
    }

    /// 呼び出し元のソースファイルから`Callsite`を作成する。
    ///
    /// 関数名は実行時に取得できないため`-`になる。
    #[track_caller]
    pub fn caller() -> Callsite {
        Callsite::new(std::panic::Location::caller().file(), "-")
    }
}

/// 出力する側が指定する、呼び出し元の上書き
///
/// 設定された項目は、実際の`Callsite`の代わりに出力される。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub file_name: Option<String>,
    pub func_name: Option<String>,
}

impl Identity {
    pub fn new(file_name: impl Into<String>, func_name: impl Into<String>) -> Identity {
        Identity {
            file_name: Some(file_name.into()),
            func_name: Some(func_name.into()),
        }
    }

    fn is_empty(&self) -> bool {
        self.file_name.is_none() && self.func_name.is_none()
    }
}

/// 出力される1件のログ
#[derive(Debug, Clone)]
pub struct Record {
    pub timestamp: OffsetDateTime,
    pub level: Level,
    /// 出力時点のメモリ使用率（%）
    pub mem_percent: f64,
    pub thread_name: String,
    pub callsite: Callsite,
    pub identity: Option<Identity>,
    pub message: String,
}

impl Record {
    /// 現在時刻と現在のスレッドで`Record`を作成する。
    ///
    /// `mem_percent`は`0.0`で初期化され、`Enricher`が設定する。
    pub fn new(level: Level, callsite: Callsite, message: impl Into<String>) -> Record {
        Record {
            timestamp: now(),
            level,
            mem_percent: 0.0,
            thread_name: std::thread::current()
                .name()
                .unwrap_or("<unnamed>")
                .to_string(),
            callsite,
            identity: None,
            message: message.into(),
        }
    }

    /// 呼び出し元の上書きを設定する。
    pub fn with_identity(mut self, identity: Identity) -> Record {
        if !identity.is_empty() {
            self.identity = Some(identity);
        }
        self
    }

    /// 上書きを考慮したファイル名を返却する。
    pub fn file_name(&self) -> &str {
        self.identity
            .as_ref()
            .and_then(|identity| identity.file_name.as_deref())
            .unwrap_or(&self.callsite.file_name)
    }

    /// 上書きを考慮した関数名を返却する。
    pub fn func_name(&self) -> &str {
        self.identity
            .as_ref()
            .and_then(|identity| identity.func_name.as_deref())
            .unwrap_or(&self.callsite.func_name)
    }
}

/// 出力行の書式
///
/// 時刻、レベル、メモリ使用率、メッセージは常に出力される。
/// スレッド名、ファイル名、関数名は個別に非表示にできる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineFormat {
    pub thread_name: bool,
    pub file_name: bool,
    pub func_name: bool,
}

impl Default for LineFormat {
    fn default() -> Self {
        Self {
            thread_name: true,
            file_name: true,
            func_name: true,
        }
    }
}

impl LineFormat {
    /// レコードを1行に整形する。末尾に改行を含む。
    ///
    /// `timestamp $ LEVEL      $ 12.3 $ thread $ file $ func $ message`
    pub fn format(&self, record: &Record) -> String {
        let mut fields = vec![
            format_timestamp(&record.timestamp),
            format!("{:<10}", record.level),
            format!("{:.1}", record.mem_percent),
        ];
        if self.thread_name {
            fields.push(record.thread_name.clone());
        }
        if self.file_name {
            fields.push(record.file_name().to_string());
        }
        if self.func_name {
            fields.push(record.func_name().to_string());
        }
        fields.push(record.message.clone());

        let mut line = fields.join(" $ ");
        line.push('\n');
        line
    }
}

/// パスからファイル名部分を取り出す。
pub(crate) fn base_name(file: &str) -> String {
    Path::new(file)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

/// 現在時刻を返却する。
///
/// ローカルのオフセットを取得できない環境では、UTCになる。
fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn format_timestamp(timestamp: &OffsetDateTime) -> String {
    let format = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second],[subsecond digits:3]"
    );
    timestamp
        .format(&format)
        .unwrap_or_else(|_| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use time::{format_description, PrimitiveDateTime};

    use super::*;

    fn record() -> Record {
        let format =
            format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]").unwrap();
        let timestamp = PrimitiveDateTime::parse("2022-05-26 15:25:32", &format)
            .unwrap()
            .assume_utc();
        Record {
            timestamp,
            level: Level::Info,
            mem_percent: 42.06,
            thread_name: "worker".to_string(),
            callsite: Callsite::new("src/service/calc.rs", "add"),
            identity: None,
            message: "hello".to_string(),
        }
    }

    #[test]
    fn test_level_from_name() {
        assert_eq!(Level::Warning, Level::from_name("WARNING"));
        assert_eq!(Level::Critical, Level::from_name("critical"));
        assert_eq!(Level::Info, Level::from_name(" info "));
        assert_eq!(Level::Debug, Level::from_name("verbose"));
        assert_eq!(Level::Debug, Level::from_name(""));
    }

    #[test]
    fn test_level_order() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Error < Level::Critical);
    }

    #[test]
    fn test_format_all_fields() {
        let line = LineFormat::default().format(&record());
        assert_eq!(
            "2022-05-26 15:25:32,000 $ INFO       $ 42.1 $ worker $ calc.rs $ add $ hello\n",
            line
        );
    }

    #[test]
    fn test_format_hidden_fields() {
        let format = LineFormat {
            thread_name: false,
            file_name: true,
            func_name: false,
        };
        let line = format.format(&record());
        assert_eq!(
            "2022-05-26 15:25:32,000 $ INFO       $ 42.1 $ calc.rs $ hello\n",
            line
        );
    }

    #[test]
    fn test_identity_override() {
        let record = record().with_identity(Identity::new("main.rs", "divide"));
        assert_eq!("main.rs", record.file_name());
        assert_eq!("divide", record.func_name());

        let partial = Identity {
            file_name: None,
            func_name: Some("task".to_string()),
        };
        let record = self::record().with_identity(partial);
        assert_eq!("calc.rs", record.file_name());
        assert_eq!("task", record.func_name());
    }

    #[test]
    fn test_empty_identity_is_ignored() {
        let record = record().with_identity(Identity::default());
        assert!(record.identity.is_none());
    }

    #[test]
    fn test_callsite_caller() {
        let callsite = Callsite::caller();
        assert_eq!("record.rs", callsite.file_name);
        assert_eq!("-", callsite.func_name);
    }
}
