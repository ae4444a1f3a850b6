//! ロガーの設定
//!
//! すべての項目に既定値があり、`serde`でTOMLなどから読み込める。

use std::path::PathBuf;

use serde::Deserialize;
use time::Duration;

use crate::record::{Level, LineFormat};

/// 既定のログディレクトリ
pub const DEFAULT_LOG_DIR: &str = "./logs_dir";

/// 既定のログファイル名（拡張子を除く）
pub const DEFAULT_LOG_FILE_NAME: &str = "main_log";

/// 既定のローテーションサイズ（50MiB）
pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// ロガーの設定
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// ログディレクトリ
    pub log_dir: PathBuf,
    /// ログディレクトリ内のサブディレクトリ
    pub log_sub_dir: PathBuf,
    /// ログファイル名
    ///
    /// この名前のファイルが既に存在する場合はそのパスをそのまま使い、
    /// 存在しない場合は`<log_dir>/<log_sub_dir>/<log_file_name>.log`を使う。
    pub log_file_name: String,
    /// 標準出力にも同じ行を出力する。
    pub console: bool,
    /// 出力する最小の重要度
    pub level: Level,
    pub hide_thread_name: bool,
    pub hide_file_name: bool,
    pub hide_func_name: bool,
    pub locks: LockCleanupConfig,
    pub rotation: RotationConfig,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_sub_dir: PathBuf::new(),
            log_file_name: DEFAULT_LOG_FILE_NAME.to_string(),
            console: false,
            level: Level::Debug,
            hide_thread_name: false,
            hide_file_name: false,
            hide_func_name: false,
            locks: LockCleanupConfig::default(),
            rotation: RotationConfig::default(),
        }
    }
}

impl LoggerConfig {
    /// ログファイル名を指定して、既定値の設定を作成する。
    pub fn new(log_file_name: impl Into<String>) -> Self {
        Self {
            log_file_name: log_file_name.into(),
            ..Self::default()
        }
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn with_sub_dir(mut self, log_sub_dir: impl Into<PathBuf>) -> Self {
        self.log_sub_dir = log_sub_dir.into();
        self
    }

    pub fn with_log_file_name(mut self, log_file_name: impl Into<String>) -> Self {
        self.log_file_name = log_file_name.into();
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// 最小の重要度を名前で指定する。認識できない名前は`debug`になる。
    pub fn with_level(mut self, level: impl Into<Level>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_locks(mut self, locks: LockCleanupConfig) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_rotation(mut self, rotation: RotationConfig) -> Self {
        self.rotation = rotation;
        self
    }

    /// 非表示フラグから出力行の書式を作成する。
    pub fn line_format(&self) -> LineFormat {
        LineFormat {
            thread_name: !self.hide_thread_name,
            file_name: !self.hide_file_name,
            func_name: !self.hide_func_name,
        }
    }

    /// ログファイルを作成するディレクトリを返却する。
    pub fn directory(&self) -> PathBuf {
        self.log_dir.join(&self.log_sub_dir)
    }
}

/// 古いロックファイルの掃除に関する設定
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockCleanupConfig {
    pub enabled: bool,
    /// PIDを読み取れないロックファイルを古いとみなすまでの時間（分）
    pub stale_minutes: u64,
    /// 削除や失敗を`tracing`に出力する。
    pub verbose: bool,
}

impl Default for LockCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_minutes: 30,
            verbose: false,
        }
    }
}

/// 2つのトリガーが両方とも成立する場合に、先に評価する方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPriority {
    #[default]
    SizeFirst,
    TimeFirst,
}

/// 古いファイルの上書き方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteMode {
    /// 退避せずに空にする。
    #[default]
    Truncate,
}

/// ロガー作成時のローテーションに関する設定
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub size_enabled: bool,
    pub max_bytes: u64,
    /// 残す退避ファイルの数
    pub backup_count: u32,
    pub time_enabled: bool,
    /// 最終更新からこの時間（分）が経過したファイルを上書きする。
    pub time_stale_minutes: u64,
    pub overwrite_mode: OverwriteMode,
    pub priority: RotationPriority,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            size_enabled: true,
            max_bytes: DEFAULT_MAX_BYTES,
            backup_count: 4,
            time_enabled: false,
            time_stale_minutes: 24 * 60,
            overwrite_mode: OverwriteMode::Truncate,
            priority: RotationPriority::SizeFirst,
        }
    }
}

impl RotationConfig {
    /// サイズによるローテーションだけを有効にした設定を作成する。
    pub fn size(max_bytes: u64, backup_count: u32) -> Self {
        Self {
            size_enabled: true,
            max_bytes,
            backup_count,
            time_enabled: false,
            ..Self::default()
        }
    }

    pub fn with_time_overwrite(mut self, stale_minutes: u64) -> Self {
        self.time_enabled = true;
        self.time_stale_minutes = stale_minutes;
        self
    }

    pub fn with_priority(mut self, priority: RotationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn time_threshold(&self) -> Duration {
        minutes(self.time_stale_minutes)
    }

    /// 出力先に設定するサイズの上限
    ///
    /// サイズによるローテーションが無効の場合は`0`で、出力先はローテーションしない。
    pub fn appender_max_bytes(&self) -> u64 {
        if self.size_enabled {
            self.max_bytes
        } else {
            0
        }
    }
}

/// 分を`Duration`に変換する。
///
/// `Duration`で表せない値は、表せる最大の分数に切り詰める。
pub(crate) fn minutes(value: u64) -> Duration {
    let value = i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 60);
    Duration::minutes(value)
}
