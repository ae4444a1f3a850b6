//! Traced Rolling Logger
//!
//! ----------------------------------------------------------------------------
//!
//! このクレートは、システム情報（メモリ使用率）を付与したログを、ローテーションする
//! ログファイルに記録する。
//!
//! `get_logger`は、ロガーを作成する前に以下を行う。
//!
//! - 異常終了したプロセスが残した古いロックファイルを削除する
//! - 既存のログファイルを、サイズによって退避するか、古さによって空にするかを決定する
//!
//! ログの1行は、`時刻 $ レベル $ メモリ使用率 $ スレッド名 $ ファイル名 $ 関数名 $ メッセージ`
//! となる。スレッド名、ファイル名、関数名は非表示にできる。
//!
//! `Tracer`は、関数の引数、戻り値、エラーを記録する。記録されるファイル名と関数名は、
//! `Tracer`自身ではなく、記録する関数のものになる。
//!
//! 正常終了時とシグナルの受信時には、開いているログファイルを閉じて、ロックファイルを解放する。

pub mod appenders;
pub mod config;
pub mod error;
pub mod locks;
pub mod logger;
pub mod metrics;
pub mod record;
pub mod rotation;
pub mod shutdown;
pub mod tracer;

pub use appenders::RollingFileAppender;
pub use config::{LockCleanupConfig, LoggerConfig, OverwriteMode, RotationConfig, RotationPriority};
pub use error::{Error, Result};
pub use locks::cleanup_stale_locks;
pub use logger::{get_logger, get_logger_with, Logger, LoggerLayer};
pub use metrics::{Enricher, MemoryEnricher};
pub use record::{Callsite, Identity, Level, LineFormat, Record};
pub use rotation::RotationAction;
pub use shutdown::shutdown;
pub use tracer::{CallArgs, Tracer};
