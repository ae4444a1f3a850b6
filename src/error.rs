//! エラー型
//!
//! ロガー作成時に呼び出し元へ返却されるのは、出力先を取り付けられなかった場合だけである。
//! ロックファイルの掃除やローテーションの失敗は、内部で握りつぶされる。

use std::{io, path::PathBuf};

/// このクレートの`Result`型
pub type Result<T> = std::result::Result<T, Error>;

/// ロガー作成時のエラー
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// ログファイルを追記モードで開けなかった
    #[error("failed to open log file {path}: {source}")]
    OpenDestination {
        /// 開こうとしたログファイルのパス
        path: PathBuf,
        /// 原因となったエラー
        source: io::Error,
    },

    /// ロックファイルを作成できなかった
    #[error("failed to create lock file {path}: {source}")]
    LockFile {
        /// 作成しようとしたロックファイルのパス
        path: PathBuf,
        /// 原因となったエラー
        source: io::Error,
    },
}

impl Error {
    /// エラーの原因となったファイルのパスを返却する。
    pub fn path(&self) -> &std::path::Path {
        match self {
            Error::OpenDestination { path, .. } | Error::LockFile { path, .. } => path,
        }
    }
}
