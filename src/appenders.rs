use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing_subscriber::fmt::MakeWriter;

use crate::{
    error::{Error, Result},
    rotation,
};

/// ロックを取得する最大試行回数
///
/// ロック取得中にロックファイルが削除された場合は、開き直して再試行する。
const MAX_LOCK_ATTEMPTS: usize = 16;

/// 複数のプロセスから安全に書き込めるログファイル
///
/// ログファイルと同じディレクトリに`<path>.lock`を作成して、書き込みのたびに排他ロックを取得する。
/// ロックファイルはパスから毎回開き直すため、同じパスの出力先はすべて同じロックファイルを使う。
/// ロックファイルには、最後にロックを取得したプロセスのPIDが記録される。
/// `max_bytes`が`0`より大きい場合、書き込み前にサイズを確認してローテーションする。
///
/// `tracing-subscriber`の`MakeWriter`を実装しているため、`fmt`レイヤーの出力先にもできる。
#[derive(Debug)]
pub struct RollingFileAppender {
    path: PathBuf,
    lock_path: PathBuf,
    max_bytes: u64,
    backup_count: u32,
    closed: Mutex<bool>,
}

/// `RollingFileAppender`への書き込み
///
/// 最初の書き込みでロックを取得して、ドロップ時に解放する。
#[derive(Debug)]
pub struct RollingWriter<'a> {
    appender: &'a RollingFileAppender,
    closed: MutexGuard<'a, bool>,
    lock: Option<File>,
}

impl RollingFileAppender {
    /// `RollingFileAppender`を作成する。
    ///
    /// # Arguments
    ///
    /// * path: ログファイルのパス。
    /// * max_bytes: ローテーションするファイルサイズ。`0`の場合はローテーションしない。
    /// * backup_count: 残す退避ファイルの数。
    ///
    /// # Returns
    ///
    /// `RollingFileAppender`インスタンス。ログファイルまたはロックファイルを作成できない場合はエラー。
    pub fn new(
        path: impl AsRef<Path>,
        max_bytes: u64,
        backup_count: u32,
    ) -> Result<RollingFileAppender> {
        let path = path.as_ref().to_path_buf();
        let lock_path = create_lock_filepath(&path);

        create_writer(&path).map_err(|source| Error::OpenDestination {
            path: path.clone(),
            source,
        })?;
        acquire_lock(&lock_path).map_err(|source| Error::LockFile {
            path: lock_path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            lock_path,
            max_bytes,
            backup_count,
            closed: Mutex::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn is_closed(&self) -> bool {
        *self.guard()
    }

    /// 出力先を閉じる。
    ///
    /// 排他ロックを取得した状態で、ロックファイルがこのプロセスのPIDを記録している場合だけ削除する。
    /// 同じパスの他の出力先は、次の書き込みでロックファイルを作り直す。
    /// 2回目以降の呼び出しは何もしない。閉じた後の書き込みは破棄される。
    pub fn close(&self) {
        let mut closed = self.guard();
        if *closed {
            return;
        }
        *closed = true;

        let Ok(Some(mut lock)) = lock_exclusive(&self.lock_path, false) else {
            return;
        };
        let mut contents = String::new();
        let owned = lock
            .read_to_string(&mut contents)
            .map(|_| contents.trim() == std::process::id().to_string())
            .unwrap_or(false);
        if owned {
            let _ = fs::remove_file(&self.lock_path);
        }
        drop(lock);
    }

    fn guard(&self) -> MutexGuard<'_, bool> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 書き込むとファイルサイズの上限に達する場合は、ローテーションする。
    fn roll_if_needed(&self, incoming: usize) {
        if self.max_bytes == 0 {
            return;
        }
        let size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if size > 0 && size + incoming as u64 >= self.max_bytes {
            rotation::rollover(&self.path, self.backup_count);
        }
    }
}

impl Drop for RollingFileAppender {
    fn drop(&mut self) {
        self.close();
    }
}

impl<'a> MakeWriter<'a> for RollingFileAppender {
    type Writer = RollingWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RollingWriter {
            appender: self,
            closed: self.guard(),
            lock: None,
        }
    }
}

impl Write for RollingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if *self.closed {
            return Ok(buf.len());
        }
        if self.lock.is_none() {
            self.lock = Some(acquire_lock(&self.appender.lock_path)?);
        }
        self.appender.roll_if_needed(buf.len());
        // 他のプロセスがローテーションした可能性があるため、ロック中に開き直す
        create_writer(&self.appender.path)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RollingWriter<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let _ = lock.unlock();
        }
    }
}

/// ロックファイルパスを作成して返却する。
///
/// ロックファイル名は、`{ログファイル名}.lock`となる。
fn create_lock_filepath(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// ライターを作成する。
///
/// # 引数
///
/// * path: ログファイルパス。
///
/// # 戻り値
///
/// `File`インスタンス。
fn create_writer(path: &Path) -> io::Result<File> {
    let mut open_options = OpenOptions::new();
    open_options.append(true).create(true);

    let new_file = open_options.open(path);
    if new_file.is_err() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            return open_options.open(path);
        }
    }

    new_file
}

/// ロックファイルの排他ロックを取得して、このプロセスのPIDを書き込む。
///
/// ロックファイルが存在しない場合は作成する。
fn acquire_lock(path: &Path) -> io::Result<File> {
    let mut lock = lock_exclusive(path, true)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "lock file disappeared"))?;
    lock.set_len(0)?;
    lock.write_all(std::process::id().to_string().as_bytes())?;
    Ok(lock)
}

/// ロックファイルを開いて、排他ロックを取得する。
///
/// ロックの取得を待つ間に、ロックファイルが削除されたり作り直されたりした場合は開き直す。
/// `create`が`false`でロックファイルが存在しない場合は`None`を返却する。
fn lock_exclusive(path: &Path, create: bool) -> io::Result<Option<File>> {
    for _ in 0..MAX_LOCK_ATTEMPTS {
        let lock = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)
        {
            Ok(lock) => lock,
            Err(err) if !create && err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        lock.lock()?;
        if is_same_file(&lock, path) {
            return Ok(Some(lock));
        }
    }
    Err(io::Error::other("lock file keeps being replaced"))
}

/// 開いているファイルが、現在そのパスにあるファイルか確認する。
#[cfg(unix)]
fn is_same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(opened), Ok(current)) => {
            opened.dev() == current.dev() && opened.ino() == current.ino()
        }
        _ => false,
    }
}

/// 開いているファイルは削除できないため、パスの存在だけを確認する。
#[cfg(not(unix))]
fn is_same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}
