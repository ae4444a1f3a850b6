//! 古いロックファイルの掃除
//!
//! 異常終了したプロセスが残したロックファイルは、同じログファイルへの以降の書き込みを
//! 妨げる。ロガーを作成するたびに、ログディレクトリ内のロックファイルを調べて、
//! 所有者が存在しないもの、または古いものを削除する。

use std::{fs, io, path::Path, sync::LazyLock, time::SystemTime};

use regex::Regex;
use time::{Duration, OffsetDateTime};

use crate::{config::minutes, metrics::process_alive};

/// ロックファイル名のパターン
static LOCK_FILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+\.lock$").expect("lock file pattern is valid"));

/// ロックファイルの判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Remove,
    Keep,
}

/// ディレクトリ内の古いロックファイルを削除する。
///
/// # 引数
///
/// - directory: ロックファイルを探すディレクトリ。
/// - stale_minutes: PIDを読み取れないロックファイルを古いとみなすまでの時間（分）。
/// - verbose: 削除したファイルと失敗を`tracing`に出力する。
///
/// # 戻り値
///
/// 削除したロックファイルの数。エラーは返却しない。
pub fn cleanup_stale_locks(
    directory: impl AsRef<Path>,
    stale_minutes: u64,
    verbose: bool,
) -> usize {
    let directory = directory.as_ref();
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) => {
            if verbose {
                tracing::warn!(
                    directory = %directory.display(),
                    error = %err,
                    "failed to scan for lock files"
                );
            }
            return 0;
        }
    };

    let threshold = minutes(stale_minutes);
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_lock = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| LOCK_FILE_PATTERN.is_match(name));
        if !is_lock || !path.is_file() {
            continue;
        }

        match inspect(&path, threshold).and_then(|verdict| {
            if verdict == Verdict::Remove {
                fs::remove_file(&path)?;
            }
            Ok(verdict)
        }) {
            Ok(Verdict::Remove) => {
                removed += 1;
                if verbose {
                    tracing::info!(path = %path.display(), "removed stale lock file");
                }
            }
            Ok(Verdict::Keep) => {}
            Err(err) => {
                if verbose {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to clean up lock file"
                    );
                }
            }
        }
    }

    removed
}

/// ロックファイルを削除するか判定する。
///
/// PIDを読み取れた場合はプロセスの生存だけで判定し、ファイルの古さは考慮しない。
fn inspect(path: &Path, threshold: Duration) -> io::Result<Verdict> {
    let contents = fs::read(path)?;
    let contents = String::from_utf8_lossy(&contents);

    let verdict = match parse_pid(&contents) {
        Some(pid) if process_alive(pid) => Verdict::Keep,
        Some(_) => Verdict::Remove,
        None => {
            let modified = fs::metadata(path)?.modified()?;
            if age(modified) > threshold {
                Verdict::Remove
            } else {
                Verdict::Keep
            }
        }
    };
    Ok(verdict)
}

/// 空白で区切られたトークンのうち、最初に正の整数として読み取れるものを返却する。
fn parse_pid(contents: &str) -> Option<u32> {
    contents
        .split_whitespace()
        .filter_map(|token| token.parse::<u32>().ok())
        .find(|pid| *pid > 0)
}

/// 更新日時からの経過時間
///
/// 更新日時が未来の場合は負になる。
pub(crate) fn age(modified: SystemTime) -> Duration {
    OffsetDateTime::now_utc() - OffsetDateTime::from(modified)
}

#[cfg(test)]
mod tests {
    use std::{fs::File, time::Duration as StdDuration};

    use tempfile::TempDir;

    use super::*;

    const DEAD_PID: u32 = 2_000_000_000;

    fn write_lock(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn set_age(path: &Path, minutes: u64) {
        let modified = SystemTime::now() - StdDuration::from_secs(minutes * 60);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    #[test]
    fn test_parse_pid() {
        assert_eq!(Some(1234), parse_pid("1234"));
        assert_eq!(Some(42), parse_pid("pid: 42\nhost"));
        assert_eq!(Some(7), parse_pid("0 -3 abc 7 8"));
        assert_eq!(None, parse_pid(""));
        assert_eq!(None, parse_pid("owner=unknown"));
    }

    #[test]
    fn test_live_pid_is_kept_regardless_of_age() {
        let dir = TempDir::new().unwrap();
        let path = write_lock(&dir, "main_log.log.lock", &std::process::id().to_string());
        set_age(&path, 24 * 60);

        assert_eq!(0, cleanup_stale_locks(dir.path(), 30, false));
        assert!(path.exists());
    }

    #[test]
    fn test_dead_pid_is_removed_regardless_of_age() {
        let dir = TempDir::new().unwrap();
        let path = write_lock(&dir, "main_log.log.lock", &DEAD_PID.to_string());

        assert_eq!(1, cleanup_stale_locks(dir.path(), 30, false));
        assert!(!path.exists());
    }

    #[test]
    fn test_unparseable_lock_removed_only_when_old() {
        let dir = TempDir::new().unwrap();
        let fresh = write_lock(&dir, "fresh.log.lock", "garbage");
        let old = write_lock(&dir, "old.log.lock", "");
        set_age(&old, 31);

        assert_eq!(1, cleanup_stale_locks(dir.path(), 30, true));
        assert!(fresh.exists());
        assert!(!old.exists());
    }

    #[test]
    fn test_huge_stale_minutes_keeps_unparseable_lock() {
        let dir = TempDir::new().unwrap();
        let path = write_lock(&dir, "old.log.lock", "garbage");
        set_age(&path, 24 * 60);

        assert_eq!(0, cleanup_stale_locks(dir.path(), 200_000_000_000_000_000, false));
        assert_eq!(0, cleanup_stale_locks(dir.path(), u64::MAX, false));
        assert!(path.exists());
    }

    #[test]
    fn test_other_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let log = write_lock(&dir, "main_log.log", &DEAD_PID.to_string());
        let hidden = write_lock(&dir, "main_log.lock.bak", &DEAD_PID.to_string());
        fs::create_dir(dir.path().join("nested.lock")).unwrap();

        assert_eq!(0, cleanup_stale_locks(dir.path(), 0, false));
        assert!(log.exists());
        assert!(hidden.exists());
        assert!(dir.path().join("nested.lock").is_dir());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_lock(&dir, "a.log.lock", &DEAD_PID.to_string());
        let old = write_lock(&dir, "b.log.lock", "");
        set_age(&old, 120);
        write_lock(&dir, "c.log.lock", &std::process::id().to_string());

        assert_eq!(2, cleanup_stale_locks(dir.path(), 30, false));
        assert_eq!(0, cleanup_stale_locks(dir.path(), 30, false));
        assert!(dir.path().join("c.log.lock").exists());
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert_eq!(0, cleanup_stale_locks(dir.path().join("missing"), 30, true));
    }
}
