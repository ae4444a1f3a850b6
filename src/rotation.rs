//! ロガー作成時のローテーション
//!
//! ログファイルを開く前に、既存のファイルをサイズによって退避するか、古さによって空にするか、
//! そのまま追記するかを決定して実行する。2つのトリガーが両方とも成立する場合は、
//! `RotationPriority`で先に評価する方を選ぶ。
//!
//! ファイルシステムのエラーはすべて無視する。ローテーションの失敗によって、
//! ロガーの作成が失敗することはない。

use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use time::Duration;

use crate::{
    config::{OverwriteMode, RotationConfig, RotationPriority},
    locks::age,
};

/// ローテーションの判定に使う、既存のログファイルの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState {
    /// ファイルサイズ（バイト）
    pub size: u64,
    /// 最終更新からの経過時間
    pub age: Duration,
}

impl FileState {
    /// ファイルの状態を取得する。
    ///
    /// ファイルが存在しない場合は`None`を返却する。
    pub fn of(path: impl AsRef<Path>) -> Option<FileState> {
        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let age = metadata.modified().map(age).unwrap_or(Duration::ZERO);
        Some(FileState {
            size: metadata.len(),
            age,
        })
    }
}

/// 実行されたローテーション
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAction {
    /// 何もしない。既存のファイルにそのまま追記する。
    None,
    /// サイズによって退避した。
    Rollover,
    /// 古さによって空にした。
    Truncate,
}

/// 実行するローテーションを決定する。
///
/// # 引数
///
/// - state: 既存のログファイルの状態。ファイルが存在しない場合は`None`。
/// - config: ローテーションの設定。
///
/// # 戻り値
///
/// 実行するローテーション。
pub fn decide(state: Option<&FileState>, config: &RotationConfig) -> RotationAction {
    let Some(state) = state else {
        return RotationAction::None;
    };

    let size_trigger = config.size_enabled && state.size >= config.max_bytes;
    let time_trigger = config.time_enabled && state.age >= config.time_threshold();
    let time_action = match config.overwrite_mode {
        OverwriteMode::Truncate => RotationAction::Truncate,
    };

    match config.priority {
        RotationPriority::SizeFirst if size_trigger => RotationAction::Rollover,
        RotationPriority::SizeFirst if time_trigger => time_action,
        RotationPriority::TimeFirst if time_trigger => time_action,
        RotationPriority::TimeFirst if size_trigger => RotationAction::Rollover,
        _ => RotationAction::None,
    }
}

/// ログファイルの状態を調べて、ローテーションを実行する。
///
/// # 引数
///
/// - path: ログファイルのパス。
/// - config: ローテーションの設定。
///
/// # 戻り値
///
/// 実行したローテーション。個々の操作が失敗しても、決定したローテーションを返却する。
pub fn apply(path: impl AsRef<Path>, config: &RotationConfig) -> RotationAction {
    let path = path.as_ref();
    let action = decide(FileState::of(path).as_ref(), config);
    match action {
        RotationAction::None => {}
        RotationAction::Rollover => rollover(path, config.backup_count),
        RotationAction::Truncate => {
            if let Err(err) = truncate(path) {
                tracing::debug!(
                    path = %path.display(),
                    error = %err,
                    "failed to truncate log file"
                );
            }
        }
    }
    action
}

/// 退避ファイルのパスを返却する。
///
/// `app.log`の1番目の退避ファイルは`app.log.1`になる。
pub fn backup_path(path: impl AsRef<Path>, index: u32) -> PathBuf {
    let path = path.as_ref();
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}", index));
    path.with_file_name(name)
}

/// ログファイルを退避する。
///
/// 最も古い`.N`を削除し、`.1`から`.N-1`をそれぞれ1つずつ繰り下げ、
/// 現在のファイルを`.1`にする。処理後、元のパスにファイルは存在しない。
/// `backup_count`が`0`の場合は、退避せずに現在のファイルを削除する。
///
/// 個々の削除と名前の変更の失敗は無視する。
pub fn rollover(path: impl AsRef<Path>, backup_count: u32) {
    let path = path.as_ref();
    if backup_count == 0 {
        ignore(path, fs::remove_file(path));
        return;
    }

    let oldest = backup_path(path, backup_count);
    if oldest.exists() {
        ignore(&oldest, fs::remove_file(&oldest));
    }
    for index in (1..backup_count).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            ignore(&from, fs::rename(&from, backup_path(path, index + 1)));
        }
    }
    ignore(path, fs::rename(path, backup_path(path, 1)));
}

/// ログファイルを空にする。履歴は退避しない。
pub fn truncate(path: impl AsRef<Path>) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map(drop)
}

fn ignore(path: &Path, result: io::Result<()>) {
    if let Err(err) = result {
        tracing::debug!(path = %path.display(), error = %err, "log rotation step failed");
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, time::Duration as StdDuration, time::SystemTime};

    use tempfile::TempDir;

    use super::*;

    fn state(size: u64, age_minutes: i64) -> FileState {
        FileState {
            size,
            age: Duration::minutes(age_minutes),
        }
    }

    fn both(priority: RotationPriority) -> RotationConfig {
        RotationConfig::size(1000, 2)
            .with_time_overwrite(60)
            .with_priority(priority)
    }

    fn write_file(path: &Path, len: usize) {
        fs::write(path, vec![b'x'; len]).unwrap();
    }

    fn backups(path: &Path) -> Vec<u32> {
        (1..10).filter(|i| backup_path(path, *i).exists()).collect()
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            PathBuf::from("logs_dir/main_log.log.3"),
            backup_path("logs_dir/main_log.log", 3)
        );
    }

    #[test]
    fn test_missing_file_needs_no_action() {
        assert_eq!(RotationAction::None, decide(None, &both(RotationPriority::SizeFirst)));
    }

    #[test]
    fn test_single_triggers() {
        let config = both(RotationPriority::SizeFirst);
        assert_eq!(RotationAction::Rollover, decide(Some(&state(1000, 0)), &config));
        assert_eq!(RotationAction::Truncate, decide(Some(&state(10, 60)), &config));
        assert_eq!(RotationAction::None, decide(Some(&state(999, 59)), &config));
    }

    #[test]
    fn test_priority_when_both_fire() {
        let stale_and_large = state(1200, 120);
        assert_eq!(
            RotationAction::Rollover,
            decide(Some(&stale_and_large), &both(RotationPriority::SizeFirst))
        );
        assert_eq!(
            RotationAction::Truncate,
            decide(Some(&stale_and_large), &both(RotationPriority::TimeFirst))
        );
    }

    #[test]
    fn test_disabled_triggers() {
        let mut config = both(RotationPriority::TimeFirst);
        config.size_enabled = false;
        config.time_enabled = false;
        assert_eq!(RotationAction::None, decide(Some(&state(u64::MAX, 100_000)), &config));
    }

    #[test]
    fn test_future_mtime_is_not_stale() {
        let config = both(RotationPriority::TimeFirst);
        assert_eq!(RotationAction::None, decide(Some(&state(0, -5)), &config));
    }

    #[test]
    fn test_rollover_scenario() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main_log.log");
        write_file(&path, 1200);

        let action = apply(&path, &RotationConfig::size(1000, 2));

        assert_eq!(RotationAction::Rollover, action);
        assert!(!path.exists());
        assert_eq!(1200, fs::metadata(backup_path(&path, 1)).unwrap().len());
        assert!(!backup_path(&path, 2).exists());
    }

    #[test]
    fn test_rollover_shifts_and_evicts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");

        let rounds = [
            (1, vec![1]),
            (2, vec![1, 2]),
            (3, vec![1, 2, 3]),
            (4, vec![1, 2, 3]),
        ];
        for (round, expected) in rounds {
            write_file(&path, round);
            rollover(&path, 3);
            assert!(!path.exists());
            assert_eq!(expected, backups(&path));
        }

        // 新しいものほど番号が小さい
        assert_eq!(4, fs::metadata(backup_path(&path, 1)).unwrap().len());
        assert_eq!(3, fs::metadata(backup_path(&path, 2)).unwrap().len());
        assert_eq!(2, fs::metadata(backup_path(&path, 3)).unwrap().len());
    }

    #[test]
    fn test_rollover_without_backups_discards_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, 10);

        rollover(&path, 0);

        assert!(!path.exists());
        assert!(backups(&path).is_empty());
    }

    #[test]
    fn test_time_first_truncates_without_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, 1200);
        let modified = SystemTime::now() - StdDuration::from_secs(2 * 60 * 60);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();

        let action = apply(&path, &both(RotationPriority::TimeFirst));

        assert_eq!(RotationAction::Truncate, action);
        assert_eq!(0, fs::metadata(&path).unwrap().len());
        assert!(backups(&path).is_empty());
    }

    #[test]
    fn test_apply_is_noop_below_thresholds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, 10);

        assert_eq!(RotationAction::None, apply(&path, &both(RotationPriority::SizeFirst)));
        assert_eq!(10, fs::metadata(&path).unwrap().len());
    }
}
