//! システム情報によるレコードの補強
//!
//! 出力されるすべてのレコードに、出力時点のメモリ使用率を付与する。
//! 補強する関数はロガー作成時に明示的に渡され、ロガーごとに保持される。

use std::sync::{LazyLock, Mutex, PoisonError};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

use crate::record::Record;

/// レコードを出力直前に補強する。
pub trait Enricher: Send + Sync {
    fn enrich(&self, record: &mut Record);
}

impl<F> Enricher for F
where
    F: Fn(&mut Record) + Send + Sync,
{
    fn enrich(&self, record: &mut Record) {
        self(record)
    }
}

/// メモリ使用率を付与する`Enricher`
///
/// 出力のたびにメモリ情報を更新する。値はキャッシュしない。
pub struct MemoryEnricher {
    system: Mutex<System>,
}

impl MemoryEnricher {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// 現在のメモリ使用率（%）を返却する。
    pub fn memory_percent(&self) -> f64 {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(system.available_memory());
        used as f64 / total as f64 * 100.0
    }
}

impl Default for MemoryEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl Enricher for MemoryEnricher {
    fn enrich(&self, record: &mut Record) {
        record.mem_percent = self.memory_percent();
    }
}

static LIVENESS: LazyLock<Mutex<System>> = LazyLock::new(|| Mutex::new(System::new()));

/// 指定されたPIDのプロセスが生存しているか確認する。
///
/// ゾンビプロセスは終了したものとみなす。
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = LIVENESS.lock().unwrap_or_else(PoisonError::into_inner);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Callsite, Level};

    #[test]
    fn test_memory_percent_in_range() {
        let percent = MemoryEnricher::new().memory_percent();
        assert!((0.0..=100.0).contains(&percent));
    }

    #[test]
    fn test_closure_enricher() {
        let enricher = |record: &mut Record| record.mem_percent = 12.5;
        let mut record = Record::new(Level::Info, Callsite::caller(), "message");
        enricher.enrich(&mut record);
        assert_eq!(12.5, record.mem_percent);
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn test_unknown_pid_is_dead() {
        assert!(!process_alive(2_000_000_000));
    }
}
