//! ディスパッチ統計
//!
//! HTTP APIの `/api/stats` で公開する。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// ディスパッチ結果の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    Completed,
    Failed,
    NotFound,
}

/// ディスパッチ統計
pub struct DispatchStats {
    started_at: DateTime<Utc>,
    completed: AtomicU64,
    failed: AtomicU64,
    not_found: AtomicU64,
    late_acks: AtomicU64,
    per_command: Mutex<BTreeMap<String, u64>>,
    last_dispatch_at: Mutex<Option<DateTime<Utc>>>,
}

/// 統計のスナップショット
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub started_at: String,
    pub uptime_secs: i64,
    pub completed: u64,
    pub failed: u64,
    pub not_found: u64,
    pub late_acks: u64,
    pub per_command: BTreeMap<String, u64>,
    pub last_dispatch_at: Option<String>,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            late_acks: AtomicU64::new(0),
            per_command: Mutex::new(BTreeMap::new()),
            last_dispatch_at: Mutex::new(None),
        }
    }

    /// 1件のディスパッチを記録
    pub fn record(&self, command: &str, kind: DispatchKind) {
        let counter = match kind {
            DispatchKind::Completed => &self.completed,
            DispatchKind::Failed => &self.failed,
            DispatchKind::NotFound => &self.not_found,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        // 未登録コマンドの名前は集計しない（任意の文字列が来うるため）
        if kind != DispatchKind::NotFound {
            let mut per_command = self.per_command.lock().unwrap_or_else(PoisonError::into_inner);
            *per_command.entry(command.to_string()).or_insert(0) += 1;
        }

        *self.last_dispatch_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    /// 応答期限を過ぎた（または応答しなかった）ディスパッチを記録
    pub fn record_late_ack(&self) {
        self.late_acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.not_found.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Utc::now();
        StatsSnapshot {
            started_at: self.started_at.to_rfc3339(),
            uptime_secs: (now - self.started_at).num_seconds(),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            late_acks: self.late_acks.load(Ordering::Relaxed),
            per_command: self
                .per_command
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            last_dispatch_at: self
                .last_dispatch_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .map(|at| at.to_rfc3339()),
        }
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}
