//! コマンドレジストリ
//!
//! コマンド名 -> 記述子の対応を保持します。起動時に記述子ソースを走査して構築し、
//! `/reload` で個別または全体を再読み込みできます。
//!
//! ロックは読み書きともに短時間だけ保持し、`.await` をまたがない。
//! 置き換えは常に1回の書き込みロック内で行うため、読み手が中途半端な状態を見ることはない。

use crate::descriptor::{CommandDescriptor, DescriptorEntry};
use crate::handler::HandlerCatalog;
use crate::source::{CommandSource, SourceError, SourceId};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// レジストリエラー
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Failed to reload {name}: {reason}")]
    ReloadFailed { name: String, reason: String },
}

/// 読み込みで除外されたエントリ
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub origin: SourceId,
    /// 読み取れた場合のみ
    pub name: Option<String>,
    pub reason: String,
}

/// 読み込み結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedEntry>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// 挿入順を保つ名前 -> 記述子マップ
#[derive(Default)]
struct Entries {
    order: Vec<String>,
    by_name: HashMap<String, Arc<CommandDescriptor>>,
}

impl Entries {
    /// 既存の名前なら位置を保ったまま置き換える
    fn insert(&mut self, descriptor: Arc<CommandDescriptor>) -> Option<Arc<CommandDescriptor>> {
        let name = descriptor.name().to_string();
        let previous = self.by_name.insert(name.clone(), descriptor);
        if previous.is_none() {
            self.order.push(name);
        }
        previous
    }

    fn remove(&mut self, name: &str) -> Option<Arc<CommandDescriptor>> {
        let removed = self.by_name.remove(name);
        if removed.is_some() {
            self.order.retain(|n| n != name);
        }
        removed
    }

    fn snapshot(&self) -> Vec<Arc<CommandDescriptor>> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name).cloned())
            .collect()
    }
}

/// コマンドレジストリ
pub struct CommandRegistry {
    source: Arc<dyn CommandSource>,
    catalog: HandlerCatalog,
    entries: RwLock<Entries>,
}

impl CommandRegistry {
    /// 空のレジストリを作成（`load_all` で読み込む）
    pub fn new(source: Arc<dyn CommandSource>, catalog: HandlerCatalog) -> Self {
        Self {
            source,
            catalog,
            entries: RwLock::new(Entries::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// コマンドを取得
    pub fn get(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.read().by_name.get(name).cloned()
    }

    /// コマンドを登録（同名があれば置き換え）
    pub fn set(&self, descriptor: CommandDescriptor) -> Option<Arc<CommandDescriptor>> {
        debug!("Registering command: {}", descriptor.name());
        self.write().insert(Arc::new(descriptor))
    }

    /// コマンドを削除
    pub fn delete(&self, name: &str) -> bool {
        let removed = self.write().remove(name).is_some();
        if removed {
            debug!("Removed command: {}", name);
        }
        removed
    }

    /// 全コマンドのスナップショット（挿入順）
    pub fn all(&self) -> Vec<Arc<CommandDescriptor>> {
        self.read().snapshot()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    pub fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }

    /// ソース全体を読み込み、レジストリの内容を丸ごと置き換える
    ///
    /// 個々のファイルやエントリの失敗は `LoadReport::skipped` に記録して続行する。
    /// ソース自体を列挙できない場合のみエラーとなり、その場合レジストリは変更しない。
    pub async fn load_all(&self) -> Result<LoadReport, RegistryError> {
        let files = self.source.list().await.map_err(|e| {
            error!("Failed to list command descriptors: {}", e);
            e
        })?;

        let mut report = LoadReport::default();
        let mut fresh = Entries::default();
        let mut seen = HashSet::new();

        for id in files {
            let values = match self.source.read(&id).await {
                Ok(values) => values,
                Err(e) => {
                    error!("Failed to load command descriptor {}: {}", id, e);
                    report.skipped.push(SkippedEntry {
                        origin: id.clone(),
                        name: None,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for value in values {
                match self.build(&id, value) {
                    Ok(descriptor) => {
                        if !seen.insert(descriptor.name().to_string()) {
                            warn!(
                                "Duplicate command {} in {}, keeping the first definition",
                                descriptor.name(),
                                id
                            );
                            report.skipped.push(SkippedEntry {
                                origin: id.clone(),
                                name: Some(descriptor.name().to_string()),
                                reason: "duplicate command name".to_string(),
                            });
                            continue;
                        }
                        report.loaded.push(descriptor.name().to_string());
                        fresh.insert(Arc::new(descriptor));
                    }
                    Err(skipped) => {
                        warn!(
                            "Skipping command {} in {}: {}",
                            skipped.name.as_deref().unwrap_or("<unnamed>"),
                            id,
                            skipped.reason
                        );
                        report.skipped.push(skipped);
                    }
                }
            }
        }

        *self.write() = fresh;

        info!(
            "Loaded {} commands ({} skipped)",
            report.loaded.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// 1つのコマンドを再読み込み
    ///
    /// 失敗した場合、そのコマンドは古い定義のまま残らずレジストリから削除される。
    pub async fn reload(&self, name: &str) -> Result<Arc<CommandDescriptor>, RegistryError> {
        let known = self.get(name);
        let origin = known.as_ref().and_then(|d| d.origin.clone());

        let result = match origin {
            Some(origin) => self.reload_from(&origin, name).await,
            None => self.find_in_source(name).await,
        };

        self.commit_reload(name, known.as_ref(), result)
    }

    /// 再読み込み結果を反映
    ///
    /// 読み込み中に `load_all` や `set` で同名のエントリが差し替えられていた場合は、
    /// そちらを新しい定義として残し、この結果は捨てる。
    fn commit_reload(
        &self,
        name: &str,
        known: Option<&Arc<CommandDescriptor>>,
        result: Result<CommandDescriptor, RegistryError>,
    ) -> Result<Arc<CommandDescriptor>, RegistryError> {
        let mut entries = self.write();

        let current = entries.by_name.get(name).cloned();
        let unchanged = match (known, current.as_ref()) {
            (Some(before), Some(now)) => Arc::ptr_eq(before, now),
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            warn!(
                "Command {} changed while reloading, keeping the newer definition",
                name
            );
            return current.ok_or_else(|| RegistryError::NotFound(name.to_string()));
        }

        match result {
            Ok(descriptor) => {
                let descriptor = Arc::new(descriptor);
                entries.insert(descriptor.clone());
                info!("Reloaded command: {}", name);
                Ok(descriptor)
            }
            Err(e) => {
                if entries.remove(name).is_some() {
                    warn!("Removed command {} after failed reload: {}", name, e);
                } else {
                    warn!("Reload of {} failed: {}", name, e);
                }
                Err(e)
            }
        }
    }

    /// 既知の読み込み元から再読み込み
    async fn reload_from(&self, origin: &SourceId, name: &str) -> Result<CommandDescriptor, RegistryError> {
        let values = self.source.read(origin).await.map_err(|e| RegistryError::ReloadFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        for value in values {
            if declared_name(&value) != Some(name) {
                continue;
            }
            return self.build(origin, value).map_err(|skipped| RegistryError::ReloadFailed {
                name: name.to_string(),
                reason: skipped.reason,
            });
        }

        Err(RegistryError::ReloadFailed {
            name: name.to_string(),
            reason: format!("no longer declared in {}", origin),
        })
    }

    /// 読み込み元が不明なコマンドをソース全体から探す
    async fn find_in_source(&self, name: &str) -> Result<CommandDescriptor, RegistryError> {
        for id in self.source.list().await? {
            let values = match self.source.read(&id).await {
                Ok(values) => values,
                Err(e) => {
                    debug!("Skipping unreadable descriptor {} while searching: {}", id, e);
                    continue;
                }
            };
            if values.iter().any(|v| declared_name(v) == Some(name)) {
                return self.reload_from(&id, name).await;
            }
        }
        Err(RegistryError::NotFound(name.to_string()))
    }

    /// JSONエントリを検証し、ハンドラーを結び付ける
    fn build(&self, origin: &SourceId, value: JsonValue) -> Result<CommandDescriptor, SkippedEntry> {
        let name = declared_name(&value).map(str::to_string);
        let skipped = |reason: String| SkippedEntry {
            origin: origin.clone(),
            name: name.clone(),
            reason,
        };

        let entry: DescriptorEntry =
            serde_json::from_value(value).map_err(|e| skipped(e.to_string()))?;
        entry
            .schema
            .validate()
            .map_err(|e| skipped(e.to_string()))?;

        let handler = self
            .catalog
            .get(&entry.handler)
            .ok_or_else(|| skipped(format!("unknown handler: {}", entry.handler)))?;

        Ok(CommandDescriptor::new(entry.schema, handler).with_origin(origin.clone()))
    }
}

fn declared_name(value: &JsonValue) -> Option<&str> {
    value.get("name").and_then(JsonValue::as_str)
}
