//! コマンド記述子ソース
//!
//! 記述子ファイル（JSON）の列挙と読み込みを抽象化します。
//! 1ファイルに1つのオブジェクト、または複数をまとめた配列を置けます。

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// ソースエラー
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Command directory not found: {0}")]
    RootNotFound(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} must contain an object or an array of objects")]
    UnexpectedShape(String),
}

/// 記述子ファイルの識別子
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(PathBuf);

impl SourceId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// 記述子ソースtrait
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// 読み込み対象を決定的な順序で列挙
    async fn list(&self) -> Result<Vec<SourceId>, SourceError>;

    /// 1ファイル分の記述子（未検証のJSON）を読み込む
    async fn read(&self, id: &SourceId) -> Result<Vec<JsonValue>, SourceError>;
}

/// ディレクトリツリーを走査するソース
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SourceError {
    SourceError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl CommandSource for DirectorySource {
    async fn list(&self) -> Result<Vec<SourceId>, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::RootNotFound(self.root.display().to_string()));
        }

        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|e| io_error(&dir, e))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| io_error(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if path.extension().map_or(false, |ext| ext == "json") {
                    files.push(SourceId::new(path));
                } else {
                    debug!("Ignoring non-descriptor file {:?}", path);
                }
            }
        }

        files.sort();
        debug!("Found {} descriptor files under {:?}", files.len(), self.root);
        Ok(files)
    }

    async fn read(&self, id: &SourceId) -> Result<Vec<JsonValue>, SourceError> {
        let content = fs::read_to_string(id.path())
            .await
            .map_err(|e| io_error(id.path(), e))?;

        let value: JsonValue = serde_json::from_str(&content).map_err(|e| SourceError::Parse {
            path: id.to_string(),
            source: e,
        })?;

        match value {
            JsonValue::Object(_) => Ok(vec![value]),
            JsonValue::Array(items) => Ok(items),
            _ => Err(SourceError::UnexpectedShape(id.to_string())),
        }
    }
}
