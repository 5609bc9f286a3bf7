//! コマンドハンドラー
//!
//! 記述子ファイルの `handler` キーは [`HandlerCatalog`] に登録された
//! 実装へ解決されます。

use crate::context::{CommandContext, ResponseError};
use crate::registry::RegistryError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// 汎用のエラーメッセージ（詳細はサーバーログにのみ出す）
pub const GENERIC_FAILURE_MESSAGE: &str = "コマンドの実行中にエラーが発生しました。";

/// ハンドラー実行エラー
#[derive(Debug, Error)]
pub enum CommandError {
    /// 入力内容の問題（メッセージをそのままユーザーに表示する）
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Response error: {0}")]
    Response(#[from] ResponseError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    /// ユーザーに表示するメッセージ
    pub fn user_message(&self) -> String {
        match self {
            CommandError::InvalidInput(msg) => format!("⚠️ {}", msg),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// ハンドラーの実行結果
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    /// この内容で応答する（応答状態に応じて返信・編集・フォローアップ）
    Message(String),
    /// ハンドラー自身が応答済み
    Handled,
}

impl CommandOutput {
    pub fn message(content: impl Into<String>) -> Self {
        CommandOutput::Message(content.into())
    }
}

/// Command handler trait - すべてのコマンド実装が実装する
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, ctx: &CommandContext) -> Result<CommandOutput, CommandError>;
}

/// ハンドラーキー -> 実装のカタログ
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// ハンドラーを登録
    pub fn register<H: CommandHandler + 'static>(&mut self, key: impl Into<String>, handler: H) {
        let key = key.into();
        info!("Registering command handler: {}", key);
        self.handlers.insert(key, Arc::new(handler));
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
