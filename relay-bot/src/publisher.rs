//! コマンド公開
//!
//! レジストリの記述子をDiscordへ一括登録します。登録は常に全置換で、
//! 今回のセットに含まれないコマンドはプラットフォーム側から消えます。

use crate::descriptor::{ApplicationCommandPayload, CommandDescriptor};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Discord REST APIのベースURL
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// 公開エラー
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Platform rejected commands ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Platform error: {0}")]
    Platform(String),
}

/// 公開先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishScope {
    /// 全サーバー
    Global,
    /// 単一サーバー（テスト用サーバーなど）
    Guild(u64),
}

impl fmt::Display for PublishScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishScope::Global => write!(f, "global"),
            PublishScope::Guild(id) => write!(f, "guild {}", id),
        }
    }
}

/// コマンド一括登録のREST境界
#[async_trait]
pub trait CommandRegistrar: Send + Sync {
    /// 指定スコープのコマンドを丸ごと置き換え、登録後の件数を返す
    async fn bulk_overwrite(
        &self,
        scope: PublishScope,
        commands: &[ApplicationCommandPayload],
    ) -> Result<usize, PublishError>;
}

/// 記述子をワイヤーフォーマットに変換
pub fn build_payloads(descriptors: &[Arc<CommandDescriptor>]) -> Vec<ApplicationCommandPayload> {
    descriptors.iter().map(|d| d.schema.to_payload()).collect()
}

/// レジストリの内容を公開
pub async fn publish(
    registrar: &dyn CommandRegistrar,
    descriptors: &[Arc<CommandDescriptor>],
    scope: PublishScope,
) -> Result<usize, PublishError> {
    let payloads = build_payloads(descriptors);
    debug!("Publishing {} commands to {}", payloads.len(), scope);

    match registrar.bulk_overwrite(scope, &payloads).await {
        Ok(count) => {
            info!("Published {} commands to {}", count, scope);
            Ok(count)
        }
        Err(e) => {
            error!("Failed to publish commands to {}: {}", scope, e);
            Err(e)
        }
    }
}

/// reqwestで直接REST APIを叩く登録クライアント
pub struct RestRegistrar {
    client: Client,
    base_url: String,
    token: String,
    application_id: u64,
}

impl RestRegistrar {
    pub fn new(token: impl Into<String>, application_id: u64) -> Self {
        Self::with_base_url(DISCORD_API_BASE, token, application_id)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>, application_id: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            application_id,
        }
    }

    /// スコープごとのエンドポイント
    pub fn endpoint(&self, scope: PublishScope) -> String {
        match scope {
            PublishScope::Global => {
                format!("{}/applications/{}/commands", self.base_url, self.application_id)
            }
            PublishScope::Guild(guild_id) => format!(
                "{}/applications/{}/guilds/{}/commands",
                self.base_url, self.application_id, guild_id
            ),
        }
    }
}

#[async_trait]
impl CommandRegistrar for RestRegistrar {
    async fn bulk_overwrite(
        &self,
        scope: PublishScope,
        commands: &[ApplicationCommandPayload],
    ) -> Result<usize, PublishError> {
        let resp = self
            .client
            .put(self.endpoint(scope))
            .header("Authorization", format!("Bot {}", self.token))
            .json(commands)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let registered: Vec<serde_json::Value> = resp.json().await?;
        Ok(registered.len())
    }
}
