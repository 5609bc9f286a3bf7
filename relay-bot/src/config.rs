//! 環境変数からの設定読み込み

use crate::publisher::PublishScope;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 記述子ディレクトリのデフォルト
pub const DEFAULT_COMMANDS_DIR: &str = "commands";
/// HTTP APIのデフォルトポート
pub const DEFAULT_API_PORT: u16 = 3000;

/// 設定エラー
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// ボット設定
#[derive(Clone)]
pub struct BotConfig {
    pub discord_token: String,
    /// 省略時はready時に取得したIDを使う
    pub application_id: Option<u64>,
    /// 指定するとそのサーバーにのみコマンドを公開する
    pub guild_id: Option<u64>,
    pub commands_dir: PathBuf,
    /// `/reload` などを実行できるユーザー（空なら権限設定のみで判断）
    pub admin_user_ids: HashSet<u64>,
    pub api_port: u16,
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // トークンは出力しない
        f.debug_struct("BotConfig")
            .field("application_id", &self.application_id)
            .field("guild_id", &self.guild_id)
            .field("commands_dir", &self.commands_dir)
            .field("admin_user_ids", &self.admin_user_ids)
            .field("api_port", &self.api_port)
            .finish_non_exhaustive()
    }
}

impl BotConfig {
    /// プロセスの環境変数から読み込み
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 任意の参照関数から読み込み
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let discord_token = var("DISCORD_BOT_TOKEN").ok_or(ConfigError::Missing("DISCORD_BOT_TOKEN"))?;
        info!("Discord token loaded");

        let application_id = parse_id("DISCORD_APPLICATION_ID", var("DISCORD_APPLICATION_ID"))?;
        let guild_id = parse_id("DISCORD_GUILD_ID", var("DISCORD_GUILD_ID"))?;

        let commands_dir = var("COMMANDS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_COMMANDS_DIR));
        debug!("Commands directory: {:?}", commands_dir);

        let admin_user_ids = var("ADMIN_USER_IDS")
            .map(|ids| parse_admins(&ids))
            .unwrap_or_default();

        let api_port = match var("API_PORT") {
            Some(port) => port.parse().map_err(|_| ConfigError::Invalid {
                var: "API_PORT",
                value: port,
            })?,
            None => DEFAULT_API_PORT,
        };

        Ok(Self {
            discord_token,
            application_id,
            guild_id,
            commands_dir,
            admin_user_ids,
            api_port,
        })
    }

    /// コマンドの公開先
    pub fn publish_scope(&self) -> PublishScope {
        match self.guild_id {
            Some(id) => PublishScope::Guild(id),
            None => PublishScope::Global,
        }
    }
}

fn parse_id(var: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    match value {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(None),
    }
}

/// カンマ区切りの管理者IDを読み込む（不正な値は警告して無視）
pub fn parse_admins(ids: &str) -> HashSet<u64> {
    let mut admins = HashSet::new();
    for id_str in ids.split(',') {
        let id_str = id_str.trim();
        if id_str.is_empty() {
            continue;
        }
        match id_str.parse::<u64>() {
            Ok(id) => {
                info!("Loaded admin user: {}", id);
                admins.insert(id);
            }
            Err(_) => warn!("Invalid admin user ID: {}", id_str),
        }
    }
    admins
}
