//! /reload - コマンド記述子を再読み込みする管理者Slash Command

use crate::context::CommandContext;
use crate::handler::{CommandError, CommandHandler, CommandOutput};
use crate::registry::{LoadReport, RegistryError};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{info, warn};

/// スキップ一覧に表示する最大件数
const MAX_LISTED_SKIPS: usize = 10;

pub struct Reload {
    /// 実行を許可するユーザー（空なら権限設定のみで判断）
    admins: HashSet<u64>,
}

impl Reload {
    pub fn new(admins: HashSet<u64>) -> Self {
        Self { admins }
    }

    fn is_allowed(&self, user_id: u64) -> bool {
        self.admins.is_empty() || self.admins.contains(&user_id)
    }
}

#[async_trait]
impl CommandHandler for Reload {
    async fn run(&self, ctx: &CommandContext) -> Result<CommandOutput, CommandError> {
        let user_id = ctx.user_id();
        if !self.is_allowed(user_id) {
            warn!("User {} tried to run /reload without permission", user_id);
            ctx.reply_ephemeral("このコマンドは管理者のみ実行できます。").await?;
            return Ok(CommandOutput::Handled);
        }

        // ファイルI/Oがあるため先に保留応答を返す
        ctx.defer(true).await?;

        let registry = ctx.registry();
        match ctx.string("command") {
            Some(name) => {
                let name = name.trim().trim_start_matches('/');
                info!("User {} reloading /{}", user_id, name);
                match registry.reload(name).await {
                    Ok(_) => Ok(CommandOutput::message(format!(
                        "🔄 `/{}` を再読み込みしました。",
                        name
                    ))),
                    Err(RegistryError::NotFound(_)) => Ok(CommandOutput::message(format!(
                        "⚠️ `/{}` の記述子が見つかりませんでした。",
                        name
                    ))),
                    Err(e) => Ok(CommandOutput::message(format!(
                        "⚠️ `/{}` の再読み込みに失敗したため無効化しました。\n{}",
                        name, e
                    ))),
                }
            }
            None => {
                info!("User {} reloading all commands", user_id);
                let before: HashSet<String> = registry.names().into_iter().collect();
                let report = registry.load_all().await?;
                Ok(CommandOutput::Message(summarize(&before, &report)))
            }
        }
    }
}

/// 全体再読み込みの結果
fn summarize(before: &HashSet<String>, report: &LoadReport) -> String {
    let mut response = format!(
        "🔄 **全コマンドを再読み込みしました**\n- 読み込み: {}件\n- スキップ: {}件",
        report.loaded.len(),
        report.skipped.len()
    );

    let after: HashSet<&str> = report.loaded.iter().map(String::as_str).collect();
    let mut added: Vec<&str> = after
        .iter()
        .copied()
        .filter(|name| !before.contains(*name))
        .collect();
    let mut removed: Vec<&str> = before
        .iter()
        .map(String::as_str)
        .filter(|name| !after.contains(name))
        .collect();
    added.sort_unstable();
    removed.sort_unstable();

    if !added.is_empty() {
        response.push_str(&format!("\n- 追加: {}", format_names(&added)));
    }
    if !removed.is_empty() {
        response.push_str(&format!("\n- 削除: {}", format_names(&removed)));
    }
    if !added.is_empty() || !removed.is_empty() {
        response.push_str("\nコマンド一覧への反映には `relay-cli publish` を実行してください。");
    }

    if !report.skipped.is_empty() {
        response.push_str("\n\n**スキップされた記述子**");
        for skipped in report.skipped.iter().take(MAX_LISTED_SKIPS) {
            response.push_str(&format!(
                "\n• {} ({}): {}",
                skipped.name.as_deref().unwrap_or("?"),
                skipped.origin,
                skipped.reason
            ));
        }
        if report.skipped.len() > MAX_LISTED_SKIPS {
            response.push_str(&format!(
                "\n…他 {} 件",
                report.skipped.len() - MAX_LISTED_SKIPS
            ));
        }
    }

    response
}

fn format_names(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("`/{}`", n))
        .collect::<Vec<_>>()
        .join(", ")
}
