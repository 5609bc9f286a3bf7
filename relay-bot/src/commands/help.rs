//! /help - 登録済みコマンド一覧を表示するSlash Command

use crate::context::CommandContext;
use crate::descriptor::CommandDescriptor;
use crate::handler::{CommandError, CommandHandler, CommandOutput};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 分類なしコマンドの見出し
const UNCATEGORIZED: &str = "その他";

pub struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn run(&self, ctx: &CommandContext) -> Result<CommandOutput, CommandError> {
        let registry = ctx.registry();

        if let Some(name) = ctx.string("command") {
            let name = name.trim().trim_start_matches('/');
            return match registry.get(name) {
                Some(descriptor) => Ok(CommandOutput::Message(describe(&descriptor))),
                None => Err(CommandError::InvalidInput(format!(
                    "コマンド `/{}` は登録されていません。",
                    name
                ))),
            };
        }

        let commands = registry.all();
        if commands.is_empty() {
            return Ok(CommandOutput::message("利用可能なコマンドがありません。"));
        }

        Ok(CommandOutput::Message(overview(&commands)))
    }
}

/// 分類ごとの一覧
fn overview(commands: &[Arc<CommandDescriptor>]) -> String {
    let mut groups: BTreeMap<&str, Vec<&CommandDescriptor>> = BTreeMap::new();
    for descriptor in commands {
        groups
            .entry(descriptor.category().unwrap_or(UNCATEGORIZED))
            .or_default()
            .push(descriptor);
    }

    let mut response = "📋 **利用可能なコマンド**\n".to_string();
    for (category, descriptors) in groups {
        response.push_str(&format!("\n**{}**\n", category));
        for descriptor in descriptors {
            response.push_str(&format!(
                "• `/{}` - {}\n",
                descriptor.name(),
                descriptor.description()
            ));
        }
    }
    response.push_str(&format!("\n**計 {} 個のコマンド**", commands.len()));
    response
}

/// 1コマンドの詳細
fn describe(descriptor: &CommandDescriptor) -> String {
    let mut response = format!("**/{}**\n{}\n", descriptor.name(), descriptor.description());

    if descriptor.schema.options.is_empty() {
        return response;
    }

    response.push_str("\n**オプション**\n");
    for option in &descriptor.schema.options {
        let required = if option.required { "（必須）" } else { "" };
        response.push_str(&format!(
            "• `{}` [{}]{} - {}\n",
            option.name, option.kind, required, option.description
        ));
    }
    response
}
