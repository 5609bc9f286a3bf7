//! /ping - 応答確認Slash Command

use crate::context::CommandContext;
use crate::handler::{CommandError, CommandHandler, CommandOutput};
use async_trait::async_trait;

pub struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    async fn run(&self, ctx: &CommandContext) -> Result<CommandOutput, CommandError> {
        Ok(CommandOutput::message(format!(
            "🏓 pong! ({}ms)",
            ctx.elapsed().as_millis()
        )))
    }
}
