//! /echo - 入力をそのまま返すSlash Command

use crate::context::CommandContext;
use crate::handler::{CommandError, CommandHandler, CommandOutput};
use async_trait::async_trait;

pub struct Echo;

#[async_trait]
impl CommandHandler for Echo {
    async fn run(&self, ctx: &CommandContext) -> Result<CommandOutput, CommandError> {
        let text = ctx.string("text").unwrap_or("").trim();
        if text.is_empty() {
            return Err(CommandError::InvalidInput("返す文字列を入力してください。".to_string()));
        }

        if ctx.boolean("quiet").unwrap_or(false) {
            ctx.reply_ephemeral(text).await?;
            return Ok(CommandOutput::Handled);
        }

        Ok(CommandOutput::message(text))
    }
}
