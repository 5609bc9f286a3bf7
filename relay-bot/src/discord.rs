//! serenityとの接続部分
//!
//! インタラクションを [`Invocation`] に変換し、応答と公開をDiscordへ中継します。

use crate::context::{Invocation, OptionValue, ResolvedOption, Responder, ResponseError, Reply};
use crate::descriptor::ApplicationCommandPayload;
use crate::publisher::{CommandRegistrar, PublishError, PublishScope};
use async_trait::async_trait;
use serenity::builder::{
    CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
    EditInteractionResponse,
};
use serenity::http::Http;
use serenity::model::application::{
    CommandDataOption, CommandDataOptionValue, CommandInteraction, InteractionType,
};
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, warn};

/// コマンドインタラクションを変換
pub fn invocation_from(command: &CommandInteraction) -> Invocation {
    Invocation {
        interaction_id: command.id.get(),
        command_name: command.data.name.clone(),
        user_id: command.user.id.get(),
        user_name: command.user.name.clone(),
        channel_id: command.channel_id.get(),
        guild_id: command.guild_id.map(|id| id.get()),
        options: convert_options(&command.data.options),
    }
}

/// オプション値を変換（未対応の型は捨てる）
pub fn convert_options(options: &[CommandDataOption]) -> Vec<ResolvedOption> {
    options
        .iter()
        .filter_map(|option| {
            let value = match &option.value {
                CommandDataOptionValue::String(s) => OptionValue::String(s.clone()),
                CommandDataOptionValue::Integer(n) => OptionValue::Integer(*n),
                CommandDataOptionValue::Number(n) => OptionValue::Number(*n),
                CommandDataOptionValue::Boolean(b) => OptionValue::Boolean(*b),
                CommandDataOptionValue::User(id) => OptionValue::User(id.get()),
                CommandDataOptionValue::Channel(id) => OptionValue::Channel(id.get()),
                CommandDataOptionValue::Role(id) => OptionValue::Role(id.get()),
                CommandDataOptionValue::Mentionable(id) => OptionValue::Mentionable(id.get()),
                CommandDataOptionValue::Attachment(id) => OptionValue::Attachment(id.get()),
                CommandDataOptionValue::SubCommand(inner) => {
                    OptionValue::SubCommand(convert_options(inner))
                }
                CommandDataOptionValue::SubCommandGroup(inner) => {
                    OptionValue::SubCommandGroup(convert_options(inner))
                }
                other => {
                    debug!("Ignoring option {} with unsupported value {:?}", option.name, other);
                    return None;
                }
            };
            Some(ResolvedOption::new(option.name.clone(), value))
        })
        .collect()
}

/// 1つのコマンドインタラクションへの応答手段
pub struct SerenityResponder {
    http: Arc<Http>,
    interaction: CommandInteraction,
}

impl SerenityResponder {
    pub fn new(http: Arc<Http>, interaction: CommandInteraction) -> Self {
        Self { http, interaction }
    }
}

/// ログ用のインタラクション種別名
pub fn interaction_label(kind: InteractionType) -> &'static str {
    match kind {
        InteractionType::Ping => "ping",
        InteractionType::Command => "command",
        InteractionType::Component => "component",
        InteractionType::Autocomplete => "autocomplete",
        InteractionType::Modal => "modal",
        _ => "unknown",
    }
}

fn platform(e: serenity::Error) -> ResponseError {
    ResponseError::Platform(e.to_string())
}

#[async_trait]
impl Responder for SerenityResponder {
    async fn reply(&self, reply: &Reply) -> Result<(), ResponseError> {
        let message = CreateInteractionResponseMessage::new()
            .content(&reply.content)
            .ephemeral(reply.ephemeral);
        self.interaction
            .create_response(&self.http, CreateInteractionResponse::Message(message))
            .await
            .map_err(platform)
    }

    async fn defer(&self, ephemeral: bool) -> Result<(), ResponseError> {
        let message = CreateInteractionResponseMessage::new().ephemeral(ephemeral);
        self.interaction
            .create_response(&self.http, CreateInteractionResponse::Defer(message))
            .await
            .map_err(platform)
    }

    async fn edit_reply(&self, content: &str) -> Result<(), ResponseError> {
        self.interaction
            .edit_response(&self.http, EditInteractionResponse::new().content(content))
            .await
            .map(|_| ())
            .map_err(platform)
    }

    async fn follow_up(&self, reply: &Reply) -> Result<(), ResponseError> {
        let followup = CreateInteractionResponseFollowup::new()
            .content(&reply.content)
            .ephemeral(reply.ephemeral);
        self.interaction
            .create_followup(&self.http, followup)
            .await
            .map(|_| ())
            .map_err(platform)
    }
}

/// serenityのHTTPクライアントを使った一括登録
///
/// アプリケーションIDは `Http::set_application_id` で設定済みであること。
pub struct SerenityRegistrar {
    http: Arc<Http>,
}

impl SerenityRegistrar {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CommandRegistrar for SerenityRegistrar {
    async fn bulk_overwrite(
        &self,
        scope: PublishScope,
        commands: &[ApplicationCommandPayload],
    ) -> Result<usize, PublishError> {
        let registered = match scope {
            PublishScope::Global => self.http.create_global_commands(&commands).await,
            PublishScope::Guild(id) => {
                self.http
                    .create_guild_commands(GuildId::new(id), &commands)
                    .await
            }
        }
        .map_err(|e| {
            warn!("Discord rejected command registration for {}: {}", scope, e);
            PublishError::Platform(e.to_string())
        })?;

        Ok(registered.len())
    }
}
