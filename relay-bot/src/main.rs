use relay_bot::api;
use relay_bot::commands;
use relay_bot::config::BotConfig;
use relay_bot::discord::{self, SerenityRegistrar, SerenityResponder};
use relay_bot::dispatcher::Dispatcher;
use relay_bot::publisher;
use relay_bot::registry::CommandRegistry;
use relay_bot::source::DirectorySource;
use relay_bot::stats::DispatchStats;
use serenity::builder::{CreateInteractionResponse, CreateInteractionResponseMessage};
use serenity::model::application::Interaction;
use serenity::model::gateway::Ready;
use serenity::model::id::ApplicationId;
use serenity::prelude::*;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Handler {
    config: BotConfig,
    dispatcher: Arc<Dispatcher>,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        let application_id = self
            .config
            .application_id
            .map(ApplicationId::new)
            .unwrap_or(ready.application.id);
        ctx.http.set_application_id(application_id);

        // 読み込み済みのコマンドを公開（失敗しても起動は続ける）
        let registrar = SerenityRegistrar::new(ctx.http.clone());
        let descriptors = self.dispatcher.registry().all();
        let scope = self.config.publish_scope();
        if let Err(e) = publisher::publish(&registrar, &descriptors, scope).await {
            warn!("Continuing with previously published commands: {}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                let invocation = discord::invocation_from(&command);
                let responder = Arc::new(SerenityResponder::new(ctx.http.clone(), command));
                self.dispatcher.dispatch(invocation, responder).await;
            }
            Interaction::Component(component) => {
                warn!("Unsupported component interaction: {}", component.data.custom_id);
                let message = CreateInteractionResponseMessage::new()
                    .content("この操作には対応していません。")
                    .ephemeral(true);
                if let Err(e) = component
                    .create_response(&ctx.http, CreateInteractionResponse::Message(message))
                    .await
                {
                    error!("Failed to respond to component interaction: {}", e);
                }
            }
            other => {
                warn!(
                    "Ignoring unsupported {} interaction",
                    discord::interaction_label(other.kind())
                );
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // トレーシング初期化
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    info!("Configuration: {:?}", config);

    // レジストリを構築
    let registry = Arc::new(CommandRegistry::new(
        Arc::new(DirectorySource::new(&config.commands_dir)),
        commands::builtin_catalog(config.admin_user_ids.clone()),
    ));
    match registry.load_all().await {
        Ok(report) => {
            for skipped in &report.skipped {
                warn!("Skipped descriptor {}: {}", skipped.origin, skipped.reason);
            }
        }
        Err(e) => {
            error!("Failed to load commands from {:?}: {}", config.commands_dir, e);
            return;
        }
    }

    let stats = Arc::new(DispatchStats::new());
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), stats.clone()));

    // APIサーバーを並行起動
    let api_state = api::ApiState { registry, stats };
    let api_port = config.api_port;
    tokio::spawn(async move {
        api::start_server(api_state, api_port).await;
    });

    let discord_token = config.discord_token.clone();
    let handler = Handler { config, dispatcher };

    info!("Creating client...");

    let mut client = match Client::builder(&discord_token, GatewayIntents::GUILDS)
        .event_handler(handler)
        .await
    {
        Ok(client) => {
            info!("Client created");
            client
        }
        Err(why) => {
            error!("Error creating client: {:?}", why);
            return;
        }
    };

    info!("Starting bot...");

    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }
}
