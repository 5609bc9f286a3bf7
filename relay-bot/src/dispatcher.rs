//! インタラクションディスパッチャー
//!
//! 受信したコマンドインタラクションをレジストリで引き、ハンドラーを実行します。
//! どの経路でもユーザーに見える応答がちょうど1つ返るようにし、
//! ハンドラーの失敗（エラー・panic）はここで止めてプロセスには伝播させません。

use crate::context::{AckState, CommandContext, Invocation, Reply, Responder, ResponseError};
use crate::handler::{CommandOutput, GENERIC_FAILURE_MESSAGE};
use crate::registry::CommandRegistry;
use crate::similarity;
use crate::stats::{DispatchKind, DispatchStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// プラットフォームが最初の応答を待つ時間
pub const ACK_DEADLINE: Duration = Duration::from_secs(3);

/// ハンドラーが何も返さなかった場合の応答
pub const COMPLETED_MESSAGE: &str = "✅ 完了しました。";

/// ディスパッチ結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// ハンドラーが成功し、応答を送信した
    Completed,
    /// 該当するコマンドがなかった
    NotFound,
    /// ハンドラーが失敗した、または応答の送信に失敗した
    Failed,
}

/// 1件のディスパッチの記録
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub outcome: DispatchOutcome,
    /// 受信から最初の応答まで
    pub first_ack: Option<Duration>,
    /// 応答期限に間に合わなかった
    pub late_ack: bool,
}

/// ディスパッチャー
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CommandRegistry>, stats: Arc<DispatchStats>) -> Self {
        Self { registry, stats }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// コマンドインタラクションを処理する
    pub async fn dispatch(&self, invocation: Invocation, responder: Arc<dyn Responder>) -> DispatchReport {
        let name = invocation.command_name.clone();

        let descriptor = match self.registry.get(&name) {
            Some(descriptor) => descriptor,
            None => return self.not_found(&name, responder.as_ref()).await,
        };

        debug!(
            "Dispatching /{} for user {} (interaction {})",
            name, invocation.user_id, invocation.interaction_id
        );

        let ctx = Arc::new(CommandContext::new(invocation, responder, self.registry.clone()));
        let handler = descriptor.handler.clone();
        let task_ctx = ctx.clone();

        // panicもJoinErrorとして受け取れるよう別タスクで実行
        let result = tokio::spawn(async move { handler.run(&task_ctx).await }).await;

        let outcome = match result {
            Ok(Ok(output)) => match finish(&ctx, output).await {
                Ok(()) => DispatchOutcome::Completed,
                Err(e) => {
                    error!("Failed to respond to /{}: {}", name, e);
                    recover(&ctx, GENERIC_FAILURE_MESSAGE.to_string()).await;
                    DispatchOutcome::Failed
                }
            },
            Ok(Err(e)) => {
                error!("Command /{} failed: {}", name, e);
                recover(&ctx, e.user_message()).await;
                DispatchOutcome::Failed
            }
            Err(e) => {
                error!("Command /{} panicked: {}", name, e);
                recover(&ctx, GENERIC_FAILURE_MESSAGE.to_string()).await;
                DispatchOutcome::Failed
            }
        };

        let first_ack = ctx.first_ack_latency().await;
        let late_ack = first_ack.map_or(true, |latency| latency > ACK_DEADLINE);
        if late_ack {
            warn!(
                "/{} was not acknowledged within {:?} (first ack: {:?}); the interaction may have been invalidated",
                name, ACK_DEADLINE, first_ack
            );
            self.stats.record_late_ack();
        }

        let kind = match outcome {
            DispatchOutcome::Completed => DispatchKind::Completed,
            _ => DispatchKind::Failed,
        };
        self.stats.record(&name, kind);
        info!("/{} finished: {:?} in {:?}", name, outcome, ctx.elapsed());

        DispatchReport {
            outcome,
            first_ack,
            late_ack,
        }
    }

    /// 未登録コマンドへの応答
    async fn not_found(&self, name: &str, responder: &dyn Responder) -> DispatchReport {
        let started = Instant::now();
        let names = self.registry.names();
        let suggestion = similarity::suggest(name, names.iter().map(String::as_str));

        warn!("Unknown command: /{} (suggestion: {:?})", name, suggestion);

        let mut message = format!("❓ コマンド `/{}` は見つかりませんでした。", name);
        if let Some(candidate) = suggestion {
            message.push_str(&format!("\nもしかして `/{}` ですか？", candidate));
        }

        let first_ack = match responder.reply(&Reply::ephemeral(message)).await {
            Ok(()) => Some(started.elapsed()),
            Err(e) => {
                error!("Failed to send not-found reply for /{}: {}", name, e);
                None
            }
        };

        self.stats.record(name, DispatchKind::NotFound);

        DispatchReport {
            outcome: DispatchOutcome::NotFound,
            first_ack,
            late_ack: first_ack.is_none(),
        }
    }
}

/// ハンドラー成功時の応答
async fn finish(ctx: &CommandContext, output: CommandOutput) -> Result<(), ResponseError> {
    match output {
        CommandOutput::Message(content) => ctx.send(Reply::new(content)).await,
        CommandOutput::Handled => match ctx.ack_state().await {
            AckState::Replied => Ok(()),
            AckState::Deferred => ctx.edit_reply(COMPLETED_MESSAGE).await,
            AckState::Pending => {
                warn!("/{} returned without responding", ctx.command_name());
                ctx.send(Reply::ephemeral(COMPLETED_MESSAGE)).await
            }
        },
    }
}

/// ハンドラー失敗時のエラー通知
///
/// 未応答なら新規の返信、応答済み（保留含む）ならフォローアップで送る。
async fn recover(ctx: &CommandContext, message: String) {
    let result = match ctx.ack_state().await {
        AckState::Pending => ctx.send(Reply::ephemeral(message)).await,
        AckState::Deferred | AckState::Replied => ctx.follow_up(Reply::ephemeral(message)).await,
    };

    if let Err(e) = result {
        error!("Failed to report error for /{}: {}", ctx.command_name(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::mock::{empty_registry, MockResponder, SentKind};
    use crate::descriptor::{CommandDescriptor, CommandSchema};
    use crate::handler::{CommandError, CommandHandler};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 呼び出し回数を数えながら、指定の振る舞いをするハンドラー
    struct Scripted {
        calls: Arc<AtomicUsize>,
        behavior: Behavior,
    }

    enum Behavior {
        Returns(&'static str),
        FailsBeforeAck,
        DefersThenFails,
        RepliesThenFails,
        DefersThenReturns(&'static str),
        Silent,
        RepliesItself,
        Panics,
        Slow(Duration),
    }

    #[async_trait]
    impl CommandHandler for Scripted {
        async fn run(&self, ctx: &CommandContext) -> Result<CommandOutput, CommandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Returns(text) => Ok(CommandOutput::message(text)),
                Behavior::FailsBeforeAck => {
                    Err(CommandError::ExecutionFailed("boom".to_string()))
                }
                Behavior::DefersThenFails => {
                    ctx.defer(false).await?;
                    Err(CommandError::ExecutionFailed("boom".to_string()))
                }
                Behavior::RepliesThenFails => {
                    ctx.reply("partial").await?;
                    Err(CommandError::ExecutionFailed("boom".to_string()))
                }
                Behavior::DefersThenReturns(text) => {
                    ctx.defer(false).await?;
                    Ok(CommandOutput::message(text))
                }
                Behavior::Silent => Ok(CommandOutput::Handled),
                Behavior::RepliesItself => {
                    ctx.reply("done by handler").await?;
                    Ok(CommandOutput::Handled)
                }
                Behavior::Panics => panic!("handler exploded"),
                Behavior::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(CommandOutput::message("late"))
                }
            }
        }
    }

    fn setup(name: &str, behavior: Behavior) -> (Dispatcher, Arc<AtomicUsize>) {
        let registry = empty_registry();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.set(CommandDescriptor::new(
            CommandSchema::new(name, "test command"),
            Arc::new(Scripted {
                calls: calls.clone(),
                behavior,
            }),
        ));
        (Dispatcher::new(registry, Arc::new(DispatchStats::new())), calls)
    }

    async fn run(dispatcher: &Dispatcher, name: &str) -> (DispatchReport, Vec<crate::context::mock::SentMessage>) {
        let responder = Arc::new(MockResponder::new());
        let report = dispatcher
            .dispatch(Invocation::new(name, 1), responder.clone())
            .await;
        (report, responder.sent())
    }

    #[tokio::test]
    async fn test_dispatch_ping() {
        let (dispatcher, calls) = setup("ping", Behavior::Returns("pong"));
        let (report, sent) = run(&dispatcher, "ping").await;

        assert_eq!(report.outcome, DispatchOutcome::Completed);
        assert!(!report.late_ack);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SentKind::Reply);
        assert!(sent[0].content.contains("pong"));
    }

    #[tokio::test]
    async fn test_dispatch_not_found() {
        let (dispatcher, calls) = setup("ping", Behavior::Returns("pong"));
        let (report, sent) = run(&dispatcher, "doesnotexist").await;

        assert_eq!(report.outcome, DispatchOutcome::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].ephemeral);
        assert!(sent[0].content.contains("見つかりませんでした"));
        assert!(!sent[0].content.contains("もしかして"));
    }

    #[tokio::test]
    async fn test_not_found_suggests_similar() {
        let (dispatcher, _) = setup("ping", Behavior::Returns("pong"));
        let (_, sent) = run(&dispatcher, "pnig").await;

        assert_eq!(sent.len(), 1);
        assert!(sent[0].content.contains("`/ping`"));
    }

    #[tokio::test]
    async fn test_failure_before_ack_replies_once() {
        let (dispatcher, _) = setup("broken", Behavior::FailsBeforeAck);
        let (report, sent) = run(&dispatcher, "broken").await;

        assert_eq!(report.outcome, DispatchOutcome::Failed);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SentKind::Reply);
        assert_eq!(sent[0].content, GENERIC_FAILURE_MESSAGE);
        // 内部エラーの詳細は送らない
        assert!(!sent[0].content.contains("boom"));
    }

    #[tokio::test]
    async fn test_failure_after_defer_follows_up() {
        let (dispatcher, _) = setup("slow", Behavior::DefersThenFails);
        let (report, sent) = run(&dispatcher, "slow").await;

        assert_eq!(report.outcome, DispatchOutcome::Failed);
        let kinds: Vec<SentKind> = sent.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![SentKind::Defer, SentKind::FollowUp]);
        assert_eq!(sent[1].content, GENERIC_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_failure_after_reply_follows_up() {
        let (dispatcher, _) = setup("half", Behavior::RepliesThenFails);
        let (_, sent) = run(&dispatcher, "half").await;

        let kinds: Vec<SentKind> = sent.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![SentKind::Reply, SentKind::FollowUp]);
    }

    #[tokio::test]
    async fn test_deferred_output_edits_reply() {
        let (dispatcher, _) = setup("slow", Behavior::DefersThenReturns("result"));
        let (report, sent) = run(&dispatcher, "slow").await;

        assert_eq!(report.outcome, DispatchOutcome::Completed);
        let kinds: Vec<SentKind> = sent.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![SentKind::Defer, SentKind::Edit]);
        assert_eq!(sent[1].content, "result");
    }

    #[tokio::test]
    async fn test_silent_handler_still_acknowledged() {
        let (dispatcher, _) = setup("quiet", Behavior::Silent);
        let (report, sent) = run(&dispatcher, "quiet").await;

        assert_eq!(report.outcome, DispatchOutcome::Completed);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, COMPLETED_MESSAGE);
    }

    #[tokio::test]
    async fn test_handler_reply_not_duplicated() {
        let (dispatcher, _) = setup("self", Behavior::RepliesItself);
        let (_, sent) = run(&dispatcher, "self").await;

        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "done by handler");
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let (dispatcher, _) = setup("explode", Behavior::Panics);
        let (report, sent) = run(&dispatcher, "explode").await;

        assert_eq!(report.outcome, DispatchOutcome::Failed);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SentKind::Reply);
        assert_eq!(dispatcher.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_platform_failure_reported() {
        let (dispatcher, _) = setup("ping", Behavior::Returns("pong"));
        let responder = Arc::new(MockResponder::new());
        responder.fail_sends(true);

        let report = dispatcher
            .dispatch(Invocation::new("ping", 1), responder.clone())
            .await;

        assert_eq!(report.outcome, DispatchOutcome::Failed);
        assert!(report.late_ack);
        assert!(responder.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_output_still_reports_failure() {
        let (dispatcher, _) = setup("ping", Behavior::Returns("pong"));
        let responder = Arc::new(MockResponder::new());
        responder.fail_next(1);

        let report = dispatcher
            .dispatch(Invocation::new("ping", 1), responder.clone())
            .await;

        assert_eq!(report.outcome, DispatchOutcome::Failed);
        let sent = responder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SentKind::Reply);
        assert!(sent[0].ephemeral);
        assert_eq!(sent[0].content, GENERIC_FAILURE_MESSAGE);
        assert!(!report.late_ack);
    }

    #[tokio::test]
    async fn test_long_help_fits_message_limit() {
        let registry = empty_registry();
        registry.set(CommandDescriptor::new(
            CommandSchema::new("help", "コマンド一覧"),
            Arc::new(crate::commands::help::Help),
        ));
        for i in 0..30 {
            registry.set(CommandDescriptor::new(
                CommandSchema::new(format!("command-{:02}", i), "d".repeat(90)),
                Arc::new(Scripted {
                    calls: Arc::new(AtomicUsize::new(0)),
                    behavior: Behavior::Silent,
                }),
            ));
        }
        let dispatcher = Dispatcher::new(registry, Arc::new(DispatchStats::new()));
        let responder = Arc::new(MockResponder::new());
        responder.reject_longer_than(crate::context::MAX_MESSAGE_LENGTH);

        let report = dispatcher
            .dispatch(Invocation::new("help", 1), responder.clone())
            .await;

        assert_eq!(report.outcome, DispatchOutcome::Completed);
        let sent = responder.sent();
        assert!(sent.len() >= 2);
        assert_eq!(sent[0].kind, SentKind::Reply);
        assert!(sent[1..].iter().all(|m| m.kind == SentKind::FollowUp));
        assert!(sent
            .iter()
            .all(|m| m.content.chars().count() <= crate::context::MAX_MESSAGE_LENGTH));
        let joined: String = sent.iter().map(|m| m.content.as_str()).collect();
        assert!(joined.contains("`/command-29`"));
        assert!(joined.contains("計 31 個のコマンド"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_flagged_late() {
        let (dispatcher, _) = setup("slow", Behavior::Slow(Duration::from_secs(5)));
        let (report, sent) = run(&dispatcher, "slow").await;

        assert_eq!(report.outcome, DispatchOutcome::Completed);
        assert!(report.late_ack);
        assert_eq!(sent.len(), 1);
        assert_eq!(dispatcher.stats().snapshot().late_acks, 1);
    }

    #[tokio::test]
    async fn test_stats_recorded() {
        let (dispatcher, _) = setup("ping", Behavior::Returns("pong"));
        run(&dispatcher, "ping").await;
        run(&dispatcher, "ping").await;
        run(&dispatcher, "nope").await;

        let snapshot = dispatcher.stats().snapshot();
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.not_found, 1);
        assert_eq!(snapshot.per_command.get("ping"), Some(&2));
    }
}
