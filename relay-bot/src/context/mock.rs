//! モック応答手段（テスト用）

use super::{CommandContext, Invocation, Reply, Responder, ResponseError};
use crate::handler::HandlerCatalog;
use crate::registry::CommandRegistry;
use crate::source::DirectorySource;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 送信操作の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentKind {
    Reply,
    Defer,
    Edit,
    FollowUp,
}

/// 記録された送信内容
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub kind: SentKind,
    pub content: String,
    pub ephemeral: bool,
}

/// 送信内容を記録するだけの応答手段
#[derive(Default)]
pub struct MockResponder {
    sent: Mutex<Vec<SentMessage>>,
    fail: AtomicBool,
    fail_remaining: AtomicUsize,
    /// 0なら制限なし
    max_chars: AtomicUsize,
}

impl MockResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以降の送信をすべて失敗させる
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// 次のn回の送信だけ失敗させる
    pub fn fail_next(&self, count: usize) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// 指定文字数を超える内容を拒否する
    pub fn reject_longer_than(&self, max_chars: usize) {
        self.max_chars.store(max_chars, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, kind: SentKind, content: &str, ephemeral: bool) -> Result<(), ResponseError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ResponseError::Platform("mock failure".to_string()));
        }
        let failing_once = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing_once {
            return Err(ResponseError::Platform("mock failure".to_string()));
        }
        let max_chars = self.max_chars.load(Ordering::SeqCst);
        if max_chars > 0 && content.chars().count() > max_chars {
            return Err(ResponseError::Platform(format!(
                "content must be {} or fewer in length",
                max_chars
            )));
        }
        self.sent.lock().unwrap().push(SentMessage {
            kind,
            content: content.to_string(),
            ephemeral,
        });
        Ok(())
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn reply(&self, reply: &Reply) -> Result<(), ResponseError> {
        self.record(SentKind::Reply, &reply.content, reply.ephemeral)
    }

    async fn defer(&self, ephemeral: bool) -> Result<(), ResponseError> {
        self.record(SentKind::Defer, "", ephemeral)
    }

    async fn edit_reply(&self, content: &str) -> Result<(), ResponseError> {
        self.record(SentKind::Edit, content, false)
    }

    async fn follow_up(&self, reply: &Reply) -> Result<(), ResponseError> {
        self.record(SentKind::FollowUp, &reply.content, reply.ephemeral)
    }
}

/// 空のレジストリ（ファイルは読まない）
pub fn empty_registry() -> Arc<CommandRegistry> {
    Arc::new(CommandRegistry::new(
        Arc::new(DirectorySource::new("commands-unused")),
        HandlerCatalog::new(),
    ))
}

/// モック応答手段付きのコンテキストを作成
pub fn test_context(invocation: Invocation) -> (Arc<CommandContext>, Arc<MockResponder>) {
    let responder = Arc::new(MockResponder::new());
    let ctx = CommandContext::new(invocation, responder.clone(), empty_registry());
    (Arc::new(ctx), responder)
}
