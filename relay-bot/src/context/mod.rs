//! コマンド実行コンテキスト
//!
//! 受信したインタラクション、解決済みのオプション値、応答手段をまとめ、
//! 応答状態（未応答・保留中・応答済み）を追跡します。

#[cfg(test)]
pub mod mock;

use crate::registry::CommandRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// 1メッセージの最大文字数
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// 応答エラー
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Interaction has not been acknowledged yet")]
    NotAcknowledged,
}

/// 解決済みのオプション値
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    User(u64),
    Channel(u64),
    Role(u64),
    Mentionable(u64),
    Attachment(u64),
    SubCommand(Vec<ResolvedOption>),
    SubCommandGroup(Vec<ResolvedOption>),
}

/// 名前付きのオプション値
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOption {
    pub name: String,
    pub value: OptionValue,
}

impl ResolvedOption {
    pub fn new(name: impl Into<String>, value: OptionValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// 受信したコマンドインタラクション
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub interaction_id: u64,
    pub command_name: String,
    pub user_id: u64,
    pub user_name: String,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub options: Vec<ResolvedOption>,
}

impl Invocation {
    pub fn new(command_name: impl Into<String>, user_id: u64) -> Self {
        Self {
            interaction_id: 0,
            command_name: command_name.into(),
            user_id,
            user_name: String::new(),
            channel_id: 0,
            guild_id: None,
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, name: impl Into<String>, value: OptionValue) -> Self {
        self.options.push(ResolvedOption::new(name, value));
        self
    }
}

/// 送信するメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub content: String,
    /// 実行したユーザーにのみ表示
    pub ephemeral: bool,
}

impl Reply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

/// プラットフォームへの応答手段
///
/// 1つのインタラクションに対する操作のみを扱う。
#[async_trait]
pub trait Responder: Send + Sync {
    /// 最初の応答
    async fn reply(&self, reply: &Reply) -> Result<(), ResponseError>;

    /// 保留応答（「考え中...」）
    async fn defer(&self, ephemeral: bool) -> Result<(), ResponseError>;

    /// 最初の応答（または保留応答）の内容を置き換える
    async fn edit_reply(&self, content: &str) -> Result<(), ResponseError>;

    /// 追加のメッセージ
    async fn follow_up(&self, reply: &Reply) -> Result<(), ResponseError>;
}

/// インタラクションの応答状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// まだ何も送っていない
    Pending,
    /// 保留応答のみ送信済み
    Deferred,
    /// 内容のある応答を送信済み
    Replied,
}

#[derive(Debug)]
struct AckTracker {
    state: AckState,
    first_ack_at: Option<Instant>,
    /// 最初の応答（保留応答を含む）が本人のみ表示か
    ephemeral: bool,
}

impl AckTracker {
    fn transition(&mut self, state: AckState) {
        if self.first_ack_at.is_none() {
            self.first_ack_at = Some(Instant::now());
        }
        self.state = state;
    }
}

/// ハンドラーに渡される実行コンテキスト
pub struct CommandContext {
    invocation: Invocation,
    responder: Arc<dyn Responder>,
    registry: Arc<CommandRegistry>,
    received_at: Instant,
    ack: Mutex<AckTracker>,
}

impl CommandContext {
    pub fn new(
        invocation: Invocation,
        responder: Arc<dyn Responder>,
        registry: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            invocation,
            responder,
            registry,
            received_at: Instant::now(),
            ack: Mutex::new(AckTracker {
                state: AckState::Pending,
                first_ack_at: None,
                ephemeral: false,
            }),
        }
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn command_name(&self) -> &str {
        &self.invocation.command_name
    }

    pub fn user_id(&self) -> u64 {
        self.invocation.user_id
    }

    /// 実行中のレジストリ
    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    // ===== オプション =====

    /// 選択されたサブコマンド名とその引数
    pub fn sub_command(&self) -> Option<(&str, &[ResolvedOption])> {
        self.invocation.options.iter().find_map(|opt| match &opt.value {
            OptionValue::SubCommand(options) => Some((opt.name.as_str(), options.as_slice())),
            OptionValue::SubCommandGroup(subs) => subs.iter().find_map(|sub| match &sub.value {
                OptionValue::SubCommand(options) => Some((sub.name.as_str(), options.as_slice())),
                _ => None,
            }),
            _ => None,
        })
    }

    /// 末端（サブコマンドがあればその中）のオプション
    fn leaf_options(&self) -> &[ResolvedOption] {
        match self.sub_command() {
            Some((_, options)) => options,
            None => &self.invocation.options,
        }
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.leaf_options()
            .iter()
            .find(|opt| opt.name == name)
            .map(|opt| &opt.value)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.option(name) {
            Some(OptionValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.option(name) {
            Some(OptionValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.option(name) {
            Some(OptionValue::Number(v)) => Some(*v),
            Some(OptionValue::Integer(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.option(name) {
            Some(OptionValue::Boolean(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn user(&self, name: &str) -> Option<u64> {
        match self.option(name) {
            Some(OptionValue::User(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn channel(&self, name: &str) -> Option<u64> {
        match self.option(name) {
            Some(OptionValue::Channel(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn role(&self, name: &str) -> Option<u64> {
        match self.option(name) {
            Some(OptionValue::Role(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn mentionable(&self, name: &str) -> Option<u64> {
        match self.option(name) {
            Some(OptionValue::Mentionable(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn attachment(&self, name: &str) -> Option<u64> {
        match self.option(name) {
            Some(OptionValue::Attachment(id)) => Some(*id),
            _ => None,
        }
    }

    // ===== 応答 =====

    /// 応答状態に応じて送信する
    ///
    /// 未応答なら返信、保留中なら保留応答を編集、応答済みならフォローアップ。
    /// [`MAX_MESSAGE_LENGTH`] を超える内容は分割し、残りをフォローアップで送る。
    pub async fn send(&self, reply: Reply) -> Result<(), ResponseError> {
        let mut ack = self.ack.lock().await;
        let mut chunks = split_message(&reply.content, MAX_MESSAGE_LENGTH).into_iter();
        let first = chunks.next().unwrap_or_default();

        let rest_ephemeral = match ack.state {
            AckState::Pending => {
                self.responder
                    .reply(&Reply {
                        content: first,
                        ephemeral: reply.ephemeral,
                    })
                    .await?;
                ack.ephemeral = reply.ephemeral;
                ack.transition(AckState::Replied);
                reply.ephemeral
            }
            AckState::Deferred => {
                self.responder.edit_reply(&first).await?;
                ack.transition(AckState::Replied);
                ack.ephemeral
            }
            AckState::Replied => {
                self.responder
                    .follow_up(&Reply {
                        content: first,
                        ephemeral: reply.ephemeral,
                    })
                    .await?;
                reply.ephemeral
            }
        };

        self.follow_up_chunks(chunks, rest_ephemeral).await
    }

    async fn follow_up_chunks(
        &self,
        chunks: impl Iterator<Item = String>,
        ephemeral: bool,
    ) -> Result<(), ResponseError> {
        for content in chunks {
            self.responder.follow_up(&Reply { content, ephemeral }).await?;
        }
        Ok(())
    }

    pub async fn reply(&self, content: impl Into<String>) -> Result<(), ResponseError> {
        self.send(Reply::new(content)).await
    }

    pub async fn reply_ephemeral(&self, content: impl Into<String>) -> Result<(), ResponseError> {
        self.send(Reply::ephemeral(content)).await
    }

    /// 保留応答を送る（時間のかかる処理の前に呼ぶ）
    ///
    /// 既に応答済みの場合は何もしない。
    pub async fn defer(&self, ephemeral: bool) -> Result<(), ResponseError> {
        let mut ack = self.ack.lock().await;
        if ack.state != AckState::Pending {
            debug!("Interaction for /{} already acknowledged, skipping defer", self.command_name());
            return Ok(());
        }
        self.responder.defer(ephemeral).await?;
        ack.ephemeral = ephemeral;
        ack.transition(AckState::Deferred);
        Ok(())
    }

    /// 最初の応答を置き換える（収まらない分はフォローアップ）
    pub async fn edit_reply(&self, content: impl Into<String>) -> Result<(), ResponseError> {
        let mut ack = self.ack.lock().await;
        if ack.state == AckState::Pending {
            return Err(ResponseError::NotAcknowledged);
        }
        let mut chunks = split_message(&content.into(), MAX_MESSAGE_LENGTH).into_iter();
        let first = chunks.next().unwrap_or_default();
        self.responder.edit_reply(&first).await?;
        ack.transition(AckState::Replied);
        self.follow_up_chunks(chunks, ack.ephemeral).await
    }

    pub async fn follow_up(&self, reply: Reply) -> Result<(), ResponseError> {
        let ack = self.ack.lock().await;
        if ack.state == AckState::Pending {
            return Err(ResponseError::NotAcknowledged);
        }
        self.follow_up_chunks(
            split_message(&reply.content, MAX_MESSAGE_LENGTH).into_iter(),
            reply.ephemeral,
        )
        .await
    }

    pub async fn ack_state(&self) -> AckState {
        self.ack.lock().await.state
    }

    /// 受信から最初の応答までの時間（未応答なら `None`）
    pub async fn first_ack_latency(&self) -> Option<Duration> {
        self.ack
            .lock()
            .await
            .first_ack_at
            .map(|at| at.duration_since(self.received_at))
    }

    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// メッセージを指定文字数で分割
///
/// 改行、なければ空白の直後で区切る。どちらもなければ文字数で切る。
/// 空文字列でも要素を1つ返す。
pub fn split_message(content: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut messages = Vec::new();
    let mut remaining = content;

    while let Some((limit, _)) = remaining.char_indices().nth(max_chars) {
        let head = &remaining[..limit];
        let cut_point = head
            .rfind('\n')
            .or_else(|| head.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);

        let (chunk, rest) = remaining.split_at(cut_point);
        messages.push(chunk.to_string());
        remaining = rest;
    }

    if !remaining.is_empty() || messages.is_empty() {
        messages.push(remaining.to_string());
    }
    messages
}
