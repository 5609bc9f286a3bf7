//! relay-bot
//!
//! JSON記述子で定義したSlash Commandsを読み込み、Discordへ公開・中継するボット。

pub mod api;
pub mod commands;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod discord;
pub mod dispatcher;
pub mod handler;
pub mod publisher;
pub mod registry;
pub mod similarity;
pub mod source;
pub mod stats;
