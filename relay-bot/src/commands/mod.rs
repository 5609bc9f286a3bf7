//! 組み込みSlash Commands
//!
//! 記述子の `handler` キーから参照されるハンドラーを提供します。
//! コマンド名や説明、オプションは `commands/` 配下のJSONで定義します。

pub mod echo;
pub mod help;
pub mod ping;
pub mod reload;

use crate::handler::HandlerCatalog;
use std::collections::HashSet;

/// 組み込みハンドラーを登録したカタログを作成
pub fn builtin_catalog(admins: HashSet<u64>) -> HandlerCatalog {
    let mut catalog = HandlerCatalog::new();
    catalog.register("ping", ping::Ping);
    catalog.register("echo", echo::Echo);
    catalog.register("help", help::Help);
    catalog.register("reload", reload::Reload::new(admins));
    catalog
}
