//! コマンド記述子
//!
//! Slash Commandの静的な定義（名前・オプションスキーマ・ハンドラー）と、
//! Discordへ登録する際のワイヤーフォーマットへの変換を提供します。

use crate::handler::CommandHandler;
use crate::source::SourceId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 1階層あたりのオプション数上限
pub const MAX_OPTIONS: usize = 25;
/// 1オプションあたりの選択肢数上限
pub const MAX_CHOICES: usize = 25;
/// 説明文の最大文字数
pub const MAX_DESCRIPTION_LEN: usize = 100;

/// コマンド名・オプション名のパターン（空白なし、1〜32文字）
///
/// 大文字を含まないことは [`validate_name`] で別途確認する。
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[-_\p{L}\p{N}\p{Devanagari}\p{Thai}]{1,32}$").expect("Invalid name regex")
});

/// スキーマ検証エラー
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Invalid description for {0:?} (must be 1-100 chars)")]
    InvalidDescription(String),

    #[error("Too many options in {0:?} (max 25)")]
    TooManyOptions(String),

    #[error("Duplicate option name: {0:?}")]
    DuplicateOption(String),

    #[error("Required option {0:?} must come before optional options")]
    RequiredAfterOptional(String),

    #[error("Option {0:?} mixes sub-commands with plain options")]
    MixedSubCommands(String),

    #[error("Invalid constraint on option {option:?}: {reason}")]
    InvalidConstraint { option: String, reason: String },
}

/// オプションの型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    SubCommand,
    SubCommandGroup,
    String,
    Integer,
    Boolean,
    User,
    Channel,
    Role,
    Mentionable,
    Number,
    Attachment,
}

impl OptionKind {
    /// Discord APIのオプション型番号
    pub fn wire_code(self) -> u8 {
        match self {
            OptionKind::SubCommand => 1,
            OptionKind::SubCommandGroup => 2,
            OptionKind::String => 3,
            OptionKind::Integer => 4,
            OptionKind::Boolean => 5,
            OptionKind::User => 6,
            OptionKind::Channel => 7,
            OptionKind::Role => 8,
            OptionKind::Mentionable => 9,
            OptionKind::Number => 10,
            OptionKind::Attachment => 11,
        }
    }

    pub fn is_sub_command(self) -> bool {
        matches!(self, OptionKind::SubCommand | OptionKind::SubCommandGroup)
    }

    fn is_numeric(self) -> bool {
        matches!(self, OptionKind::Integer | OptionKind::Number)
    }

    fn accepts_choices(self) -> bool {
        matches!(
            self,
            OptionKind::String | OptionKind::Integer | OptionKind::Number
        )
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptionKind::SubCommand => "sub_command",
            OptionKind::SubCommandGroup => "sub_command_group",
            OptionKind::String => "string",
            OptionKind::Integer => "integer",
            OptionKind::Boolean => "boolean",
            OptionKind::User => "user",
            OptionKind::Channel => "channel",
            OptionKind::Role => "role",
            OptionKind::Mentionable => "mentionable",
            OptionKind::Number => "number",
            OptionKind::Attachment => "attachment",
        };
        write!(f, "{}", s)
    }
}

/// 選択肢の値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoiceValue {
    Integer(i64),
    Number(f64),
    String(String),
}

/// オプションの選択肢
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChoice {
    pub name: String,
    pub value: ChoiceValue,
}

/// オプション定義
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    #[serde(rename = "type")]
    pub kind: OptionKind,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<OptionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u16>,
    /// サブコマンドの引数
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionSpec>,
}

impl OptionSpec {
    pub fn new(kind: OptionKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: description.into(),
            required: false,
            choices: Vec::new(),
            min_value: None,
            max_value: None,
            min_length: None,
            max_length: None,
            options: Vec::new(),
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    fn validate(&self) -> Result<(), SchemaError> {
        validate_name(&self.name)?;
        validate_description(&self.name, &self.description)?;

        let constraint = |reason: &str| SchemaError::InvalidConstraint {
            option: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.kind.is_sub_command() {
            if self.required {
                return Err(constraint("sub-commands cannot be required"));
            }
            validate_options(&self.name, &self.options)?;
            if self.kind == OptionKind::SubCommandGroup
                && self.options.iter().any(|o| o.kind != OptionKind::SubCommand)
            {
                return Err(constraint("groups may only contain sub-commands"));
            }
            if self.kind == OptionKind::SubCommand
                && self.options.iter().any(|o| o.kind.is_sub_command())
            {
                return Err(constraint("sub-commands cannot be nested further"));
            }
        } else if !self.options.is_empty() {
            return Err(constraint("only sub-commands can have nested options"));
        }

        if !self.choices.is_empty() {
            if !self.kind.accepts_choices() {
                return Err(constraint("choices are only allowed on string/integer/number"));
            }
            if self.choices.len() > MAX_CHOICES {
                return Err(constraint("too many choices"));
            }
            for choice in &self.choices {
                let matches_kind = match (&choice.value, self.kind) {
                    (ChoiceValue::String(_), OptionKind::String) => true,
                    (ChoiceValue::Integer(_), OptionKind::Integer) => true,
                    (ChoiceValue::Integer(_) | ChoiceValue::Number(_), OptionKind::Number) => true,
                    _ => false,
                };
                if !matches_kind {
                    return Err(constraint(&format!(
                        "choice {:?} does not match option type {}",
                        choice.name, self.kind
                    )));
                }
            }
        }

        if (self.min_value.is_some() || self.max_value.is_some()) && !self.kind.is_numeric() {
            return Err(constraint("min_value/max_value require integer or number"));
        }
        if self.kind == OptionKind::Integer
            && [self.min_value, self.max_value]
                .iter()
                .flatten()
                .any(|v| v.fract() != 0.0)
        {
            return Err(constraint("integer bounds must be whole numbers"));
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(constraint("min_value is greater than max_value"));
            }
        }

        if (self.min_length.is_some() || self.max_length.is_some()) && self.kind != OptionKind::String {
            return Err(constraint("min_length/max_length require string"));
        }
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(constraint("min_length is greater than max_length"));
            }
        }

        Ok(())
    }

    /// ワイヤーフォーマットへ変換
    fn to_payload(&self) -> OptionPayload {
        let bound = |v: f64| -> JsonValue {
            if self.kind == OptionKind::Integer {
                JsonValue::from(v as i64)
            } else {
                JsonValue::from(v)
            }
        };

        OptionPayload {
            kind: self.kind.wire_code(),
            name: self.name.clone(),
            description: self.description.clone(),
            required: self.required,
            choices: self.choices.clone(),
            min_value: self.min_value.map(bound),
            max_value: self.max_value.map(bound),
            min_length: self.min_length,
            max_length: self.max_length,
            options: self.options.iter().map(|o| o.to_payload()).collect(),
        }
    }
}

/// コマンドのスキーマ部分（ハンドラーを除く）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSchema {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
    /// 明示的な上書きがない場合に実行を許可する権限ビットマスク
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_permissions: Option<u64>,
    /// ヘルプ表示用の分類
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl CommandSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            options: Vec::new(),
            default_permissions: None,
            category: None,
        }
    }

    pub fn option(mut self, option: OptionSpec) -> Self {
        self.options.push(option);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn default_permissions(mut self, bits: u64) -> Self {
        self.default_permissions = Some(bits);
        self
    }

    /// プラットフォームの制約に沿っているか検証
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_name(&self.name)?;
        validate_description(&self.name, &self.description)?;
        validate_options(&self.name, &self.options)
    }

    /// Discord APIへ送るペイロードを生成
    pub fn to_payload(&self) -> ApplicationCommandPayload {
        ApplicationCommandPayload {
            kind: CHAT_INPUT,
            name: self.name.clone(),
            description: self.description.clone(),
            options: self.options.iter().map(|o| o.to_payload()).collect(),
            default_member_permissions: self.default_permissions.map(|bits| bits.to_string()),
        }
    }
}

fn validate_name(name: &str) -> Result<(), SchemaError> {
    if NAME_PATTERN.is_match(name) && name.to_lowercase() == name {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_string()))
    }
}

fn validate_description(owner: &str, description: &str) -> Result<(), SchemaError> {
    let len = description.chars().count();
    if len == 0 || len > MAX_DESCRIPTION_LEN {
        return Err(SchemaError::InvalidDescription(owner.to_string()));
    }
    Ok(())
}

fn validate_options(owner: &str, options: &[OptionSpec]) -> Result<(), SchemaError> {
    if options.len() > MAX_OPTIONS {
        return Err(SchemaError::TooManyOptions(owner.to_string()));
    }

    let has_sub = options.iter().any(|o| o.kind.is_sub_command());
    let has_plain = options.iter().any(|o| !o.kind.is_sub_command());
    if has_sub && has_plain {
        return Err(SchemaError::MixedSubCommands(owner.to_string()));
    }

    let mut seen = HashSet::new();
    let mut optional_seen = false;
    for option in options {
        if !seen.insert(option.name.as_str()) {
            return Err(SchemaError::DuplicateOption(option.name.clone()));
        }
        if option.required && optional_seen {
            return Err(SchemaError::RequiredAfterOptional(option.name.clone()));
        }
        if !option.required {
            optional_seen = true;
        }
        option.validate()?;
    }

    Ok(())
}

/// CHAT_INPUT（Slash Command）のコマンド型番号
const CHAT_INPUT: u8 = 1;

/// アプリケーションコマンドのワイヤーフォーマット
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationCommandPayload {
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_member_permissions: Option<String>,
}

/// オプションのワイヤーフォーマット
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionPayload {
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<OptionChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionPayload>,
}

/// 記述子ファイル内の1エントリ
///
/// `handler` はハンドラーカタログのキー。
#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorEntry {
    #[serde(flatten)]
    pub schema: CommandSchema,
    pub handler: String,
}

/// レジストリに登録されるコマンド記述子
#[derive(Clone)]
pub struct CommandDescriptor {
    pub schema: CommandSchema,
    pub handler: Arc<dyn CommandHandler>,
    /// 読み込み元（直接登録された場合は `None`）
    pub origin: Option<SourceId>,
}

impl CommandDescriptor {
    pub fn new(schema: CommandSchema, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            schema,
            handler,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: SourceId) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn description(&self) -> &str {
        &self.schema.description
    }

    pub fn category(&self) -> Option<&str> {
        self.schema.category.as_deref()
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("schema", &self.schema)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_schema() -> CommandSchema {
        CommandSchema::new("echo", "入力をそのまま返します")
            .category("fun")
            .option(OptionSpec::new(OptionKind::String, "text", "返す文字列").required(true))
            .option(OptionSpec::new(OptionKind::Boolean, "quiet", "自分にだけ表示"))
    }

    #[test]
    fn test_valid_schema() {
        assert!(echo_schema().validate().is_ok());
    }

    #[test]
    fn test_invalid_names() {
        let too_long = "a".repeat(33);
        for name in ["Ping", "two words", "", too_long.as_str()] {
            let schema = CommandSchema::new(name, "desc");
            assert!(
                matches!(schema.validate(), Err(SchemaError::InvalidName(_))),
                "{:?} should be rejected",
                name
            );
        }
        assert!(CommandSchema::new("set-lang_2", "desc").validate().is_ok());
        assert!(CommandSchema::new("ä", "desc").validate().is_ok());
    }

    #[test]
    fn test_uncased_script_names() {
        for name in ["設定", "ようこそ", "नमस्ते", "สวัสดี", "设置-2"] {
            assert!(
                CommandSchema::new(name, "desc").validate().is_ok(),
                "{:?} should be accepted",
                name
            );
        }
        for name in ["Ä", "設定A", "設 定"] {
            assert!(
                matches!(
                    CommandSchema::new(name, "desc").validate(),
                    Err(SchemaError::InvalidName(_))
                ),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_invalid_description() {
        assert_eq!(
            CommandSchema::new("ping", "").validate(),
            Err(SchemaError::InvalidDescription("ping".to_string()))
        );
        let long = "あ".repeat(101);
        assert!(CommandSchema::new("ping", long).validate().is_err());
    }

    #[test]
    fn test_required_after_optional() {
        let schema = CommandSchema::new("echo", "desc")
            .option(OptionSpec::new(OptionKind::Boolean, "quiet", "desc"))
            .option(OptionSpec::new(OptionKind::String, "text", "desc").required(true));
        assert_eq!(
            schema.validate(),
            Err(SchemaError::RequiredAfterOptional("text".to_string()))
        );
    }

    #[test]
    fn test_duplicate_option() {
        let schema = CommandSchema::new("echo", "desc")
            .option(OptionSpec::new(OptionKind::String, "text", "desc"))
            .option(OptionSpec::new(OptionKind::String, "text", "desc"));
        assert!(matches!(schema.validate(), Err(SchemaError::DuplicateOption(_))));
    }

    #[test]
    fn test_too_many_options() {
        let mut schema = CommandSchema::new("many", "desc");
        for i in 0..26 {
            schema = schema.option(OptionSpec::new(OptionKind::String, format!("o{}", i), "desc"));
        }
        assert!(matches!(schema.validate(), Err(SchemaError::TooManyOptions(_))));
    }

    #[test]
    fn test_mixed_sub_commands() {
        let schema = CommandSchema::new("admin", "desc")
            .option(OptionSpec::new(OptionKind::SubCommand, "status", "desc"))
            .option(OptionSpec::new(OptionKind::String, "text", "desc"));
        assert!(matches!(schema.validate(), Err(SchemaError::MixedSubCommands(_))));
    }

    #[test]
    fn test_constraint_checks() {
        let mut bad_range = OptionSpec::new(OptionKind::Integer, "sides", "desc");
        bad_range.min_value = Some(10.0);
        bad_range.max_value = Some(2.0);
        let schema = CommandSchema::new("roll", "desc").option(bad_range);
        assert!(matches!(schema.validate(), Err(SchemaError::InvalidConstraint { .. })));

        let mut length_on_int = OptionSpec::new(OptionKind::Integer, "sides", "desc");
        length_on_int.max_length = Some(5);
        let schema = CommandSchema::new("roll", "desc").option(length_on_int);
        assert!(schema.validate().is_err());

        let mut wrong_choice = OptionSpec::new(OptionKind::Integer, "sides", "desc");
        wrong_choice.choices = vec![OptionChoice {
            name: "six".to_string(),
            value: ChoiceValue::String("6".to_string()),
        }];
        let schema = CommandSchema::new("roll", "desc").option(wrong_choice);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_integer_bounds_must_be_whole() {
        let mut fractional = OptionSpec::new(OptionKind::Integer, "sides", "desc");
        fractional.min_value = Some(2.5);
        let schema = CommandSchema::new("roll", "desc").option(fractional);
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::InvalidConstraint { ref reason, .. }) if reason.contains("whole")
        ));

        let mut fractional_max = OptionSpec::new(OptionKind::Integer, "sides", "desc");
        fractional_max.max_value = Some(99.9);
        assert!(CommandSchema::new("roll", "desc").option(fractional_max).validate().is_err());

        // number型なら小数でもよい
        let mut ratio = OptionSpec::new(OptionKind::Number, "ratio", "desc");
        ratio.min_value = Some(0.5);
        ratio.max_value = Some(1.5);
        assert!(CommandSchema::new("scale", "desc").option(ratio).validate().is_ok());

        let mut whole = OptionSpec::new(OptionKind::Integer, "sides", "desc");
        whole.min_value = Some(2.0);
        whole.max_value = Some(100.0);
        assert!(CommandSchema::new("roll", "desc").option(whole).validate().is_ok());
    }

    #[test]
    fn test_payload_shape() {
        let mut sides = OptionSpec::new(OptionKind::Integer, "sides", "面の数");
        sides.min_value = Some(2.0);
        sides.max_value = Some(100.0);
        let schema = echo_schema().option(sides).default_permissions(8);

        let payload = serde_json::to_value(schema.to_payload()).unwrap();
        assert_eq!(
            payload,
            json!({
                "type": 1,
                "name": "echo",
                "description": "入力をそのまま返します",
                "options": [
                    {"type": 3, "name": "text", "description": "返す文字列", "required": true},
                    {"type": 5, "name": "quiet", "description": "自分にだけ表示"},
                    {"type": 4, "name": "sides", "description": "面の数", "min_value": 2, "max_value": 100}
                ],
                "default_member_permissions": "8"
            })
        );
    }

    #[test]
    fn test_payload_omits_category() {
        let payload = serde_json::to_value(echo_schema().to_payload()).unwrap();
        assert!(payload.get("category").is_none());
        assert!(payload.get("default_member_permissions").is_none());
    }

    #[test]
    fn test_sub_command_payload() {
        let schema = CommandSchema::new("admin", "管理")
            .option(
                OptionSpec {
                    options: vec![OptionSpec::new(OptionKind::User, "user", "対象").required(true)],
                    ..OptionSpec::new(OptionKind::SubCommand, "inspect", "調査")
                },
            );
        assert!(schema.validate().is_ok());

        let payload = serde_json::to_value(schema.to_payload()).unwrap();
        assert_eq!(payload["options"][0]["type"], 1);
        assert_eq!(payload["options"][0]["options"][0]["type"], 6);
    }

    #[test]
    fn test_entry_deserialize() {
        let entry: DescriptorEntry = serde_json::from_value(json!({
            "name": "echo",
            "description": "desc",
            "handler": "echo",
            "category": "fun",
            "options": [
                {"type": "string", "name": "text", "description": "desc", "required": true,
                 "choices": [{"name": "a", "value": "a"}]}
            ]
        }))
        .unwrap();
        assert_eq!(entry.handler, "echo");
        assert_eq!(entry.schema.category.as_deref(), Some("fun"));
        assert_eq!(entry.schema.options[0].kind, OptionKind::String);
        assert_eq!(
            entry.schema.options[0].choices[0].value,
            ChoiceValue::String("a".to_string())
        );
    }

    #[test]
    fn test_entry_missing_handler() {
        let result = serde_json::from_value::<DescriptorEntry>(json!({
            "name": "echo",
            "description": "desc"
        }));
        assert!(result.is_err());
    }
}
