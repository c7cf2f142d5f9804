use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::bulker::BulkerSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub bulker: BulkerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Users allowed to run commands; empty means everyone
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    /// Command prefix; an empty string means only mentions are recognized.
    /// `/name` messages are Telegram bot commands and go to the slash table instead.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Reply for unknown commands; an empty string disables it
    #[serde(default = "default_unknown_command_message")]
    pub unknown_command_message: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Messages kept per channel; 0 disables the cache
    #[serde(default = "default_cache_size")]
    pub size: usize,
    /// Per-channel overrides, keyed by chat ID
    #[serde(default)]
    pub channel_sizes: HashMap<String, usize>,
    /// Load recent history when the connection comes up
    #[serde(default = "default_true")]
    pub ensure_caching: bool,
    #[serde(default = "default_prefill_delay_ms")]
    pub prefill_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BulkerConfig {
    #[serde(default = "default_bulker_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_quiet_interval_ms")]
    pub quiet_interval_ms: u64,
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_true")]
    pub allow_direct_messages: bool,
    /// Chats the bot responds in; empty means all
    #[serde(default)]
    pub allowed_channel_ids: Vec<i64>,
}

/// Telegram chat IDs are signed; the bot core keys channels by the same 64 bits unsigned.
pub fn channel_key(chat_id: i64) -> u64 {
    chat_id as u64
}

fn default_prefix() -> String {
    "!".to_string()
}

fn default_unknown_command_message() -> String {
    "Unknown command. Consider the help command?".to_string()
}

fn default_cache_size() -> usize {
    200
}

fn default_true() -> bool {
    true
}

fn default_prefill_delay_ms() -> u64 {
    100
}

fn default_bulker_delay_ms() -> u64 {
    400
}

fn default_quiet_interval_ms() -> u64 {
    1500
}

fn default_max_payload_len() -> usize {
    1800
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            unknown_command_message: default_unknown_command_message(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            channel_sizes: HashMap::new(),
            ensure_caching: true,
            prefill_delay_ms: default_prefill_delay_ms(),
        }
    }
}

impl Default for BulkerConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_bulker_delay_ms(),
            quiet_interval_ms: default_quiet_interval_ms(),
            max_payload_len: default_max_payload_len(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            allow_direct_messages: true,
            allowed_channel_ids: Vec::new(),
        }
    }
}

impl CommandsConfig {
    pub fn prefix(&self) -> Option<String> {
        Some(self.prefix.clone()).filter(|p| !p.is_empty())
    }

    pub fn unknown_command_message(&self) -> Option<String> {
        Some(self.unknown_command_message.clone()).filter(|m| !m.is_empty())
    }
}

impl CacheConfig {
    /// Per-channel size overrides with parsed channel IDs
    pub fn channel_sizes(&self) -> Result<HashMap<u64, usize>> {
        self.channel_sizes
            .iter()
            .map(|(id, size)| {
                let id = id
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("Invalid chat ID in [cache.channel_sizes]: {:?}", id))?;
                Ok((channel_key(id), *size))
            })
            .collect()
    }

    pub fn prefill_delay(&self) -> Duration {
        Duration::from_millis(self.prefill_delay_ms)
    }
}

impl BulkerConfig {
    pub fn settings(&self) -> BulkerSettings {
        BulkerSettings {
            delay: Duration::from_millis(self.delay_ms),
            quiet_interval: Duration::from_millis(self.quiet_interval_ms),
            max_payload_len: self.max_payload_len,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Invalid TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("[telegram] bot_token must not be empty");
        }
        if self.commands.prefix.starts_with('/') {
            bail!("[commands] prefix must not start with '/', which Telegram reserves for bot commands");
        }
        if self.bulker.max_payload_len == 0 {
            bail!("[bulker] max_payload_len must be greater than zero");
        }
        self.cache.channel_sizes()?;
        Ok(())
    }

    /// Whether a message from this user in this channel should be looked at
    pub fn should_pay_attention(&self, channel_id: u64, user_id: u64) -> bool {
        let channel_ok = self.general.allowed_channel_ids.is_empty()
            || self
                .general
                .allowed_channel_ids
                .iter()
                .any(|id| channel_key(*id) == channel_id);
        let user_ok = self.telegram.allowed_user_ids.is_empty()
            || self.telegram.allowed_user_ids.contains(&user_id);
        channel_ok && user_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[telegram]
bot_token = "123:abc"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.commands.prefix(), Some("!".to_string()));
        assert!(config.commands.unknown_command_message().is_some());
        assert_eq!(config.cache.size, 200);
        assert!(config.cache.ensure_caching);
        assert_eq!(config.bulker.settings(), BulkerSettings::default());
        assert!(config.general.allow_direct_messages);
        assert!(config.should_pay_attention(1, 2));
    }

    #[test]
    fn test_negative_chat_ids() {
        let config = Config::parse(
            r#"
[telegram]
bot_token = "123:abc"

[cache.channel_sizes]
"-100123" = 0

[general]
allowed_channel_ids = [-100123]
"#,
        )
        .unwrap();
        let key = channel_key(-100123);
        assert_eq!(config.cache.channel_sizes().unwrap(), HashMap::from([(key, 0)]));
        assert!(config.should_pay_attention(key, 1));
        assert!(!config.should_pay_attention(100123, 1));
        assert_eq!(key as i64, -100123);
    }

    #[test]
    fn test_channel_sizes_and_filters() {
        let config = Config::parse(
            r#"
[telegram]
bot_token = "123:abc"
allowed_user_ids = [7]

[commands]
prefix = ""
unknown_command_message = ""

[cache]
size = 50
prefill_delay_ms = 0

[cache.channel_sizes]
"42" = 10

[bulker]
delay_ms = 250
max_payload_len = 4000

[general]
allow_direct_messages = false
allowed_channel_ids = [42]
"#,
        )
        .unwrap();
        assert_eq!(config.commands.prefix(), None);
        assert_eq!(config.commands.unknown_command_message(), None);
        assert_eq!(config.cache.channel_sizes().unwrap(), HashMap::from([(42, 10)]));
        assert_eq!(config.cache.prefill_delay(), Duration::ZERO);
        let settings = config.bulker.settings();
        assert_eq!(settings.delay, Duration::from_millis(250));
        assert_eq!(settings.quiet_interval, Duration::from_millis(1500));
        assert_eq!(settings.max_payload_len, 4000);
        assert!(config.should_pay_attention(42, 7));
        assert!(!config.should_pay_attention(43, 7));
        assert!(!config.should_pay_attention(42, 8));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::parse("[telegram]\nbot_token = \"\"\n").is_err());
        assert!(Config::parse(&format!("{}\n[bulker]\nmax_payload_len = 0\n", MINIMAL)).is_err());
        assert!(Config::parse(&format!("{}\n[cache.channel_sizes]\nabc = 1\n", MINIMAL)).is_err());
        assert!(Config::parse(&format!("{}\n[commands]\nprefix = \"/\"\n", MINIMAL)).is_err());
        assert!(Config::parse("").is_err());
    }
}
