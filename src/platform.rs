//! Wąskie interfejsy platformy, z których korzysta rdzeń.
//!
//! Rdzeń nie dotyka typów serenity bezpośrednio; adapter w `discord::platform`
//! implementuje te cechy nad `Http`, a testy podstawiają własne atrapy.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serenity::async_trait;

/// 2015-01-01 UTC w ms – epoka snowflake'ów Discorda.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub user_id: u64,
    pub roles: Vec<u64>,
    pub account_created_at: DateTime<Utc>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl MemberInfo {
    pub fn has_any_role(&self, role_ids: &[u64]) -> bool {
        self.roles.iter().any(|r| role_ids.contains(r))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookInfo {
    pub id: u64,
    pub channel_id: Option<u64>,
    pub name: Option<String>,
}

#[async_trait]
pub trait RoleMutable: Send + Sync {
    /// `Ok(None)` gdy członka nie ma już na serwerze.
    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<Option<MemberInfo>>;
    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> Result<()>;
    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> Result<()>;
}

#[async_trait]
pub trait WebhookOwner: Send + Sync {
    async fn list_webhooks(&self, guild_id: u64) -> Result<Vec<WebhookInfo>>;
    async fn delete_webhook(&self, webhook_id: u64, reason: &str) -> Result<()>;
}

#[async_trait]
pub trait Messageable: Send + Sync {
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<()>;
    async fn send_dm(&self, user_id: u64, content: &str) -> Result<()>;
}

/// Wszystkie zdolności naraz – to, co dostarcza adapter platformy.
pub trait Platform: RoleMutable + WebhookOwner + Messageable {}

impl<T: RoleMutable + WebhookOwner + Messageable> Platform for T {}

/// Moment utworzenia konta/obiektu zakodowany w snowflake'u.
pub fn snowflake_created_at(id: u64) -> DateTime<Utc> {
    let ms = (id >> 22) as i64 + DISCORD_EPOCH_MS;
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snowflake_at(at: DateTime<Utc>) -> u64 {
        let ms = (at.timestamp_millis() - DISCORD_EPOCH_MS).max(0) as u64;
        ms << 22
    }

    #[test]
    fn snowflake_timestamp_roundtrip() {
        // znany snowflake z dokumentacji Discorda: 2016-04-30 11:18:25.796 UTC
        let at = snowflake_created_at(175_928_847_299_117_063);
        assert_eq!(at.timestamp_millis(), 1_462_015_105_796);
        assert_eq!(snowflake_created_at(snowflake_at(at)), at);
    }
}
