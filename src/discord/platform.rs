//! Adapter zdolności platformy nad `serenity::http::Http`.

use std::sync::Arc;

use anyhow::Result;
use chrono::DateTime;
use serenity::all::{ChannelId, GuildId, Http, RoleId, UserId, WebhookId};
use serenity::async_trait;

use crate::error::SentinelError;
use crate::platform::{MemberInfo, Messageable, RoleMutable, WebhookInfo, WebhookOwner, snowflake_created_at};

#[derive(Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn failed(op: &'static str) -> impl FnOnce(serenity::Error) -> anyhow::Error {
    move |e| SentinelError::platform(op, e.into()).into()
}

fn is_not_found(err: &serenity::Error) -> bool {
    matches!(err, serenity::Error::Http(e) if e.status_code().map(|s| s.as_u16()) == Some(404))
}

#[async_trait]
impl RoleMutable for SerenityPlatform {
    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<Option<MemberInfo>> {
        let member = match self
            .http
            .get_member(GuildId::new(guild_id), UserId::new(user_id))
            .await
        {
            Ok(m) => m,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(failed("get_member")(e)),
        };
        Ok(Some(MemberInfo {
            user_id,
            roles: member.roles.iter().map(|r| r.get()).collect(),
            account_created_at: snowflake_created_at(user_id),
            joined_at: member
                .joined_at
                .and_then(|t| DateTime::from_timestamp(t.unix_timestamp(), 0)),
        }))
    }

    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> Result<()> {
        self.http
            .add_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await
            .map_err(failed("add_member_role"))
    }

    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> Result<()> {
        self.http
            .remove_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await
            .map_err(failed("remove_member_role"))
    }
}

#[async_trait]
impl WebhookOwner for SerenityPlatform {
    async fn list_webhooks(&self, guild_id: u64) -> Result<Vec<WebhookInfo>> {
        let hooks = self
            .http
            .get_guild_webhooks(GuildId::new(guild_id))
            .await
            .map_err(failed("get_guild_webhooks"))?;
        Ok(hooks
            .into_iter()
            .map(|w| WebhookInfo {
                id: w.id.get(),
                channel_id: w.channel_id.map(|c| c.get()),
                name: w.name,
            })
            .collect())
    }

    async fn delete_webhook(&self, webhook_id: u64, reason: &str) -> Result<()> {
        match self
            .http
            .delete_webhook(WebhookId::new(webhook_id), Some(reason))
            .await
        {
            Ok(()) => Ok(()),
            // już nie istnieje – cel osiągnięty
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(failed("delete_webhook")(e)),
        }
    }
}

#[async_trait]
impl Messageable for SerenityPlatform {
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<()> {
        ChannelId::new(channel_id)
            .say(&self.http, content)
            .await
            .map_err(failed("send_message"))?;
        Ok(())
    }

    async fn send_dm(&self, user_id: u64, content: &str) -> Result<()> {
        let dm = UserId::new(user_id)
            .create_dm_channel(&self.http)
            .await
            .map_err(failed("create_dm_channel"))?;
        dm.id.say(&self.http, content).await.map_err(failed("send_dm"))?;
        Ok(())
    }
}
