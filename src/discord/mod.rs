// src/discord/mod.rs
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures_util::FutureExt;
use serenity::all::*;
use serenity::async_trait;

use crate::AppContext;
use crate::verify::{Verify, should_notify_on_join, reply_text};

pub mod platform;

pub struct Handler {
    pub app: Arc<AppContext>,
}

/// Nic nie wychodzi z handlera: panika w środku kończy się wpisem w logu.
async fn guarded(event: &'static str, fut: impl Future<Output = ()>) {
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        tracing::error!(event, "event handler panicked");
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(guilds = ready.guilds.len(), "Logged in as {}", ready.user.name);
    }

    // _is_new zgodnie z Serenity 0.12
    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        let gid = guild.id.get();
        guarded("guild_create", async {
            self.app.sentinel.warmup(gid).await;
            tracing::info!(guild=%guild.name, gid, "panic state restored + webhook baseline seeded");
        })
        .await;
    }

    async fn channel_delete(
        &self,
        _ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        guarded("channel_delete", async {
            self.app
                .sentinel
                .antinuke
                .notify_channel_delete(channel.guild_id.get())
                .await;
        })
        .await;
    }

    async fn guild_role_delete(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        _removed_role_id: RoleId,
        _removed_role_data_if_available: Option<Role>,
    ) {
        guarded("guild_role_delete", async {
            self.app.sentinel.antinuke.notify_role_delete(guild_id.get()).await;
        })
        .await;
    }

    async fn guild_role_update(&self, _ctx: Context, old_data_if_available: Option<Role>, new: Role) {
        guarded("guild_role_update", async {
            let old = old_data_if_available.map(|r| r.permissions.bits());
            self.app
                .sentinel
                .antinuke
                .notify_role_update(new.guild_id.get(), old, new.permissions.bits())
                .await;
        })
        .await;
    }

    async fn guild_ban_addition(&self, _ctx: Context, guild_id: GuildId, _banned_user: User) {
        guarded("guild_ban_addition", async {
            self.app.sentinel.antinuke.notify_ban(guild_id.get()).await;
        })
        .await;
    }

    async fn webhook_update(&self, _ctx: Context, guild_id: GuildId, belongs_to_channel_id: ChannelId) {
        guarded("webhook_update", async {
            let verdict = self.app.sentinel.webhooks.on_webhooks_update(guild_id.get()).await;
            tracing::debug!(gid=%guild_id.get(), channel=%belongs_to_channel_id.get(), ?verdict, "webhooks reconciled");
        })
        .await;
    }

    async fn guild_member_addition(&self, _ctx: Context, member: Member) {
        let gid = member.guild_id.get();
        let uid = member.user.id.get();
        if member.user.bot {
            return;
        }
        guarded("guild_member_addition", async {
            let sentinel = &self.app.sentinel;
            let cfg = sentinel.configs.get_or_default(gid).await;
            if !cfg.modules.introduce.verify_on_join {
                return;
            }
            let outcome = sentinel.gateway.process(gid, uid).await;
            if should_notify_on_join(&outcome) {
                if let Err(e) = sentinel.messenger.send_dm(uid, reply_text(&outcome)).await {
                    tracing::debug!(error=?e, gid, uid, "join DM not delivered");
                }
            }
        })
        .await;
    }

    /// Brama interakcji: przycisk weryfikacji
    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        guarded("interaction_create", async {
            Verify::on_interaction(&ctx, &self.app.sentinel, interaction).await;
        })
        .await;
    }
}

fn intents_from_settings(names: &[String]) -> GatewayIntents {
    let mut i = GatewayIntents::empty();
    for n in names {
        match n.as_str() {
            "GUILDS" => i |= GatewayIntents::GUILDS,
            "GUILD_MEMBERS" => i |= GatewayIntents::GUILD_MEMBERS,
            "GUILD_MODERATION" => i |= GatewayIntents::GUILD_MODERATION,
            "GUILD_WEBHOOKS" => i |= GatewayIntents::GUILD_WEBHOOKS,
            "GUILD_MESSAGES" => i |= GatewayIntents::GUILD_MESSAGES,
            other => tracing::warn!(intent = other, "unknown gateway intent ignored"),
        }
    }
    i
}

pub async fn run_bot(ctx: Arc<AppContext>) -> Result<()> {
    let token = &ctx.settings.discord.token;
    if token.is_empty() {
        anyhow::bail!("Brak tokenu Discord (TSS_DISCORD__TOKEN). Uzupełnij w .env.");
    }

    let intents = intents_from_settings(&ctx.settings.discord.intents);

    let handler = Handler { app: ctx.clone() };

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(handler)
        .await?;

    tracing::info!("Discord client starting…");
    client.start().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_cover_threat_events() {
        let names: Vec<String> = ["GUILDS", "GUILD_MODERATION", "GUILD_WEBHOOKS", "BOGUS"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let i = intents_from_settings(&names);
        assert!(i.contains(GatewayIntents::GUILD_WEBHOOKS));
        assert!(i.contains(GatewayIntents::GUILD_MODERATION));
        assert!(!i.contains(GatewayIntents::GUILD_MEMBERS));
    }
}
