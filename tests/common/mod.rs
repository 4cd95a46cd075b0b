// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::Value;
use serenity::async_trait;

use tigris_sentinel::clock::{Clock, ManualClock};
use tigris_sentinel::config::SentinelSettings;
use tigris_sentinel::platform::{MemberInfo, Messageable, RoleMutable, WebhookInfo, WebhookOwner};
use tigris_sentinel::sentinel::Sentinel;
use tigris_sentinel::store::MemoryConfigStore;

pub const VERIFIED: u64 = 900;
pub const UNVERIFIED: u64 = 901;
pub const NEW_ACCOUNT: u64 = 902;
pub const SUSPICIOUS: u64 = 903;
pub const STAFF: u64 = 904;

const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleCall {
    Add { guild: u64, user: u64, role: u64 },
    Remove { guild: u64, user: u64, role: u64 },
}

/// Atrapa platformy: członkowie i webhooki w pamięci, każde wywołanie zapisane.
#[derive(Default)]
pub struct FakePlatform {
    members: Mutex<HashMap<(u64, u64), MemberInfo>>,
    webhooks: Mutex<HashMap<u64, Vec<WebhookInfo>>>,
    role_calls: Mutex<Vec<RoleCall>>,
    deleted: Mutex<Vec<u64>>,
    undeletable: Mutex<HashSet<u64>>,
    messages: Mutex<Vec<(u64, String)>>,
    fail_role_grants: AtomicBool,
}

impl FakePlatform {
    pub fn add_member(&self, guild: u64, member: MemberInfo) {
        self.members.lock().unwrap().insert((guild, member.user_id), member);
    }

    pub fn add_webhook(&self, guild: u64, id: u64) {
        self.webhooks.lock().unwrap().entry(guild).or_default().push(WebhookInfo {
            id,
            channel_id: Some(1),
            name: Some(format!("hook-{id}")),
        });
    }

    pub fn remove_webhook(&self, guild: u64, id: u64) {
        if let Some(list) = self.webhooks.lock().unwrap().get_mut(&guild) {
            list.retain(|w| w.id != id);
        }
    }

    pub fn webhook_ids(&self, guild: u64) -> Vec<u64> {
        self.webhooks
            .lock()
            .unwrap()
            .get(&guild)
            .map(|l| l.iter().map(|w| w.id).collect())
            .unwrap_or_default()
    }

    pub fn make_undeletable(&self, id: u64) {
        self.undeletable.lock().unwrap().insert(id);
    }

    pub fn fail_role_grants(&self, fail: bool) {
        self.fail_role_grants.store(fail, Ordering::SeqCst);
    }

    pub fn role_calls(&self) -> Vec<RoleCall> {
        self.role_calls.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<u64> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(u64, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoleMutable for FakePlatform {
    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<Option<MemberInfo>> {
        Ok(self.members.lock().unwrap().get(&(guild_id, user_id)).cloned())
    }

    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64, _reason: &str) -> Result<()> {
        if role_id == VERIFIED && self.fail_role_grants.load(Ordering::SeqCst) {
            bail!("missing permissions");
        }
        self.role_calls.lock().unwrap().push(RoleCall::Add {
            guild: guild_id,
            user: user_id,
            role: role_id,
        });
        Ok(())
    }

    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64, _reason: &str) -> Result<()> {
        self.role_calls.lock().unwrap().push(RoleCall::Remove {
            guild: guild_id,
            user: user_id,
            role: role_id,
        });
        Ok(())
    }
}

#[async_trait]
impl WebhookOwner for FakePlatform {
    async fn list_webhooks(&self, guild_id: u64) -> Result<Vec<WebhookInfo>> {
        Ok(self
            .webhooks
            .lock()
            .unwrap()
            .get(&guild_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_webhook(&self, webhook_id: u64, _reason: &str) -> Result<()> {
        if self.undeletable.lock().unwrap().contains(&webhook_id) {
            bail!("403 missing access");
        }
        for list in self.webhooks.lock().unwrap().values_mut() {
            list.retain(|w| w.id != webhook_id);
        }
        self.deleted.lock().unwrap().push(webhook_id);
        Ok(())
    }
}

#[async_trait]
impl Messageable for FakePlatform {
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<()> {
        self.messages.lock().unwrap().push((channel_id, content.to_string()));
        Ok(())
    }

    async fn send_dm(&self, user_id: u64, content: &str) -> Result<()> {
        self.messages.lock().unwrap().push((user_id, content.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryConfigStore>,
    pub platform: Arc<FakePlatform>,
    pub sentinel: Arc<Sentinel>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryConfigStore::new()))
    }

    pub fn with_store(store: Arc<MemoryConfigStore>) -> Self {
        // stała godzina w środku dnia – testy nie przechodzą przez północ
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let platform = Arc::new(FakePlatform::default());
        let sentinel = Sentinel::new(
            platform.clone(),
            store.clone(),
            clock.clone(),
            &SentinelSettings::default(),
        );
        Self {
            clock,
            store,
            platform,
            sentinel,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Snowflake obiektu utworzonego „teraz” wg zegara testu; `seq` w dolnych bitach.
    pub fn snowflake_now(&self, seq: u64) -> u64 {
        let ms = (self.now().timestamp_millis() - DISCORD_EPOCH_MS) as u64;
        (ms << 22) | (seq & 0x3F_FFFF)
    }

    /// Gildia z rolą docelową i dowolnymi nadpisaniami `modules.introduce`.
    pub fn configure(&self, guild: u64, introduce: Value) {
        let mut intro = serde_json::json!({ "verified_role_id": VERIFIED });
        tigris_sentinel::guild_config::merge_patch(&mut intro, &introduce);
        self.store
            .seed(guild, serde_json::json!({ "modules": { "introduce": intro } }));
    }

    /// Członek z kontem sprzed `account_days` dni, obecny od `joined_minutes` minut.
    pub fn join(&self, guild: u64, user: u64, account_days: i64, joined_minutes: i64) {
        self.join_with_roles(guild, user, account_days, joined_minutes, vec![]);
    }

    pub fn join_with_roles(&self, guild: u64, user: u64, account_days: i64, joined_minutes: i64, roles: Vec<u64>) {
        let now = self.now();
        self.platform.add_member(
            guild,
            MemberInfo {
                user_id: user,
                roles,
                account_created_at: now - TimeDelta::days(account_days),
                joined_at: Some(now - TimeDelta::minutes(joined_minutes)),
            },
        );
    }
}

/// Daj szansę taskom w tle (timery bramki) dokończyć pracę.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
