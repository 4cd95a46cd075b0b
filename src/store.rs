//! Magazyn konfiguracji gildii.
//!
//! `ConfigStore` to kontrakt kolaboratora (load / save z łatką). `GuildConfigs`
//! owija go w cache i per-gildiowy mutex: każdy odczyt-modyfikacja-zapis
//! przechodzi przez `update`, więc równoległe zdarzenia jednej gildii nie gubią
//! sobie nawzajem zmian.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use dashmap::DashMap;
use moka::future::Cache;
use serde_json::Value;
use serenity::async_trait;
use tokio::sync::Mutex;

use crate::error::{SentinelError, SentinelResult};
use crate::guild_config::{GuildConfig, merge_patch};

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_config(&self, guild_id: u64) -> Result<GuildConfig>;

    /// Nakłada łatkę (JSON merge patch) i zwraca dokument po zmianie.
    async fn save_config(&self, guild_id: u64, patch: Value) -> Result<GuildConfig>;
}

/* ==============================
   Implementacja w pamięci
   ============================== */

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    docs: DashMap<u64, Value>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wstaw gotowy dokument (np. w testach lub przy imporcie).
    pub fn seed(&self, guild_id: u64, doc: Value) {
        self.docs.insert(guild_id, doc);
    }

    /// Symulacja awarii odczytu.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Symulacja awarii zapisu.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load_config(&self, guild_id: u64) -> Result<GuildConfig> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("memory store: reads disabled");
        }
        match self.docs.get(&guild_id) {
            Some(doc) => Ok(serde_json::from_value(doc.clone())?),
            None => Ok(GuildConfig::default()),
        }
    }

    async fn save_config(&self, guild_id: u64, patch: Value) -> Result<GuildConfig> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store: writes disabled");
        }
        let mut entry = self
            .docs
            .entry(guild_id)
            .or_insert_with(|| Value::Object(Default::default()));
        let mut next = (*entry).clone();
        merge_patch(&mut next, &patch);
        let cfg: GuildConfig = serde_json::from_value(next.clone())?;
        *entry = next;
        Ok(cfg)
    }
}

/* ==============================
   Dostęp serializowany per gildia
   ============================== */

pub struct GuildConfigs {
    store: Arc<dyn ConfigStore>,
    cache: Cache<u64, GuildConfig>,
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl fmt::Debug for GuildConfigs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuildConfigs")
            .field("cached", &self.cache.entry_count())
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl GuildConfigs {
    pub fn new(store: Arc<dyn ConfigStore>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache: Cache::builder()
                .time_to_live(cache_ttl)
                .max_capacity(10_000)
                .build(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, guild_id: u64) -> Arc<Mutex<()>> {
        self.locks
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Usuń mutexy gildii, których nikt w tej chwili nie trzyma.
    pub fn evict_unused_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Konfiguracja z cache (albo z magazynu przy pudle).
    pub async fn get(&self, guild_id: u64) -> SentinelResult<GuildConfig> {
        if let Some(cfg) = self.cache.get(&guild_id).await {
            return Ok(cfg);
        }
        let cfg = self
            .store
            .load_config(guild_id)
            .await
            .map_err(|e| SentinelError::config(guild_id, e))?;
        self.cache.insert(guild_id, cfg.clone()).await;
        Ok(cfg)
    }

    /// Jak `get`, ale przy awarii magazynu degraduje do wartości domyślnych.
    pub async fn get_or_default(&self, guild_id: u64) -> GuildConfig {
        match self.get(guild_id).await {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = ?e, guild_id, "config unavailable, using defaults");
                GuildConfig::default()
            }
        }
    }

    /// Odczyt-modyfikacja-zapis pod mutexem gildii.
    ///
    /// `f` dostaje świeży dokument z magazynu i zwraca łatkę (albo `None`, gdy
    /// nie ma czego zapisywać) oraz dowolny wynik dla wołającego.
    pub async fn update<F, R>(&self, guild_id: u64, f: F) -> SentinelResult<(GuildConfig, R)>
    where
        F: FnOnce(&GuildConfig) -> (Option<Value>, R) + Send,
        R: Send,
    {
        let lock = self.lock_for(guild_id);
        let _guard = lock.lock().await;

        let current = self
            .store
            .load_config(guild_id)
            .await
            .map_err(|e| SentinelError::config(guild_id, e))?;

        let (patch, out) = f(&current);
        let Some(patch) = patch else {
            self.cache.insert(guild_id, current.clone()).await;
            return Ok((current, out));
        };

        match self.store.save_config(guild_id, patch).await {
            Ok(saved) => {
                self.cache.insert(guild_id, saved.clone()).await;
                Ok((saved, out))
            }
            Err(e) => {
                self.cache.invalidate(&guild_id).await;
                Err(SentinelError::config(guild_id, e))
            }
        }
    }

    /// Zapis gotowej łatki (bez odczytu), też pod mutexem gildii.
    pub async fn patch(&self, guild_id: u64, patch: Value) -> SentinelResult<GuildConfig> {
        let lock = self.lock_for(guild_id);
        let _guard = lock.lock().await;
        match self.store.save_config(guild_id, patch).await {
            Ok(saved) => {
                self.cache.insert(guild_id, saved.clone()).await;
                Ok(saved)
            }
            Err(e) => {
                self.cache.invalidate(&guild_id).await;
                Err(SentinelError::config(guild_id, e))
            }
        }
    }
}
