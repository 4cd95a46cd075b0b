// src/lib.rs

pub mod antinuke;
pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod discord;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod guild_config;
pub mod logging;
pub mod panic;
pub mod platform;
pub mod seclog;
pub mod sentinel;
pub mod store;
pub mod verify;
pub mod window;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

use serenity::all::Http;

use clock::SystemClock;
use config::Settings;
use discord::platform::SerenityPlatform;
use sentinel::Sentinel;
use store::{ConfigStore, MemoryConfigStore};

/// Globalny kontekst aplikacji.
/// Tu trzymamy konfigurację i rdzeń `Sentinel`.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub sentinel: Arc<Sentinel>,
}

impl AppContext {
    /// Bootstrap całej aplikacji:
    /// - logi
    /// - magazyn konfiguracji (Postgres albo pamięć, gdy brak URL)
    /// - rdzeń Sentinel + sprzątanie okien w tle
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        // 1) logi
        logging::init(&settings);

        // 2) magazyn
        let store: Arc<dyn ConfigStore> = if settings.database.url.is_empty() {
            tracing::warn!("database.url empty – guild config kept in memory only");
            Arc::new(MemoryConfigStore::new())
        } else {
            let db = db::connect(
                &settings.database.url,
                settings.database.max_connections,
                settings.database.statement_timeout_ms,
            )
            .await?;
            db::ensure_tables(&db).await?;
            Arc::new(db::PgConfigStore::new(db))
        };

        // 3) rdzeń
        let http = Arc::new(Http::new(&settings.discord.token));
        let sentinel = Sentinel::new(
            Arc::new(SerenityPlatform::new(http)),
            store,
            Arc::new(SystemClock),
            &settings.sentinel,
        );
        Sentinel::spawn_sweep(
            &sentinel,
            settings.sentinel.sweep_interval(),
            settings.sentinel.idle_after(),
        );

        Ok(Arc::new(Self {
            settings,
            sentinel,
        }))
    }

    /// Środowisko: "production" | "development".
    #[inline]
    pub fn env(&self) -> &str {
        &self.settings.env
    }
}

/// Start klienta Discorda (+ serwer /health, jeśli skonfigurowano adres).
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    if let Some(bind) = ctx.settings.sentinel.api_bind.as_deref() {
        let addr: SocketAddr = bind.parse()?;
        let sentinel = ctx.sentinel.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(addr, sentinel).await {
                tracing::error!(error=?e, %addr, "ops API stopped");
            }
        });
    }
    discord::run_bot(ctx).await
}
