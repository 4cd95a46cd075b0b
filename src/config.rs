use std::time::Duration;

use anyhow::Result;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub discord: Discord,
    pub database: Database,
    pub logging: Logging,
    #[serde(default)]
    pub sentinel: SentinelSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Discord {
    pub token: String,
    pub intents: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Database {
    /// Pusty URL = magazyn konfiguracji w pamięci (bez Postgresa).
    pub url: String,
    pub max_connections: Option<u32>,
    /// `statement_timeout` ustawiany na każdym połączeniu puli.
    pub statement_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub json: Option<bool>,
    pub level: Option<String>,
}

/// Ustawienia rdzenia reagowania na zagrożenia.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SentinelSettings {
    /// Co ile sekund sprzątamy bezczynne okna.
    pub sweep_secs: u64,
    /// Po ilu minutach bez zdarzeń klucz okna jest usuwany.
    pub idle_minutes: i64,
    pub config_cache_ttl_secs: u64,
    /// Kanał Discorda na zdarzenia bezpieczeństwa (opcjonalnie).
    pub log_channel_id: Option<u64>,
    /// Adres HTTP dla /health i podglądu statusu; brak = bez serwera.
    pub api_bind: Option<String>,
}

impl Default for SentinelSettings {
    fn default() -> Self {
        Self {
            sweep_secs: 60,
            idle_minutes: 30,
            config_cache_ttl_secs: 30,
            log_channel_id: None,
            api_bind: None,
        }
    }
}

impl SentinelSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs.max(1))
    }

    pub fn idle_after(&self) -> TimeDelta {
        TimeDelta::minutes(self.idle_minutes.max(1))
    }

    pub fn config_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config_cache_ttl_secs.max(1))
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Które środowisko?
        let env = std::env::var("TSS_ENV").unwrap_or_else(|_| "development".to_string());

        // Załaduj .env.<env> i .env (jeśli są)
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        // Domyślne wartości
        #[derive(Deserialize, Serialize)]
        struct Defaults {
            env: String,
            app: App,
            discord: Discord,
            database: Database,
            logging: Logging,
            sentinel: SentinelSettings,
        }

        let defaults = Defaults {
            env: env.clone(),
            app: App {
                name: "Tigris Sentinel".into(),
            },
            discord: Discord {
                token: "".into(),
                intents: vec![
                    "GUILDS".into(),
                    "GUILD_MEMBERS".into(),
                    "GUILD_MODERATION".into(),
                    "GUILD_WEBHOOKS".into(),
                ],
            },
            database: Database {
                url: "".into(),
                max_connections: Some(10),
                statement_timeout_ms: Some(5_000),
            },
            logging: Logging {
                json: Some(false),
                level: Some("info".into()),
            },
            sentinel: SentinelSettings::default(),
        };

        // Warstwy: domyślne -> plik TOML -> zmienne środowiskowe TSS_*
        let figment = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(format!("config/{}.toml", env)))
            // TSS_DATABASE__URL => database.url, TSS_SENTINEL__SWEEP_SECS => sentinel.sweep_secs
            .merge(Env::prefixed("TSS_").split("__"));

        let mut s: Settings = figment.extract()?;
        s.env = env;

        // Uzupełnij brakujące domyślne
        if s.database.max_connections.is_none() {
            s.database.max_connections = Some(10);
        }

        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_settings_floor_degenerate_values() {
        let s = SentinelSettings {
            sweep_secs: 0,
            idle_minutes: -5,
            config_cache_ttl_secs: 0,
            log_channel_id: None,
            api_bind: None,
        };
        assert_eq!(s.sweep_interval(), Duration::from_secs(1));
        assert_eq!(s.idle_after(), TimeDelta::minutes(1));
        assert_eq!(s.config_cache_ttl(), Duration::from_secs(1));
    }

    #[test]
    fn sentinel_section_is_optional() {
        let s: Settings = Figment::from(Serialized::defaults(serde_json::json!({
            "env": "test",
            "app": { "name": "x" },
            "discord": { "token": "", "intents": [] },
            "database": { "url": "", "max_connections": 1, "statement_timeout_ms": null },
            "logging": { "json": true, "level": "debug" },
        })))
        .extract()
        .unwrap();
        assert_eq!(s.sentinel.sweep_secs, 60);
        assert_eq!(s.logging.json, Some(true));
    }
}
