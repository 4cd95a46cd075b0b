use anyhow::Result;
use serde_json::Value;
use serenity::async_trait;
use sqlx::{
    Pool, Postgres,
    postgres::{PgConnectOptions, PgPoolOptions},
};

use crate::guild_config::{GuildConfig, merge_patch};
use crate::store::ConfigStore;

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str, max: Option<u32>, statement_timeout_ms: Option<u64>) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(max.unwrap_or(10))
        .connect_with(connect_options(url, statement_timeout_ms)?)
        .await?;

    Ok(pool)
}

fn connect_options(url: &str, statement_timeout_ms: Option<u64>) -> Result<PgConnectOptions> {
    let opts: PgConnectOptions = url.parse()?;
    Ok(match statement_timeout_ms {
        Some(ms) if ms > 0 => opts.options([("statement_timeout", ms.to_string())]),
        _ => opts,
    })
}

/// Schemat tworzony idempotentnie przy starcie (jedna tabela, bez migracji).
pub async fn ensure_tables(pool: &Db) -> Result<()> {
    sqlx::query("CREATE SCHEMA IF NOT EXISTS tss")
        .execute(pool)
        .await?;
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS tss.guild_config (
               guild_id   BIGINT PRIMARY KEY,
               config     JSONB NOT NULL DEFAULT '{}'::jsonb,
               updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
           )"#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Dokument konfiguracji gildii w Postgresie (JSONB, jeden wiersz na gildię).
#[derive(Debug, Clone)]
pub struct PgConfigStore {
    db: Db,
}

impl PgConfigStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn load_config(&self, guild_id: u64) -> Result<GuildConfig> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT config FROM tss.guild_config WHERE guild_id = $1")
                .bind(guild_id as i64)
                .fetch_optional(&self.db)
                .await?;
        match row {
            Some((doc,)) => Ok(serde_json::from_value(doc)?),
            None => Ok(GuildConfig::default()),
        }
    }

    /// Łatka nakładana w transakcji na zablokowanym wierszu.
    async fn save_config(&self, guild_id: u64, patch: Value) -> Result<GuildConfig> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO tss.guild_config (guild_id) VALUES ($1) ON CONFLICT (guild_id) DO NOTHING",
        )
        .bind(guild_id as i64)
        .execute(&mut *tx)
        .await?;

        let (mut doc,): (Value,) =
            sqlx::query_as("SELECT config FROM tss.guild_config WHERE guild_id = $1 FOR UPDATE")
                .bind(guild_id as i64)
                .fetch_one(&mut *tx)
                .await?;
        merge_patch(&mut doc, &patch);
        // walidacja przed zapisem – zepsuty dokument nie trafia do bazy
        let cfg: GuildConfig = serde_json::from_value(doc.clone())?;

        sqlx::query("UPDATE tss.guild_config SET config = $2, updated_at = now() WHERE guild_id = $1")
            .bind(guild_id as i64)
            .bind(&doc)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_timeout_lands_in_connection_options() {
        let opts = connect_options("postgres://tss@localhost/tss", Some(5_000)).unwrap();
        assert!(opts.get_options().is_some_and(|o| o.contains("statement_timeout=5000")));

        let plain = connect_options("postgres://tss@localhost/tss", None).unwrap();
        assert_eq!(plain.get_options(), None);
    }
}
