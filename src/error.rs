use thiserror::Error;

/// Błędy na granicach komponentów rdzenia.
///
/// Kolaboratorzy (magazyn konfiguracji, API platformy) zwracają `anyhow::Result`;
/// tutaj zamieniamy to na taksonomię, po której handlery decydują, czy
/// degradować (fail-open), czy zwrócić wynik `error`.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("config store unavailable for guild {guild_id}")]
    ConfigUnavailable {
        guild_id: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("platform call `{op}` failed")]
    Platform {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl SentinelError {
    pub fn config(guild_id: u64, source: anyhow::Error) -> Self {
        Self::ConfigUnavailable { guild_id, source }
    }

    pub fn platform(op: &'static str, source: anyhow::Error) -> Self {
        Self::Platform { op, source }
    }
}

pub type SentinelResult<T> = std::result::Result<T, SentinelError>;
