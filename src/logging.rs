use crate::config::Settings;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

/// Inicjalizacja logowania.
/// `RUST_LOG` wygrywa z poziomem z konfiguracji; `logging.json = true` daje
/// jeden obiekt JSON na linię (zdarzenia `tigris::security` łatwo wyłuskać).
pub fn init(settings: &Settings) {
    let level = settings
        .logging
        .level
        .clone()
        .unwrap_or_else(|| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json = settings.logging.json.unwrap_or(false);
    let registry = tracing_subscriber::registry().with(env_filter);

    // try_init: drugi init (testy, ponowny bootstrap) nie panikuje
    let res = if json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    if let Err(e) = res {
        eprintln!("logging already initialised: {e}");
    }
}
