//! Structured logging.
//!
//! Human-readable lines in development, JSON in production. `RUST_LOG`
//! overrides the configured level.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Environment, ObservabilityConfig};

/// Whether log lines are emitted as JSON for this configuration.
pub fn use_json(config: &ObservabilityConfig, environment: &Environment) -> bool {
    config.json_logs || environment.is_production
}

fn filter(config: &ObservabilityConfig, environment: &Environment) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if environment.is_debug { "debug" } else { config.log_level.as_str() };
        format!("app_worker={level},tower_http={level}").into()
    })
}

/// Install the global subscriber. A second call leaves the first in place.
pub fn init_logging(config: &ObservabilityConfig, environment: &Environment) {
    let json = use_json(config, environment);
    let result = tracing_subscriber::registry()
        .with(filter(config, environment))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init();

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticEnv;

    #[test]
    fn production_logs_json() {
        let env = Environment::resolve(&StaticEnv::new([("EGG_SERVER_ENV", "prod")]), false);
        assert!(use_json(&ObservabilityConfig::default(), &env));
    }

    #[test]
    fn development_logs_text_unless_asked() {
        let env = Environment::resolve(&StaticEnv::new([("NODE_ENV", "development")]), false);
        assert!(!use_json(&ObservabilityConfig::default(), &env));

        let config = ObservabilityConfig {
            json_logs: true,
            ..Default::default()
        };
        assert!(use_json(&config, &env));
    }
}
