//! Runtime environment classification.
//!
//! `EGG_SERVER_ENV` takes precedence over `NODE_ENV`. The deployment values
//! `local` and `unittest` are never production.

use std::collections::HashMap;

/// Deployment environment variable; overrides [`NODE_ENV`].
pub const SERVER_ENV: &str = "EGG_SERVER_ENV";

/// Generic environment variable consulted when [`SERVER_ENV`] is unset.
pub const NODE_ENV: &str = "NODE_ENV";

/// Source of environment variables.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed set of variables, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv(HashMap<String, String>);

impl StaticEnv {
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl EnvSource for StaticEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// Classified runtime environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub server_env: Option<String>,
    pub node_env: Option<String>,
    pub is_production: bool,
    pub is_debug: bool,
}

impl Environment {
    /// Classify the environment described by `source`.
    pub fn resolve(source: &impl EnvSource, debug: bool) -> Self {
        let server_env = non_empty(source.var(SERVER_ENV));
        let node_env = non_empty(source.var(NODE_ENV));
        let is_production = match server_env.as_deref() {
            Some(env) => env != "local" && env != "unittest",
            None => node_env.as_deref() == Some("production"),
        };

        Self {
            server_env,
            node_env,
            is_production,
            is_debug: debug,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(pairs: &[(&str, &str)]) -> bool {
        Environment::resolve(&StaticEnv::new(pairs.iter().copied()), false).is_production
    }

    #[test]
    fn unittest_server_env_is_never_production() {
        assert!(!classify(&[(SERVER_ENV, "unittest"), (NODE_ENV, "production")]));
        assert!(!classify(&[(SERVER_ENV, "unittest")]));
    }

    #[test]
    fn local_server_env_is_never_production() {
        assert!(!classify(&[(SERVER_ENV, "local"), (NODE_ENV, "production")]));
    }

    #[test]
    fn server_env_overrides_node_env() {
        assert!(classify(&[(SERVER_ENV, "prod"), (NODE_ENV, "development")]));
        assert!(classify(&[(SERVER_ENV, "test")]));
    }

    #[test]
    fn node_env_decides_without_server_env() {
        assert!(classify(&[(NODE_ENV, "production")]));
        assert!(!classify(&[(NODE_ENV, "development")]));
        assert!(!classify(&[]));
    }

    #[test]
    fn empty_server_env_counts_as_unset() {
        assert!(classify(&[(SERVER_ENV, ""), (NODE_ENV, "production")]));
    }

    #[test]
    fn debug_flag_is_carried() {
        let env = Environment::resolve(&StaticEnv::default(), true);
        assert!(env.is_debug);
        assert_eq!(env.server_env, None);
    }
}
