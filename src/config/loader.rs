//! Configuration loading and resolution.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::{TlsMaterial, WorkerConfig, WorkerOptions};
use crate::config::validation::{validate_options, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Json(serde_json::Error),
    Validation(Vec<ValidationError>),
    /// Key or certificate could not be read or is not PEM.
    TlsMaterial { path: PathBuf, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Json(e) => write!(f, "Invalid options JSON: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::TlsMaterial { path, reason } => {
                write!(f, "TLS material {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load options from a TOML file.
pub fn load_options(path: &Path) -> Result<WorkerOptions, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Parse options passed inline as JSON (the supervisor's spawn argument).
pub fn parse_options(json: &str) -> Result<WorkerOptions, ConfigError> {
    serde_json::from_str(json).map_err(ConfigError::Json)
}

/// Validate options and read TLS material into a [`WorkerConfig`].
pub fn resolve(options: WorkerOptions) -> Result<WorkerConfig, ConfigError> {
    validate_options(&options).map_err(ConfigError::Validation)?;

    let tls = match (options.https, &options.key, &options.cert) {
        (true, Some(key), Some(cert)) => Some(read_material(key, cert)?),
        _ => None,
    };

    Ok(WorkerConfig::new(options, tls))
}

fn read_material(key_path: &Path, cert_path: &Path) -> Result<TlsMaterial, ConfigError> {
    let key = read_file(key_path)?;
    let cert = read_file(cert_path)?;

    match rustls_pemfile::private_key(&mut key.as_slice()) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(tls_error(key_path, "no private key found")),
        Err(e) => return Err(tls_error(key_path, e)),
    }

    let mut found = 0;
    for entry in rustls_pemfile::certs(&mut cert.as_slice()) {
        entry.map_err(|e| tls_error(cert_path, e))?;
        found += 1;
    }
    if found == 0 {
        return Err(tls_error(cert_path, "no certificate found"));
    }

    Ok(TlsMaterial { key, cert })
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|e| tls_error(path, e))
}

fn tls_error(path: &Path, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::TlsMaterial {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
