//! Configuration schema definitions.
//!
//! This module defines the options a supervising process hands to a worker
//! and the resolved, immutable [`WorkerConfig`] built from them.
//! All option types derive Serde traits for deserialization from JSON or TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Options received from the supervisor (or a config file).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkerOptions {
    /// Externally advertised port.
    pub port: u16,

    /// Serve over TLS using `key` and `cert`.
    pub https: bool,

    /// Path to the private key file (PEM).
    pub key: Option<PathBuf>,

    /// Path to the certificate chain file (PEM).
    pub cert: Option<PathBuf>,

    /// Receive pre-accepted connections from the peer process instead of
    /// accepting on the advertised port.
    pub sticky: bool,

    /// Bind (and advertise) on the loopback interface only.
    #[serde(alias = "useLocalHost")]
    pub use_local_host: bool,

    /// Framework hosting the application: its install path or its identity.
    pub framework: FrameworkOption,

    /// Unix socket of the peer process. Without it no ready notification is
    /// sent and sticky mode is unavailable.
    #[serde(alias = "ipcPath")]
    pub ipc_path: Option<PathBuf>,

    /// Start timeout enforced by the built-in application, in seconds.
    #[serde(alias = "startTimeoutSecs")]
    pub start_timeout_secs: u64,

    /// Maximum concurrent connections (backpressure).
    #[serde(alias = "maxConnections")]
    pub max_connections: usize,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Framework-specific fields, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            port: 7001,
            https: false,
            key: None,
            cert: None,
            sticky: false,
            use_local_host: false,
            framework: FrameworkOption::default(),
            ipc_path: None,
            start_timeout_secs: 600,
            max_connections: 10_000,
            observability: ObservabilityConfig::default(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Framework name and version, reported by diagnostics.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrameworkInfo {
    pub name: String,
    pub version: String,
}

impl Default for FrameworkInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The `framework` option as the supervisor sends it.
///
/// Serializes back to the form it was given in, so the ready notification
/// carries the supervisor's value unchanged.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FrameworkOption {
    /// Install directory of the framework package, holding a `package.json`.
    Path(PathBuf),
    Info(FrameworkInfo),
}

impl Default for FrameworkOption {
    fn default() -> Self {
        FrameworkOption::Info(FrameworkInfo::default())
    }
}

impl FrameworkOption {
    /// Name and version of the framework.
    ///
    /// A path is resolved through its `package.json`. An unreadable manifest
    /// yields the directory name and an `unknown` version.
    pub fn identity(&self) -> FrameworkInfo {
        match self {
            FrameworkOption::Info(info) => info.clone(),
            FrameworkOption::Path(path) => match read_manifest(path) {
                Ok(info) => info,
                Err(reason) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "Could not read framework package.json");
                    FrameworkInfo {
                        name: path
                            .file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                            .unwrap_or_else(|| path.display().to_string()),
                        version: "unknown".to_string(),
                    }
                }
            },
        }
    }
}

#[derive(Deserialize)]
struct PackageManifest {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

fn read_manifest(dir: &Path) -> Result<FrameworkInfo, String> {
    let content = std::fs::read(dir.join("package.json")).map_err(|e| e.to_string())?;
    let manifest: PackageManifest = serde_json::from_slice(&content).map_err(|e| e.to_string())?;
    Ok(FrameworkInfo {
        name: manifest.name,
        version: manifest.version.unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Force JSON log output outside production.
    pub json_logs: bool,

    /// Expose a Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Address of the Prometheus endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}

/// PEM key and certificate bytes read at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .finish()
    }
}

/// Resolved worker configuration. Immutable for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    options: WorkerOptions,
    framework: FrameworkInfo,
    tls: Option<TlsMaterial>,
}

impl WorkerConfig {
    /// Assemble a config from already validated options and material.
    pub fn new(options: WorkerOptions, tls: Option<TlsMaterial>) -> Self {
        let framework = options.framework.identity();
        Self {
            options,
            framework,
            tls,
        }
    }

    /// Plain-text config for the given options. Used where no TLS is involved.
    pub fn plain(options: WorkerOptions) -> Self {
        Self::new(options, None)
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    pub fn port(&self) -> u16 {
        self.options.port
    }

    pub fn sticky(&self) -> bool {
        self.options.sticky
    }

    pub fn use_local_host(&self) -> bool {
        self.options.use_local_host
    }

    /// Resolved framework identity.
    pub fn framework(&self) -> &FrameworkInfo {
        &self.framework
    }

    /// URL scheme the listener speaks.
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_accept_supervisor_json() {
        let json = r#"{
            "port": 7002,
            "sticky": true,
            "useLocalHost": true,
            "ipcPath": "/tmp/worker.sock",
            "framework": { "name": "acme", "version": "3.1.0" },
            "baseDir": "/srv/app"
        }"#;
        let options: WorkerOptions = serde_json::from_str(json).unwrap();

        assert_eq!(options.port, 7002);
        assert!(options.sticky);
        assert!(options.use_local_host);
        assert_eq!(
            options.framework,
            FrameworkOption::Info(FrameworkInfo {
                name: "acme".into(),
                version: "3.1.0".into()
            })
        );
        assert_eq!(options.extra.get("baseDir").unwrap(), "/srv/app");
        assert_eq!(options.max_connections, 10_000);
    }

    #[test]
    fn options_accept_toml() {
        let toml = r#"
            port = 8080
            https = true
            key = "server.key"
            cert = "server.crt"

            [observability]
            json_logs = true
        "#;
        let options: WorkerOptions = toml::from_str(toml).unwrap();

        assert_eq!(options.port, 8080);
        assert!(options.https);
        assert_eq!(options.key, Some(PathBuf::from("server.key")));
        assert!(options.observability.json_logs);
        assert_eq!(options.observability.log_level, "info");
    }

    #[test]
    fn framework_path_resolves_through_package_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name": "egg", "version": "2.37.0", "main": "index.js"}"#,
        )
        .unwrap();
        let json = format!(r#"{{"port": 7001, "framework": {:?}}}"#, dir.path().display().to_string());

        let options: WorkerOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(options.framework, FrameworkOption::Path(dir.path().to_path_buf()));

        let config = WorkerConfig::plain(options);
        assert_eq!(config.framework().name, "egg");
        assert_eq!(config.framework().version, "2.37.0");
    }

    #[test]
    fn framework_path_without_manifest_falls_back_to_directory_name() {
        let options: WorkerOptions =
            serde_json::from_str(r#"{"port": 7001, "framework": "/usr/lib/node_modules/egg"}"#).unwrap();

        let config = WorkerConfig::plain(options);
        assert_eq!(config.framework().name, "egg");
        assert_eq!(config.framework().version, "unknown");
    }

    #[test]
    fn framework_path_is_passed_through_unchanged() {
        let options: WorkerOptions =
            serde_json::from_str(r#"{"framework": "/usr/lib/node_modules/egg"}"#).unwrap();

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["framework"], "/usr/lib/node_modules/egg");
    }

    #[test]
    fn tls_material_debug_hides_bytes() {
        let material = TlsMaterial {
            key: b"secret".to_vec(),
            cert: b"public".to_vec(),
        };
        let rendered = format!("{:?}", material);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<6 bytes>"));
    }
}
