//! Startup diagnostics.
//!
//! Logs who is starting, with what options, in which environment, and how
//! long it took to start serving. Observes only: nothing here can fail
//! startup or change the readiness state.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{Environment, FrameworkInfo, WorkerConfig};
use crate::lifecycle::readiness::ReadinessState;
use crate::net::ListenerHandle;
use crate::observability::metrics;

const FALLBACK_HOST: &str = "0.0.0.0";

/// Startup logging for one worker.
#[derive(Debug, Clone)]
pub struct StartupDiagnostics {
    framework: FrameworkInfo,
    scheme: &'static str,
    port: u16,
    sticky: bool,
    use_local_host: bool,
    started_at: Instant,
}

impl StartupDiagnostics {
    /// Log the startup preamble. `started_at` is the process start time.
    pub fn new(config: &WorkerConfig, environment: &Environment, started_at: Instant) -> Self {
        let framework = config.framework().clone();

        tracing::info!("=================== {} start =====================", framework.name);
        tracing::info!(framework = %framework.name, version = %framework.version, "Worker starting");
        match serde_json::to_string(config.options()) {
            Ok(options) => tracing::info!(options = %options, "Start with options"),
            Err(e) => tracing::warn!(error = %e, "Could not render options"),
        }
        tracing::info!(
            server_env = environment.server_env.as_deref().unwrap_or(""),
            node_env = environment.node_env.as_deref().unwrap_or(""),
            is_production = environment.is_production,
            is_debug = environment.is_debug,
            "Start with env"
        );

        Self {
            framework,
            scheme: config.scheme(),
            port: config.port(),
            sticky: config.sticky(),
            use_local_host: config.use_local_host(),
            started_at,
        }
    }

    /// The listener exists but is not bound yet.
    pub fn on_server(&self, listener: &ListenerHandle) {
        tracing::debug!(
            scheme = listener.scheme(),
            bind_address = %listener.bind_address(),
            available_permits = listener.available_permits(),
            "Server created"
        );
    }

    /// The worker is serving.
    pub fn on_ready(&self) {
        let elapsed = self.started_at.elapsed();
        metrics::record_startup_duration(elapsed);
        tracing::info!("{}", self.started_message(&self.host(), elapsed));
    }

    /// Call [`on_ready`](Self::on_ready) if and when `readiness` reaches `Listening`.
    pub fn observe(self, mut readiness: watch::Receiver<ReadinessState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let listening = match readiness.wait_for(|state| !state.is_pending()).await {
                Ok(state) => *state == ReadinessState::Listening,
                Err(_) => false,
            };
            if listening {
                self.on_ready();
            }
        })
    }

    pub fn started_message(&self, host: &str, elapsed: Duration) -> String {
        format!(
            "{} started on {}://{}:{} ({}ms){}",
            self.framework.name,
            self.scheme,
            host,
            self.port,
            elapsed.as_millis(),
            if self.sticky { " with STICKY MODE!" } else { "" }
        )
    }

    fn host(&self) -> String {
        if self.use_local_host {
            return Ipv4Addr::LOCALHOST.to_string();
        }
        match local_ipv4() {
            Some(ip) => ip.to_string(),
            None => {
                tracing::warn!(fallback = FALLBACK_HOST, "Could not resolve a local IPv4 address");
                FALLBACK_HOST.to_string()
            }
        }
    }
}

/// First IPv4 address of a non-loopback interface.
pub fn local_ipv4() -> Option<IpAddr> {
    let interfaces = match getifaddrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::debug!(error = %e, "getifaddrs failed");
            return None;
        }
    };

    interfaces
        .filter(|iface| !iface.flags.contains(InterfaceFlags::IFF_LOOPBACK))
        .filter_map(|iface| {
            let address = iface.address?;
            let v4 = address.as_sockaddr_in()?;
            Some(*SocketAddrV4::from(*v4).ip())
        })
        .find(|ip| !ip.is_loopback() && !ip.is_unspecified())
        .map(IpAddr::V4)
}
