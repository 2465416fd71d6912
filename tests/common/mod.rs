//! Shared utilities for worker integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use app_worker::app::{AppEvent, AppEvents, Application};
use app_worker::config::{Environment, StaticEnv, WorkerConfig, WorkerOptions};
use app_worker::ipc::{Envelope, IpcChannel};
use app_worker::lifecycle::RecordingExit;
use app_worker::Worker;
use axum::routing::get;
use axum::Router;

/// Body served by [`ScriptedApp`].
pub const SCRIPTED_BODY: &str = "scripted";

/// Options for a worker on loopback at `port`.
pub fn loopback_options(port: u16) -> WorkerOptions {
    WorkerOptions {
        port,
        use_local_host: true,
        ..Default::default()
    }
}

/// Application that reports a fixed sequence of start events.
#[derive(Clone)]
pub struct ScriptedApp {
    events: Vec<AppEvent>,
    peer_messages: Arc<Mutex<Vec<Envelope>>>,
}

impl ScriptedApp {
    pub fn new(events: Vec<AppEvent>) -> Self {
        Self {
            events,
            peer_messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn ready() -> Self {
        Self::new(vec![AppEvent::Ready])
    }

    /// Peer messages the worker passed on to the application.
    pub fn peer_messages(&self) -> Vec<Envelope> {
        self.peer_messages.lock().unwrap().clone()
    }
}

impl Application for ScriptedApp {
    fn router(&self) -> Router {
        Router::new().route("/", get(|| async { SCRIPTED_BODY }))
    }

    fn start(&self, events: AppEvents) {
        for event in &self.events {
            match event {
                AppEvent::Ready => events.ready(),
                AppEvent::Error(reason) => events.error(reason),
                AppEvent::StartTimeout => events.start_timeout(),
            }
        }
    }

    fn on_peer_message(&self, message: &Envelope) {
        self.peer_messages.lock().unwrap().push(message.clone());
    }
}

/// Worker that records exits instead of exiting and leaves signals alone.
pub fn test_worker<A: Application>(config: WorkerConfig, app: A) -> (Worker<A>, Arc<RecordingExit>) {
    let exit = Arc::new(RecordingExit::new());
    let worker = Worker::new(config, app)
        .environment(Environment::resolve(&StaticEnv::new([("EGG_SERVER_ENV", "unittest")]), false))
        .exit_handler(exit.clone())
        .without_signal_handlers();
    (worker, exit)
}

/// Same as [`test_worker`], connected to a peer channel. Returns the peer's end.
#[allow(dead_code)]
pub fn test_worker_with_peer<A: Application>(
    config: WorkerConfig,
    app: A,
) -> (Worker<A>, Arc<RecordingExit>, IpcChannel) {
    let (ours, peer) = IpcChannel::pair().unwrap();
    let (worker, exit) = test_worker(config, app);
    (worker.peer(ours), exit, peer)
}

/// Assert that the peer receives no message within a short window.
/// The worker closing its end counts as silence.
#[allow(dead_code)]
pub async fn assert_peer_silent(peer: &IpcChannel) {
    match tokio::time::timeout(Duration::from_millis(200), peer.recv()).await {
        Err(_) | Ok(Ok(None)) => {}
        Ok(other) => panic!("unexpected peer message: {:?}", other),
    }
}

/// Client without connection pooling, so every request is a fresh connection.
#[allow(dead_code)]
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
