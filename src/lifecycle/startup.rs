//! Worker bootstrap.
//!
//! # Responsibilities
//! - Log startup diagnostics
//! - Install termination signal handling
//! - Create the listener around the application's handler
//! - Start the application and drive readiness from its events
//! - Bind, then start accepting and (in sticky mode) receiving hand-offs
//!
//! # Design Decisions
//! - The listener is created before the application starts, bound only after it is ready
//! - The first start event wins; the event receiver is dropped once startup settles
//! - Fatal startup outcomes exit through the configured [`ExitHandler`]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::app::{AppEvents, Application};
use crate::config::{Environment, ProcessEnv, WorkerConfig};
use crate::ipc::{self, Envelope, IpcChannel};
use crate::lifecycle::exit::{ExitHandler, ProcessExit};
use crate::lifecycle::readiness::{ReadinessCoordinator, ReadinessState};
use crate::lifecycle::shutdown::{Shutdown, ShutdownState};
use crate::net::{create_listener, ConnectionServer, ListenerError};
use crate::observability::StartupDiagnostics;
use crate::sticky::HandoffChannel;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to install signal handlers: {0}")]
    Signals(std::io::Error),

    #[error("worker did not start: {0}")]
    Startup(ReadinessState),
}

/// A worker process hosting one application.
pub struct Worker<A: Application> {
    config: Arc<WorkerConfig>,
    app: Arc<A>,
    environment: Environment,
    exit: Arc<dyn ExitHandler>,
    peer: Option<Arc<IpcChannel>>,
    shutdown: Option<Arc<Shutdown>>,
    handle_signals: bool,
    started_at: Instant,
}

impl<A: Application> Worker<A> {
    pub fn new(config: WorkerConfig, app: A) -> Self {
        Self {
            config: Arc::new(config),
            app: Arc::new(app),
            environment: Environment::resolve(&ProcessEnv, false),
            exit: Arc::new(ProcessExit),
            peer: None,
            shutdown: None,
            handle_signals: true,
            started_at: Instant::now(),
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn exit_handler(mut self, exit: Arc<dyn ExitHandler>) -> Self {
        self.exit = exit;
        self
    }

    /// Channel to the supervising process.
    pub fn peer(mut self, channel: IpcChannel) -> Self {
        self.peer = Some(Arc::new(channel));
        self
    }

    /// Adopt a shutdown coordinator whose signal listener is already running,
    /// so signals that arrive before `run` still exit cleanly.
    pub fn shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Leave SIGINT/SIGQUIT/SIGTERM alone.
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Reference point for the reported startup time. Defaults to `Worker::new`.
    pub fn started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Start the worker and wait until it is serving or has failed.
    pub async fn run(self) -> Result<RunningWorker, WorkerError> {
        let Worker {
            config,
            app,
            environment,
            exit,
            peer,
            shutdown,
            handle_signals,
            started_at,
        } = self;

        let diagnostics = StartupDiagnostics::new(&config, &environment, started_at);

        let (shutdown, signals) = match shutdown {
            Some(shutdown) => (shutdown, None),
            None => {
                let shutdown = Arc::new(Shutdown::new(exit.clone()));
                let signals = if handle_signals {
                    Some(shutdown.clone().listen().map_err(WorkerError::Signals)?)
                } else {
                    None
                };
                (shutdown, signals)
            }
        };

        let notifier = peer.as_ref().map(|channel| {
            let (tx, rx) = mpsc::unbounded_channel();
            ipc::spawn_writer(channel.clone(), rx);
            tx
        });
        let readiness = ReadinessCoordinator::new(&config, exit, notifier);
        diagnostics.clone().observe(readiness.subscribe());

        let mut listener = create_listener(&config, app.router()).await?;
        diagnostics.on_server(&listener);
        app.on_server(&listener);

        let handoff = match (config.sticky(), &peer) {
            (true, Some(channel)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                forward_peer_messages(app.clone(), rx);
                let channel = HandoffChannel::new(channel.clone(), listener.injector(), readiness.subscribe())
                    .forward_unhandled(tx);
                Some(channel.spawn())
            }
            (true, None) => {
                tracing::warn!("Sticky mode without a peer channel; no connections will be handed off");
                None
            }
            (false, _) => None,
        };

        let (events, mut event_rx) = AppEvents::channel();
        app.start(events);

        let permit = loop {
            match event_rx.recv().await {
                Some(event) => {
                    if let Some(permit) = readiness.handle(event) {
                        break Some(permit);
                    }
                    if !readiness.state().is_pending() {
                        break None;
                    }
                }
                None => {
                    readiness.signal_error("application stopped without reporting readiness");
                    break None;
                }
            }
        };
        drop(event_rx);

        let accept = match permit {
            Some(permit) => match listener.bind().await {
                Ok(addr) => match listener.spawn_accept_loop() {
                    Ok(task) => {
                        permit.listening(addr);
                        Some(task)
                    }
                    Err(e) => {
                        permit.bind_failed(&e);
                        None
                    }
                },
                Err(e) => {
                    permit.bind_failed(&e);
                    None
                }
            },
            None => None,
        };

        let state = readiness.await_ready().await;
        match (state, accept, listener.local_addr()) {
            (ReadinessState::Listening, Some(accept), Some(local_addr)) => Ok(RunningWorker {
                local_addr,
                readiness,
                shutdown,
                injector: listener.injector(),
                accept,
                handoff,
                signals,
            }),
            (state, accept, _) => {
                for task in accept.iter().chain(handoff.iter()) {
                    task.abort();
                }
                Err(WorkerError::Startup(state))
            }
        }
    }
}

fn forward_peer_messages<A: Application>(
    app: Arc<A>,
    mut messages: mpsc::UnboundedReceiver<Envelope>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            app.on_peer_message(&message);
        }
    })
}

/// A worker that is serving.
pub struct RunningWorker {
    local_addr: SocketAddr,
    readiness: ReadinessCoordinator,
    shutdown: Arc<Shutdown>,
    injector: ConnectionServer,
    accept: JoinHandle<()>,
    handoff: Option<JoinHandle<()>>,
    signals: Option<JoinHandle<()>>,
}

impl RunningWorker {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn readiness(&self) -> &ReadinessCoordinator {
        &self.readiness
    }

    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    /// Serves injected connections alongside the accept loop.
    pub fn injector(&self) -> &ConnectionServer {
        &self.injector
    }

    /// Serve until the accept loop ends or shutdown begins.
    pub async fn wait(self) {
        let RunningWorker { accept, shutdown, .. } = self;
        let mut state = shutdown.subscribe();

        tokio::select! {
            result = accept => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Accept loop terminated");
                }
            }
            _ = state.wait_for(|state| *state == ShutdownState::Exiting) => {}
        }
    }

    /// Stop accepting and stop receiving hand-offs. Served connections run on.
    pub fn abort(self) {
        self.accept.abort();
        for task in self.handoff.iter().chain(self.signals.iter()) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for RunningWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningWorker")
            .field("local_addr", &self.local_addr)
            .field("readiness", &self.readiness)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::DefaultApplication;
    use crate::config::{StaticEnv, WorkerOptions};
    use crate::lifecycle::exit::{ExitStatus, RecordingExit};
    use std::time::Duration;

    fn worker(
        options: WorkerOptions,
        app: impl FnOnce(&WorkerConfig) -> DefaultApplication,
    ) -> (Worker<DefaultApplication>, Arc<RecordingExit>) {
        let config = WorkerConfig::plain(options);
        let app = app(&config);
        let exit = Arc::new(RecordingExit::new());
        let worker = Worker::new(config, app)
            .environment(Environment::resolve(&StaticEnv::default(), false))
            .exit_handler(exit.clone())
            .without_signal_handlers();
        (worker, exit)
    }

    fn loopback() -> WorkerOptions {
        WorkerOptions {
            port: 0,
            use_local_host: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn ready_application_is_served() {
        let (worker, exit) = worker(loopback(), DefaultApplication::new);

        let running = worker.run().await.unwrap();

        assert_eq!(running.readiness().state(), ReadinessState::Listening);
        assert!(running.local_addr().ip().is_loopback());
        assert_ne!(running.local_addr().port(), 0);
        assert!(exit.calls().is_empty());
        running.abort();
    }

    #[tokio::test]
    async fn failing_application_exits_with_failure() {
        let (worker, exit) = worker(loopback(), |config| {
            DefaultApplication::new(config).with_boot(|| async { Err("database unreachable".to_string()) })
        });

        let err = worker.run().await.unwrap_err();

        match err {
            WorkerError::Startup(ReadinessState::Failed(reason)) => {
                assert!(reason.contains("database unreachable"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(exit.calls(), vec![ExitStatus::StartupFailure]);
    }

    #[tokio::test]
    async fn slow_application_times_out() {
        let (worker, exit) = worker(loopback(), |config| {
            DefaultApplication::new(config)
                .with_start_timeout(Duration::from_millis(20))
                .with_boot(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
        });

        let err = worker.run().await.unwrap_err();

        assert!(matches!(err, WorkerError::Startup(ReadinessState::TimedOut)));
        assert_eq!(exit.calls(), vec![ExitStatus::StartupFailure]);
    }

    #[tokio::test]
    async fn adopted_shutdown_that_already_fired_ends_wait() {
        let (worker, exit) = worker(loopback(), DefaultApplication::new);
        let early_exit = Arc::new(RecordingExit::new());
        let shutdown = Arc::new(Shutdown::new(early_exit.clone()));
        shutdown.trigger(crate::lifecycle::signals::TerminationSignal::Terminate);

        let running = worker.shutdown(shutdown.clone()).run().await.unwrap();
        assert!(Arc::ptr_eq(running.shutdown(), &shutdown));

        tokio::time::timeout(Duration::from_secs(5), running.wait()).await.unwrap();
        assert_eq!(early_exit.calls(), vec![ExitStatus::Clean]);
        assert!(exit.calls().is_empty());
    }

    #[tokio::test]
    async fn shutdown_ends_wait() {
        let (worker, exit) = worker(loopback(), DefaultApplication::new);
        let running = worker.run().await.unwrap();
        let shutdown = running.shutdown().clone();

        let waiting = tokio::spawn(running.wait());
        shutdown.trigger(crate::lifecycle::signals::TerminationSignal::Terminate);

        tokio::time::timeout(Duration::from_secs(5), waiting).await.unwrap().unwrap();
        assert_eq!(exit.calls(), vec![ExitStatus::Clean]);
    }
}
