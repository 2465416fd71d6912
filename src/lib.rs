//! Worker process lifecycle for a multi-process web application.
//!
//! A worker hosts one [`Application`], serves it over plain or TLS HTTP, and
//! reports readiness to a supervising peer. In sticky mode the peer accepts
//! client connections and hands them to the worker over a Unix socket.

pub mod app;
pub mod config;
pub mod http;
pub mod ipc;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod sticky;

pub use app::{AppEvent, AppEvents, Application, DefaultApplication};
pub use config::{Environment, WorkerConfig, WorkerOptions};
pub use lifecycle::{RunningWorker, Shutdown, Worker, WorkerError};
