//! HTTPS serving from the checked-in PEM fixtures under `tests/fixtures/tls`.
//!
//! The server certificate is issued by `ca.pem` for `localhost` and `127.0.0.1`;
//! clients trust that CA and resolve `localhost` to whichever socket they dial.

use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::time::Duration;

use app_worker::config::{loader, WorkerConfig};
use app_worker::ipc::{Envelope, STICKY_CONNECTION, WORKER_READY};
use serde_json::Value;
use tokio::net::TcpListener;

mod common;

use common::{loopback_options, test_worker, test_worker_with_peer, ScriptedApp, SCRIPTED_BODY};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/tls")
        .join(name)
}

fn https_config(port: u16, sticky: bool) -> WorkerConfig {
    let mut options = loopback_options(port);
    options.https = true;
    options.key = Some(fixture("server.key"));
    options.cert = Some(fixture("server.pem"));
    if sticky {
        options.sticky = true;
        options.ipc_path = Some("/run/app-worker/peer.sock".into());
    }
    let config = loader::resolve(options).unwrap();
    assert!(config.tls().is_some());
    config
}

/// HTTPS client that trusts the fixture CA and dials `addr` for `localhost`.
fn https_client(addr: SocketAddr) -> reqwest::Client {
    let ca = std::fs::read(fixture("ca.pem")).unwrap();
    reqwest::Client::builder()
        .add_root_certificate(reqwest::Certificate::from_pem(&ca).unwrap())
        .resolve("localhost", addr)
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_https_worker_serves_request() {
    let (worker, exit) = test_worker(https_config(0, false), ScriptedApp::ready());
    let running = worker.run().await.unwrap();
    let addr = running.local_addr();

    let res = https_client(addr)
        .get(format!("https://localhost:{}/", addr.port()))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), SCRIPTED_BODY);
    assert!(exit.calls().is_empty());
    running.abort();
}

#[tokio::test]
async fn test_https_worker_refuses_plain_http() {
    let (worker, _exit) = test_worker(https_config(0, false), ScriptedApp::ready());
    let running = worker.run().await.unwrap();

    let result = common::http_client()
        .get(format!("http://{}/", running.local_addr()))
        .send()
        .await;

    assert!(result.is_err());
    running.abort();
}

#[tokio::test]
async fn test_https_handed_off_connection_is_served() {
    let (worker, exit, peer) = test_worker_with_peer(https_config(28302, true), ScriptedApp::ready());
    let running = worker.run().await.unwrap();
    let ready = peer.recv().await.unwrap().unwrap();
    assert_eq!(ready.envelope.action, WORKER_READY);

    let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let front_addr = front.local_addr().unwrap();
    let client = https_client(front_addr);
    let url = format!("https://localhost:{}/", front_addr.port());
    let request = tokio::spawn(async move { client.get(url).send().await?.text().await });

    let (accepted, _) = front.accept().await.unwrap();
    let accepted = accepted.into_std().unwrap();
    peer.send_with_descriptor(&Envelope::new(STICKY_CONNECTION, Value::Null), accepted.as_fd())
        .await
        .unwrap();
    drop(accepted);

    let body = tokio::time::timeout(Duration::from_secs(10), request)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(body, SCRIPTED_BODY);
    assert!(exit.calls().is_empty());
    running.abort();
}
