//! Runtime loop tests.
//!
//! Drives a client through [`Runtime::run`] instead of the manual
//! `process_pending` pump the other tests use.

use parley_app::{ClientConfig, ConnectionState, Runtime, SavedServer};
use parley_harness::{SimEnv, SimServer};
use tokio::sync::oneshot;

#[tokio::test]
async fn run_dispatches_pushes_until_shutdown() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let (runtime, store) = Runtime::new(server.backend(), env, ClientConfig::default());
    store.add_saved_server(SavedServer::new("sim", "sim.parley.local", 7443));
    let (stop, stopped) = oneshot::channel::<()>();

    let driver = async {
        store.connect("sim.parley.local", 7443, "alice").await;
        server.post_global("bob", "hello from the lobby");
        while store.global_log().is_empty() {
            tokio::task::yield_now().await;
        }
        stop.send(()).ok();
    };
    tokio::join!(
        runtime.run(async {
            stopped.await.ok();
        }),
        driver
    );

    assert_eq!(store.connection_state(), ConnectionState::Connected);
    assert_eq!(store.presence(), vec!["alice".to_string()]);
    let log = store.global_log();
    assert_eq!(log.entries()[0].text(), "hello from the lobby");
    assert_eq!(log.entries()[0].author(), Some("bob"));
}

#[tokio::test]
async fn run_returns_once_shutdown_resolves() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let (runtime, store) = Runtime::new(server.backend(), env, ClientConfig::default());
    drop(store);

    // The orchestrator keeps its own sender, so only shutdown ends the loop.
    runtime.run(async {}).await;
}
