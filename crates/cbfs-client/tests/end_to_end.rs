//! End-to-end tests: real sessions against a running cbfsd

use std::time::Duration;

use bytes::Bytes;
use cbfs_client::{CacheState, ClientError, Session};
use cbfs_config::testing::TestEnvironment;
use cbfs_ipc::FaultKind;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct RunningServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningServer {
    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

async fn start_server(env: &TestEnvironment) -> RunningServer {
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(cbfs_server::run_server(env.config().server, async {
        let _ = rx.await;
    }));

    for _ in 0..100 {
        if env.is_socket_present() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(env.is_socket_present(), "server did not create its socket");

    RunningServer {
        shutdown: Some(tx),
        handle,
    }
}

async fn session(env: &TestEnvironment, id: &str) -> Session {
    Session::connect(&env.socket_path, id).await.unwrap()
}

async fn next_invalidation(events: &mut broadcast::Receiver<String>) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .ok()?
        .ok()
}

/// Whatever arrives within a short quiet window
async fn quiet_invalidations(events: &mut broadcast::Receiver<String>) -> Vec<String> {
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut names = Vec::new();
    while let Ok(name) = events.try_recv() {
        names.push(name);
    }
    names
}

#[tokio::test]
async fn test_edit_invalidates_fetcher_only() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("f", b"d1").unwrap();
    let server = start_server(&env).await;

    let a = session(&env, "A").await;
    let b = session(&env, "B").await;
    let mut a_events = a.invalidations();
    let mut b_events = b.invalidations();

    assert_eq!(a.open_file("f").await.unwrap(), Bytes::from_static(b"d1"));
    assert_eq!(a.cache().state("f"), CacheState::Valid);

    b.edit_file("f", Bytes::from_static(b"d2")).await.unwrap();

    assert_eq!(next_invalidation(&mut a_events).await.as_deref(), Some("f"));
    assert!(quiet_invalidations(&mut a_events).await.is_empty());
    assert!(quiet_invalidations(&mut b_events).await.is_empty());
    assert_eq!(a.cache().state("f"), CacheState::Invalid);

    // Miss goes back to the server and re-validates
    assert_eq!(a.open_file("f").await.unwrap(), Bytes::from_static(b"d2"));
    assert_eq!(a.cache().state("f"), CacheState::Valid);

    server.stop().await;
}

#[tokio::test]
async fn test_unchanged_edit_sends_no_notice() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("f", b"same").unwrap();
    let server = start_server(&env).await;

    let a = session(&env, "A").await;
    let b = session(&env, "B").await;
    let mut a_events = a.invalidations();

    a.open_file("f").await.unwrap();
    b.edit_file("f", Bytes::from_static(b"same")).await.unwrap();

    assert!(quiet_invalidations(&mut a_events).await.is_empty());
    assert_eq!(a.cache().state("f"), CacheState::Valid);

    server.stop().await;
}

#[tokio::test]
async fn test_rename_invalidates_old_name() {
    let env = TestEnvironment::new().unwrap();
    let server = start_server(&env).await;

    let a = session(&env, "A").await;
    let b = session(&env, "B").await;
    let mut a_events = a.invalidations();

    b.create_file("old", Bytes::from_static(b"v")).await.unwrap();
    a.open_file("old").await.unwrap();
    b.rename_file("old", "new").await.unwrap();

    assert_eq!(
        next_invalidation(&mut a_events).await.as_deref(),
        Some("old")
    );
    assert!(quiet_invalidations(&mut a_events).await.is_empty());
    assert_eq!(b.cache().state("old"), CacheState::Absent);

    let err = a.open_file("old").await.unwrap_err();
    assert_eq!(err.fault_kind(), Some(FaultKind::NotFound));
    assert_eq!(a.open_file("new").await.unwrap(), Bytes::from_static(b"v"));

    server.stop().await;
}

#[tokio::test]
async fn test_remove_reaches_creator() {
    let env = TestEnvironment::new().unwrap();
    let server = start_server(&env).await;

    let a = session(&env, "A").await;
    let b = session(&env, "B").await;
    let mut a_events = a.invalidations();

    a.create_file("f", Bytes::from_static(b"x")).await.unwrap();
    assert_eq!(a.cache().state("f"), CacheState::Valid);
    b.remove_file("f").await.unwrap();

    assert_eq!(next_invalidation(&mut a_events).await.as_deref(), Some("f"));
    assert_eq!(a.cache().state("f"), CacheState::Invalid);
    assert!(b.list_files().await.unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_unregistered_client_hears_nothing() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("f", b"d1").unwrap();
    let server = start_server(&env).await;

    let a = session(&env, "A").await;
    let b = session(&env, "B").await;
    let mut a_events = a.invalidations();

    a.open_file("f").await.unwrap();
    a.unregister().await.unwrap();
    b.edit_file("f", Bytes::from_static(b"d2")).await.unwrap();

    assert!(quiet_invalidations(&mut a_events).await.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_duplicate_client_id_rejected() {
    let env = TestEnvironment::new().unwrap();
    let server = start_server(&env).await;

    let _a = session(&env, "A").await;
    let err = Session::connect(&env.socket_path, "A").await.err().unwrap();
    assert!(matches!(
        err,
        ClientError::Remote {
            kind: FaultKind::RegistrationConflict,
            ..
        }
    ));

    server.stop().await;
}

#[tokio::test]
async fn test_dropped_session_frees_its_id() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("f", b"d1").unwrap();
    let server = start_server(&env).await;

    let a = session(&env, "A").await;
    a.open_file("f").await.unwrap();
    drop(a);

    // The server cleans up once it sees the socket close
    let mut again = None;
    for _ in 0..50 {
        if let Ok(session) = Session::connect(&env.socket_path, "A").await {
            again = Some(session);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let again = again.expect("ID was never released");

    // The new session starts with nothing cached and re-fetches
    assert_eq!(again.cache().state("f"), CacheState::Absent);
    assert_eq!(again.open_file("f").await.unwrap(), Bytes::from_static(b"d1"));

    server.stop().await;
}

#[tokio::test]
async fn test_create_collision_and_listing() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("seed", b"").unwrap();
    let server = start_server(&env).await;

    let a = session(&env, "A").await;
    a.create_file("x", Bytes::from_static(b"1")).await.unwrap();
    let err = a
        .create_file("x", Bytes::from_static(b"2"))
        .await
        .unwrap_err();
    assert_eq!(err.fault_kind(), Some(FaultKind::AlreadyExists));
    assert_eq!(a.list_files().await.unwrap(), vec!["seed", "x"]);

    a.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_dropped_call_does_not_misroute_next_reply() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("f", b"d1").unwrap();
    let server = start_server(&env).await;

    let a = session(&env, "A").await;

    // A zero timeout polls the call once: the request is written, then the
    // future is dropped before its reply comes back.
    let abandoned = tokio::time::timeout(Duration::ZERO, a.list_files()).await;
    assert!(abandoned.is_err());

    assert_eq!(a.open_file("f").await.unwrap(), Bytes::from_static(b"d1"));
    assert_eq!(a.list_files().await.unwrap(), vec!["f"]);

    server.stop().await;
}
