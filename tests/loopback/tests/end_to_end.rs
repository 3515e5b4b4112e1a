use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;

use gridlink_connection::{ConnectionError, ConnectionManager, Connector, Credential, TcpConnector};
use gridlink_loopback::{Faults, LoopbackConnector, LoopbackServer, spawn_tcp};
use gridlink_protocol::{
    AccountIdentity, AuthScheme, ClientConfig, FileOutcome, SslNegotiationPolicy, TransferState,
};
use gridlink_transfer::{
    CancelOutcome, ParallelTransferCoordinator, TransferError, TransferRequest, checksum_bytes,
};

const KIB: usize = 1024;
const PASSWORD: &str = "rods-secret";
const OBJECT: &str = "/tempZone/home/alice/data.bin";

fn test_config(policy: SslNegotiationPolicy) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.pipeline.ssl_policy = policy;
    config.pipeline.stream_buffer_size = 64 * KIB;
    config.pipeline.parallel_threshold = 256 * KIB as u64;
    config.pipeline.max_parallel_streams = 4;
    config.pipeline.verify_checksum = true;
    config.pipeline.status_interval_ms = 20;
    config.pipeline.connect_timeout_ms = 5_000;
    config
}

fn alice() -> AccountIdentity {
    AccountIdentity::new("grid.example.org", 1247, "alice", "tempZone")
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

struct Harness {
    server: LoopbackServer,
    connector: Arc<LoopbackConnector>,
    manager: Arc<ConnectionManager>,
    coordinator: ParallelTransferCoordinator,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(server_policy: SslNegotiationPolicy, client_policy: SslNegotiationPolicy) -> Self {
        let server = LoopbackServer::new(server_policy);
        server.add_account("alice", "tempZone", PASSWORD);
        let connector = Arc::new(LoopbackConnector::new(server.clone()));
        Self::with_connector(server, connector, client_policy)
    }

    fn with_connector(
        server: LoopbackServer,
        connector: Arc<LoopbackConnector>,
        client_policy: SslNegotiationPolicy,
    ) -> Self {
        Self::with_config(server, connector, test_config(client_policy))
    }

    fn with_config(
        server: LoopbackServer,
        connector: Arc<LoopbackConnector>,
        config: ClientConfig,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(
            config,
            Arc::clone(&connector) as Arc<dyn Connector>,
        ));
        manager.register_account(&alice(), Credential::new(PASSWORD));
        let coordinator = ParallelTransferCoordinator::pooled(Arc::clone(&manager));
        Self {
            server,
            connector,
            manager,
            coordinator,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn local(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn round_trip(h: &Harness, account: &AccountIdentity, data: &[u8]) {
    let source = h.local("source.bin");
    let target = h.local("target.bin");
    std::fs::write(&source, data).unwrap();

    let put = h
        .coordinator
        .submit_transfer(TransferRequest::put(account.clone(), &source, OBJECT))
        .unwrap();
    let summary = put.wait().await.unwrap();
    assert_eq!(summary.bytes_transferred, data.len() as u64);
    assert_eq!(summary.outcome, FileOutcome::Verified);
    assert_eq!(summary.checksum.as_deref(), Some(checksum_bytes(data).as_str()));
    assert_eq!(h.server.object(OBJECT).unwrap(), data);

    let get = h
        .coordinator
        .submit_transfer(TransferRequest::get(account.clone(), OBJECT, &target))
        .unwrap();
    let status = get.status();
    let summary = get.wait().await.unwrap();
    assert_eq!(summary.outcome, FileOutcome::Verified);
    assert_eq!(status.borrow().current_state, TransferState::Complete);
    assert_eq!(read(&target), data);
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[tokio::test]
async fn plaintext_round_trip_uses_parallel_streams() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Refuse);
    let data = random_bytes(1024 * KIB);
    round_trip(&h, &alice(), &data).await;

    assert_eq!(h.server.stats().ranges, 8);
    assert_eq!(h.server.stats().commits, 2);
    assert_eq!(h.server.pending_transfers(), 0);
}

#[tokio::test]
async fn encrypted_round_trip() {
    let h = Harness::new(SslNegotiationPolicy::Require, SslNegotiationPolicy::DontCare);
    let data = random_bytes(700 * KIB + 13);
    round_trip(&h, &alice(), &data).await;
}

#[tokio::test]
async fn small_file_moves_on_one_stream() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Refuse);
    let data = random_bytes(10 * KIB);
    let source = h.local("small.bin");
    std::fs::write(&source, &data).unwrap();

    let summary = h
        .coordinator
        .submit_transfer(TransferRequest::put(alice(), &source, OBJECT))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.streams.len(), 1);
    assert_eq!(h.server.object(OBJECT).unwrap(), data);
}

#[tokio::test]
async fn server_stream_limit_caps_the_plan() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Refuse);
    h.server.set_max_streams(2);
    let data = random_bytes(1024 * KIB);
    let source = h.local("capped.bin");
    std::fs::write(&source, &data).unwrap();

    let summary = h
        .coordinator
        .submit_transfer(TransferRequest::put(alice(), &source, OBJECT))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.streams.len(), 2);
    assert_eq!(h.server.object(OBJECT).unwrap(), data);
}

#[tokio::test]
async fn one_time_password_shares_a_single_session() {
    let server = LoopbackServer::new(SslNegotiationPolicy::Refuse);
    server.add_one_time_account("alice", "tempZone", PASSWORD);
    let connector = Arc::new(LoopbackConnector::new(server.clone()));
    let h = Harness::with_connector(server, connector, SslNegotiationPolicy::Refuse);
    let account = alice().with_auth_scheme(AuthScheme::OneTimePassword);
    h.manager.register_account(&account, Credential::new(PASSWORD));

    let data = random_bytes(1024 * KIB);
    round_trip(&h, &account, &data).await;

    assert_eq!(h.server.stats().logins, 1);
    assert_eq!(h.connector.connects(), 1);
    assert_eq!(h.manager.stats(&account).max_size, 1);
}

#[tokio::test]
async fn wrong_password_fails_the_attempt() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Refuse);
    h.manager.register_account(&alice(), Credential::new("not-it"));
    let source = h.local("denied.bin");
    std::fs::write(&source, b"payload").unwrap();

    let handle = h
        .coordinator
        .submit_transfer(TransferRequest::put(alice(), &source, OBJECT))
        .unwrap();
    let id = handle.attempt_id().to_string();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(
        err,
        TransferError::Connection(ConnectionError::AuthFailed(_))
    ));
    assert!(!err.is_retryable());
    assert_eq!(h.coordinator.state(&id), Some(TransferState::Error));
    assert_eq!(h.server.stats().failed_logins, 1);
    assert!(h.server.object(OBJECT).is_none());
}

#[tokio::test]
async fn unreachable_server_is_retryable() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Refuse);
    h.connector.set_unreachable(true);
    let source = h.local("offline.bin");
    std::fs::write(&source, b"payload").unwrap();

    let err = h
        .coordinator
        .submit_transfer(TransferRequest::put(alice(), &source, OBJECT))
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Connection(ConnectionError::Io(_))));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn incompatible_ssl_policies_never_log_in() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Require);
    let source = h.local("refused.bin");
    std::fs::write(&source, b"payload").unwrap();

    let err = h
        .coordinator
        .submit_transfer(TransferRequest::put(alice(), &source, OBJECT))
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(h.server.stats().logins, 0);
}

#[tokio::test]
async fn dropped_stream_errors_and_releases_connections() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Refuse);
    h.server.set_faults(Faults {
        drop_range_at: Some(256 * KIB as u64),
        ..Faults::default()
    });
    let source = h.local("faulty.bin");
    std::fs::write(&source, random_bytes(1024 * KIB)).unwrap();

    let handle = h
        .coordinator
        .submit_transfer(TransferRequest::put(alice(), &source, OBJECT))
        .unwrap();
    let status = handle.status();
    let id = handle.attempt_id().to_string();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, TransferError::Stream(_)), "got {err:?}");
    assert!(err.is_retryable());
    assert_eq!(h.coordinator.state(&id), Some(TransferState::Error));
    assert!(matches!(
        status.borrow().per_file_outcome,
        FileOutcome::Failed { .. }
    ));
    assert!(h.server.object(OBJECT).is_none());

    let account = alice();
    wait_until(|| h.manager.stats(&account).active == 0).await;
    wait_until(|| h.server.stats().aborts == 1).await;
    assert_eq!(h.server.pending_transfers(), 0);

    h.manager.shutdown().await;
    wait_until(|| h.server.stats().active_sessions == 0).await;
}

#[tokio::test]
async fn checksum_mismatch_completes_unverified() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Refuse);
    h.server.set_faults(Faults {
        corrupt_checksum: true,
        ..Faults::default()
    });
    let data = random_bytes(300 * KIB);
    let source = h.local("mismatch.bin");
    std::fs::write(&source, &data).unwrap();

    let handle = h
        .coordinator
        .submit_transfer(TransferRequest::put(alice(), &source, OBJECT))
        .unwrap();
    let status = handle.status();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, TransferError::Integrity { .. }));
    let last = status.borrow().clone();
    assert_eq!(last.current_state, TransferState::Complete);
    assert!(matches!(last.per_file_outcome, FileOutcome::Unverified { .. }));
    assert_eq!(h.server.object(OBJECT).unwrap(), data);
}

/// Starts a slow GET of `OBJECT`, cancels it once bytes are flowing and
/// waits for the attempt to end.
async fn cancel_slow_get(h: &Harness, account: &AccountIdentity, target: &Path) {
    h.server.set_faults(Faults {
        frame_delay: Some(Duration::from_millis(10)),
        ..Faults::default()
    });

    let handle = h
        .coordinator
        .submit_transfer(TransferRequest::get(account.clone(), OBJECT, target))
        .unwrap();
    let id = handle.attempt_id().to_string();
    let mut status = handle.status();
    status
        .wait_for(|s| s.current_state == TransferState::Processing && s.bytes_so_far > 0)
        .await
        .unwrap();

    assert_eq!(h.coordinator.cancel(&id), CancelOutcome::Requested);
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, TransferError::Cancelled));
    assert_eq!(h.coordinator.state(&id), Some(TransferState::Cancelled));
    assert_eq!(h.coordinator.cancel(&id), CancelOutcome::AlreadyTerminal);

    let last = status.borrow().clone();
    assert_eq!(last.per_file_outcome, FileOutcome::Cancelled);
    assert!(last.bytes_so_far < h.server.object(OBJECT).unwrap().len() as u64);

    h.server.set_faults(Faults::default());
}

#[tokio::test]
async fn cancelled_get_keeps_its_sessions() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Refuse);
    let data = random_bytes(2048 * KIB);
    h.server.put_object(OBJECT, data.clone());
    let target = h.local("partial.bin");

    cancel_slow_get(&h, &alice(), &target).await;

    let account = alice();
    wait_until(|| h.manager.stats(&account).active == 0).await;
    assert_eq!(h.server.stats().commits, 0);
    assert_eq!(h.manager.stats(&account).idle, h.connector.connects());

    let summary = h
        .coordinator
        .submit_transfer(TransferRequest::get(alice(), OBJECT, &target))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.outcome, FileOutcome::Verified);
    assert_eq!(read(&target), data);
}

#[tokio::test]
async fn cancelled_one_time_password_get_keeps_the_session() {
    let server = LoopbackServer::new(SslNegotiationPolicy::Refuse);
    server.add_one_time_account("alice", "tempZone", PASSWORD);
    let connector = Arc::new(LoopbackConnector::new(server.clone()));
    let h = Harness::with_connector(server, connector, SslNegotiationPolicy::Refuse);
    let account = alice().with_auth_scheme(AuthScheme::OneTimePassword);
    h.manager.register_account(&account, Credential::new(PASSWORD));

    let data = random_bytes(1024 * KIB);
    h.server.put_object(OBJECT, data.clone());
    let target = h.local("otp.bin");

    cancel_slow_get(&h, &account, &target).await;

    let summary = h
        .coordinator
        .submit_transfer(TransferRequest::get(account.clone(), OBJECT, &target))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.outcome, FileOutcome::Verified);
    assert_eq!(read(&target), data);
    assert_eq!(h.server.stats().logins, 1);
    assert_eq!(h.connector.connects(), 1);
}

#[tokio::test]
async fn cancel_with_fewer_sessions_than_streams() {
    let server = LoopbackServer::new(SslNegotiationPolicy::Refuse);
    server.add_account("alice", "tempZone", PASSWORD);
    let connector = Arc::new(LoopbackConnector::new(server.clone()));
    let mut config = test_config(SslNegotiationPolicy::Refuse);
    config.pool.max_per_account = 1;
    let h = Harness::with_config(server, connector, config);

    let data = random_bytes(2048 * KIB);
    h.server.put_object(OBJECT, data.clone());
    let target = h.local("narrow.bin");

    cancel_slow_get(&h, &alice(), &target).await;

    let account = alice();
    wait_until(|| h.manager.stats(&account).active == 0).await;
    assert_eq!(h.manager.stats(&account).idle, 1);
    assert_eq!(h.connector.connects(), 1);

    let summary = h
        .coordinator
        .submit_transfer(TransferRequest::get(alice(), OBJECT, &target))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.streams.len(), 4);
    assert_eq!(read(&target), data);
    assert_eq!(h.connector.connects(), 1);
}

#[tokio::test]
async fn missing_object_is_a_server_error() {
    let h = Harness::new(SslNegotiationPolicy::Refuse, SslNegotiationPolicy::Refuse);
    let err = h
        .coordinator
        .submit_transfer(TransferRequest::get(alice(), OBJECT, h.local("none.bin")))
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Connection(ConnectionError::Server { code: 404, .. })
    ));
}

#[tokio::test]
async fn round_trip_over_tcp() {
    let server = LoopbackServer::new(SslNegotiationPolicy::DontCare);
    server.add_account("bob", "tempZone", PASSWORD);
    let (addr, task) = spawn_tcp(server.clone()).await.unwrap();

    let manager = Arc::new(ConnectionManager::new(
        test_config(SslNegotiationPolicy::Refuse),
        Arc::new(TcpConnector),
    ));
    let account = AccountIdentity::new("127.0.0.1", addr.port(), "bob", "tempZone");
    manager.register_account(&account, Credential::new(PASSWORD));
    let coordinator = ParallelTransferCoordinator::pooled(Arc::clone(&manager));

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("tcp.bin");
    let target = dir.path().join("tcp-back.bin");
    let data = random_bytes(512 * KIB);
    std::fs::write(&source, &data).unwrap();

    coordinator
        .submit_transfer(TransferRequest::put(account.clone(), &source, "/tempZone/home/bob/tcp.bin"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    coordinator
        .submit_transfer(TransferRequest::get(account, "/tempZone/home/bob/tcp.bin", &target))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(&target), data);

    manager.shutdown().await;
    task.abort();
}
