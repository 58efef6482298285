//! Admission loop tests: token-bounded concurrency and context forwarding

use burrow_netio::{AdmissionToken, ConnectionAdmission, Link, NetConfig, PeerNodeId, Role};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

/// Shared handler context recording how many handlers run at once
struct Probe {
    started: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    gate: Semaphore,
    peers: Mutex<Vec<String>>,
}

impl Probe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            peers: Mutex::new(Vec::new()),
        })
    }
}

async fn gated_handler(
    link: Link,
    peer: PeerNodeId,
    token: Option<AdmissionToken>,
    probe: Arc<Probe>,
) {
    probe.started.fetch_add(1, Ordering::SeqCst);
    let now = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
    probe.max_active.fetch_max(now, Ordering::SeqCst);
    probe.peers.lock().await.push(peer.to_string());

    if let Ok(permit) = probe.gate.acquire().await {
        permit.forget();
    }

    probe.active.fetch_sub(1, Ordering::SeqCst);
    drop(link);
    if let Some(token) = token {
        token.release();
    }
}

async fn wait_for(probe: &Probe, started: usize) {
    timeout(WAIT, async {
        while probe.started.load(Ordering::SeqCst) < started {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {started} handlers to start"));
}

#[test_log::test(tokio::test)]
async fn test_third_link_waits_for_a_released_token() {
    let probe = Probe::new();
    let admission = ConnectionAdmission::new(NetConfig::default().with_max_connections(2));

    let running = admission
        .admit_loop(
            Role::Listen,
            "127.0.0.1:0",
            PeerNodeId::new("node-a"),
            gated_handler,
            probe.clone(),
        )
        .await
        .unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(TcpStream::connect(running.local_addr()).await.unwrap());
    }

    wait_for(&probe, 2).await;
    sleep(Duration::from_millis(300)).await;
    assert_eq!(probe.started.load(Ordering::SeqCst), 2);

    probe.gate.add_permits(1);
    wait_for(&probe, 3).await;

    probe.gate.add_permits(2);
    assert!(probe.max_active.load(Ordering::SeqCst) <= 2);
    assert!(
        probe
            .peers
            .lock()
            .await
            .iter()
            .all(|peer| peer == "node-a")
    );
    running.abort();
}

#[test_log::test(tokio::test)]
async fn test_concurrency_never_exceeds_capacity() {
    let probe = Probe::new();
    let admission = ConnectionAdmission::new(NetConfig::default().with_max_connections(3));

    let running = admission
        .admit_loop(
            Role::Listen,
            "127.0.0.1:0",
            PeerNodeId::new("node-b"),
            gated_handler,
            probe.clone(),
        )
        .await
        .unwrap();

    let addr = running.local_addr();
    let mut clients = Vec::new();
    for _ in 0..10 {
        clients.push(tokio::spawn(TcpStream::connect(addr)));
    }

    wait_for(&probe, 3).await;
    for released in 1..=7 {
        probe.gate.add_permits(1);
        wait_for(&probe, 3 + released).await;
        assert!(probe.active.load(Ordering::SeqCst) <= 3);
    }
    probe.gate.add_permits(3);

    assert_eq!(probe.started.load(Ordering::SeqCst), 10);
    assert!(probe.max_active.load(Ordering::SeqCst) <= 3);
    running.abort();
}

#[test_log::test(tokio::test)]
async fn test_dropped_token_is_returned_to_pool() {
    let admission = ConnectionAdmission::new(NetConfig::default().with_max_connections(1));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handler = move |mut link: Link, _peer: PeerNodeId, token: Option<AdmissionToken>, _: ()| {
        let tx = tx.clone();
        async move {
            assert!(token.is_some());
            let mut buf = [0u8; 1];
            let _ = link.read_exact(&mut buf).await;
            let _ = tx.send(buf[0]);
        }
    };

    let running = admission
        .admit_loop(Role::Listen, "127.0.0.1:0", "node-c".into(), handler, ())
        .await
        .unwrap();

    for byte in [b'x', b'y', b'z'] {
        let mut client = TcpStream::connect(running.local_addr()).await.unwrap();
        client.write_all(&[byte]).await.unwrap();
        let seen = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(seen, byte);
    }
    running.abort();
}

#[test_log::test(tokio::test)]
async fn test_connect_passes_peer_and_context_without_token() {
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = remote.local_addr().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handler = move |mut link: Link,
                        peer: PeerNodeId,
                        token: Option<AdmissionToken>,
                        context: (String, u16)| {
        let tx = tx.clone();
        async move {
            link.write_all(b"hello").await.unwrap();
            let _ = tx.send((peer.to_string(), token.is_none(), context));
        }
    };

    ConnectionAdmission::new(NetConfig::default())
        .admit_loop(
            Role::Connect,
            &remote_addr.to_string(),
            PeerNodeId::new("node-d"),
            handler,
            ("socks5".to_string(), 1080),
        )
        .await
        .unwrap();

    let (mut conn, _) = timeout(WAIT, remote.accept()).await.unwrap().unwrap();
    let mut hello = [0u8; 5];
    conn.read_exact(&mut hello).await.unwrap();
    assert_eq!(&hello, b"hello");

    let (peer, no_token, context) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(peer, "node-d");
    assert!(no_token);
    assert_eq!(context, ("socks5".to_string(), 1080));
}

#[test_log::test(tokio::test)]
async fn test_listen_bind_conflict_is_returned() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let err = ConnectionAdmission::new(NetConfig::default())
        .admit_loop(
            Role::Listen,
            &addr.to_string(),
            PeerNodeId::new("node-e"),
            gated_handler,
            Probe::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, burrow_netio::NetError::Bind { .. }));
}

#[test_log::test(tokio::test)]
async fn test_connect_leaves_keepalive_at_os_default() {
    let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handler = move |link: Link, _peer: PeerNodeId, _token: Option<AdmissionToken>, (): ()| {
        let (_, stream) = link.into_parts();
        let _ = tx.send(socket2::SockRef::from(&stream).keepalive().unwrap());
        std::future::ready(())
    };

    ConnectionAdmission::new(NetConfig::default())
        .admit_loop(
            Role::Connect,
            &remote.local_addr().unwrap().to_string(),
            PeerNodeId::new("node-f"),
            handler,
            (),
        )
        .await
        .unwrap();

    let keepalive = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(!keepalive);
}

#[test_log::test(tokio::test)]
async fn test_zero_capacity_is_rejected() {
    let err = ConnectionAdmission::new(NetConfig::default().with_max_connections(0))
        .admit_loop(
            Role::Listen,
            "127.0.0.1:0",
            PeerNodeId::new("node-g"),
            gated_handler,
            Probe::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, burrow_netio::NetError::Config(_)));
}
