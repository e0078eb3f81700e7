//! End-to-end tests: a real agent talking to a real collector over
//! loopback TCP, with intervals shortened so flushes and reconnects
//! happen within test timeouts.

use std::sync::Arc;
use std::time::Duration;

use actigraph_agent::{AgentConfig, AgentHandle};
use actigraph_auth::TokenCodec;
use actigraph_server::{Server, ShutdownHandle};
use actigraph_store::{ActivityStore, MemoryStore};
use actigraph_types::{ActivitySample, ConnectionStatus, UserId};
use actigraph_wire::{ClientMessage, Frame, MAX_FRAME_SIZE, ServerMessage};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};

const SECRET: &str = "e2e-test-secret";
const TIMEOUT: Duration = Duration::from_secs(10);

fn fast_config(addr: &str) -> AgentConfig {
    AgentConfig {
        server_addr: addr.to_string(),
        flush_interval: Duration::from_millis(50),
        retention_window: Duration::from_secs(60),
        backoff_base: Duration::from_millis(20),
        backoff_cap: Duration::from_millis(100),
        max_reconnect_attempts: 0,
    }
}

async fn start_server(
    addr: &str,
    store: Arc<MemoryStore>,
) -> (std::net::SocketAddr, ShutdownHandle) {
    let tokens = Arc::new(TokenCodec::new(SECRET));
    // Rebinding a just-released port can transiently fail; retry briefly.
    for _ in 0..50 {
        match Server::bind(addr, Arc::clone(&tokens), Arc::clone(&store) as Arc<dyn ActivityStore>)
            .await
        {
            Ok((server, shutdown)) => {
                let bound = server.local_addr().unwrap();
                tokio::spawn(server.run());
                return (bound, shutdown);
            }
            Err(_) => sleep(Duration::from_millis(50)).await,
        }
    }
    panic!("could not bind {addr}");
}

fn issue_token(user: &str) -> String {
    TokenCodec::new(SECRET).issue(&UserId::new(user)).unwrap()
}

async fn await_status(rx: &mut watch::Receiver<ConnectionStatus>, wanted: ConnectionStatus) {
    timeout(TIMEOUT, async {
        loop {
            if *rx.borrow_and_update() == wanted {
                return;
            }
            rx.changed().await.expect("agent dropped status channel");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for status {wanted}"));
}

async fn await_store_len(store: &MemoryStore, wanted: usize) {
    timeout(TIMEOUT, async {
        loop {
            if store.len().unwrap() == wanted {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for {wanted} stored events, have {}",
            store.len().unwrap()
        )
    });
}

fn mouse(movements: u64) -> ActivitySample {
    ActivitySample::Mouse {
        x: 10,
        y: 20,
        movements,
    }
}

// Scripted-collector plumbing: some scenarios need a peer that
// misbehaves in ways the real server never does (withheld acks,
// delayed verdicts, corrupt frames).

async fn read_client_message(stream: &mut TcpStream, buf: &mut BytesMut) -> Option<ClientMessage> {
    loop {
        if let Ok(Some(frame)) = Frame::decode(buf) {
            return ClientMessage::from_frame(&frame).ok();
        }
        match stream.read_buf(buf).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn send_server_message(stream: &mut TcpStream, message: &ServerMessage) {
    let mut out = BytesMut::new();
    message.to_frame().unwrap().encode(&mut out);
    let _ = stream.write_all(&out).await;
}

#[tokio::test]
async fn test_events_flow_to_store() {
    let store = Arc::new(MemoryStore::new());
    let (addr, shutdown) = start_server("127.0.0.1:0", Arc::clone(&store)).await;

    let agent = AgentHandle::spawn(fast_config(&addr.to_string()));
    let mut status = agent.status_watch();

    agent.sign_in(issue_token("e2e-user")).unwrap();
    await_status(&mut status, ConnectionStatus::Connected).await;

    agent.record(mouse(1)).unwrap();
    agent.record(mouse(2)).unwrap();
    agent
        .record(ActivitySample::Key {
            keystrokes: 4,
            recent_keys: vec![30, 31],
        })
        .unwrap();

    await_store_len(&store, 3).await;
    let rows = store.events_for(&UserId::new("e2e-user")).unwrap();
    assert_eq!(rows.len(), 3);

    agent.shutdown().await;
    shutdown.shutdown();
}

#[tokio::test]
async fn test_resent_events_are_deduplicated() {
    let store = Arc::new(MemoryStore::new());
    let (addr, shutdown) = start_server("127.0.0.1:0", Arc::clone(&store)).await;

    let agent = AgentHandle::spawn(fast_config(&addr.to_string()));
    let mut status = agent.status_watch();

    agent.sign_in(issue_token("e2e-user")).unwrap();
    await_status(&mut status, ConnectionStatus::Connected).await;

    agent.record(mouse(1)).unwrap();
    agent.record(mouse(2)).unwrap();
    await_store_len(&store, 2).await;

    // The retention window is long, so the acked events are still in
    // the buffer and every later flush re-sends them. Let several
    // flush intervals pass: the store must not grow.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(store.len().unwrap(), 2);

    agent.shutdown().await;
    shutdown.shutdown();
}

#[tokio::test]
async fn test_reconnect_after_server_restart() {
    let store = Arc::new(MemoryStore::new());
    let (addr, shutdown) = start_server("127.0.0.1:0", Arc::clone(&store)).await;

    let agent = AgentHandle::spawn(fast_config(&addr.to_string()));
    let mut status = agent.status_watch();

    agent.sign_in(issue_token("e2e-user")).unwrap();
    await_status(&mut status, ConnectionStatus::Connected).await;

    agent.record(mouse(1)).unwrap();
    await_store_len(&store, 1).await;

    // Take the collector down; the agent notices and starts backoff.
    shutdown.shutdown();
    await_status(&mut status, ConnectionStatus::Disconnected).await;

    // Events recorded while disconnected are buffered, not lost.
    agent.record(mouse(2)).unwrap();
    agent.record(mouse(3)).unwrap();

    // Bring the collector back on the same address and same store.
    let (_addr, shutdown) = start_server(&addr.to_string(), Arc::clone(&store)).await;
    await_status(&mut status, ConnectionStatus::Connected).await;

    // The buffered events arrive, and the already-stored one is not
    // duplicated by the re-send.
    await_store_len(&store, 3).await;

    agent.shutdown().await;
    shutdown.shutdown();
}

#[tokio::test]
async fn test_bad_token_surfaces_error_status() {
    let store = Arc::new(MemoryStore::new());
    let (addr, shutdown) = start_server("127.0.0.1:0", Arc::clone(&store)).await;

    let agent = AgentHandle::spawn(fast_config(&addr.to_string()));
    let mut status = agent.status_watch();

    agent.sign_in("definitely-not-a-token").unwrap();
    await_status(&mut status, ConnectionStatus::Error).await;
    assert_eq!(store.len().unwrap(), 0);

    // A valid token recovers the agent.
    agent.sign_in(issue_token("e2e-user")).unwrap();
    await_status(&mut status, ConnectionStatus::Connected).await;

    agent.shutdown().await;
    shutdown.shutdown();
}

#[tokio::test]
async fn test_sign_out_disconnects_and_keeps_buffer() {
    let store = Arc::new(MemoryStore::new());
    let (addr, shutdown) = start_server("127.0.0.1:0", Arc::clone(&store)).await;

    let agent = AgentHandle::spawn(fast_config(&addr.to_string()));
    let mut status = agent.status_watch();

    agent.sign_in(issue_token("e2e-user")).unwrap();
    await_status(&mut status, ConnectionStatus::Connected).await;

    agent.sign_out().unwrap();
    await_status(&mut status, ConnectionStatus::Disconnected).await;

    // Recorded while signed out; delivered after the next sign-in.
    agent.record(mouse(9)).unwrap();
    agent.sign_in(issue_token("e2e-user")).unwrap();
    await_status(&mut status, ConnectionStatus::Connected).await;
    await_store_len(&store, 1).await;

    agent.shutdown().await;
    shutdown.shutdown();
}

#[tokio::test]
async fn test_flush_resumes_after_unacked_batch_and_sign_out() {
    // Collector that authenticates but withholds every ack.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let batch_tx = batch_tx.clone();
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                loop {
                    match read_client_message(&mut stream, &mut buf).await {
                        Some(ClientMessage::Auth { .. }) => {
                            send_server_message(&mut stream, &ServerMessage::AuthOk).await;
                        }
                        Some(ClientMessage::ActivityBatch { events, .. }) => {
                            let _ = batch_tx.send(events.len());
                        }
                        None => return,
                    }
                }
            });
        }
    });

    let agent = AgentHandle::spawn(fast_config(&addr.to_string()));
    let mut status = agent.status_watch();

    agent.sign_in(issue_token("e2e-user")).unwrap();
    await_status(&mut status, ConnectionStatus::Connected).await;
    agent.record(mouse(1)).unwrap();
    let first = timeout(TIMEOUT, batch_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, 1);

    // Sign out with that batch's ack still outstanding.
    agent.sign_out().unwrap();
    await_status(&mut status, ConnectionStatus::Disconnected).await;

    // A new session must be able to flush again; the dead session's
    // outstanding batch cannot keep gating the buffer.
    agent.sign_in(issue_token("e2e-user")).unwrap();
    await_status(&mut status, ConnectionStatus::Connected).await;
    agent.record(mouse(2)).unwrap();

    let resumed = timeout(TIMEOUT, batch_rx.recv())
        .await
        .expect("no batch flushed after sign-out and sign-in")
        .unwrap();
    assert!(resumed >= 1);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_fresh_token_supersedes_pending_rejection() {
    // Collector that withholds both verdicts until two tokens have
    // arrived, then rejects the first and accepts the second.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (first_auth_tx, first_auth_rx) = oneshot::channel();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = BytesMut::new();

        assert!(matches!(
            read_client_message(&mut stream, &mut buf).await,
            Some(ClientMessage::Auth { .. })
        ));
        let _ = first_auth_tx.send(());

        assert!(matches!(
            read_client_message(&mut stream, &mut buf).await,
            Some(ClientMessage::Auth { .. })
        ));
        send_server_message(
            &mut stream,
            &ServerMessage::AuthFail {
                reason: "token expired".to_string(),
            },
        )
        .await;
        send_server_message(&mut stream, &ServerMessage::AuthOk).await;

        // Hold the connection open for the streaming session.
        while read_client_message(&mut stream, &mut buf).await.is_some() {}
    });

    let agent = AgentHandle::spawn(fast_config(&addr.to_string()));
    let mut status = agent.status_watch();

    agent.sign_in("stale-token").unwrap();
    first_auth_rx.await.unwrap();
    // Refresh the token while the first verdict is still in flight.
    agent.sign_in(issue_token("e2e-user")).unwrap();

    // The rejection belongs to the superseded token; the fresh one
    // must win the handshake, not be discarded.
    await_status(&mut status, ConnectionStatus::Connected).await;

    agent.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_stream_surfaces_error_status() {
    // Collector that accepts the handshake, then emits a frame header
    // announcing an impossible payload size.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            read_client_message(&mut stream, &mut buf).await,
            Some(ClientMessage::Auth { .. })
        ));
        send_server_message(&mut stream, &ServerMessage::AuthOk).await;
        let bogus = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        let _ = stream.write_all(&bogus).await;
        // Leave the socket open so the failure is the codec's, not EOF.
        sleep(TIMEOUT).await;
    });

    // Slow backoff keeps the error status observable.
    let mut config = fast_config(&addr.to_string());
    config.backoff_base = Duration::from_secs(1);
    config.backoff_cap = Duration::from_secs(2);
    let agent = AgentHandle::spawn(config);
    let mut status = agent.status_watch();

    agent.sign_in(issue_token("e2e-user")).unwrap();
    await_status(&mut status, ConnectionStatus::Error).await;

    agent.shutdown().await;
}
