//! Event stream against a real WebSocket backend.

use fleetwatch_client::{
    AgentStatus, ClientConfig, ClientSignal, ConnectionState, FleetEvent, RealtimeFleetClient,
    Severity, Topic,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Accept one connection per session, push its frames, then close it.
/// The listener is dropped afterwards, so later connects are refused.
async fn serve(listener: TcpListener, sessions: Vec<Vec<&'static str>>) {
    for frames in sessions {
        let Ok((stream, addr)) = listener.accept().await else {
            return;
        };
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        tracing::debug!("Test backend accepted {}", addr);
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        let _ = ws.close(None).await;
        while let Some(Ok(_)) = ws.next().await {}
    }
}

/// Accept connections and hold them without ever answering the handshake.
async fn hold_silently(listener: TcpListener) {
    let mut held = Vec::new();
    while let Ok((stream, _)) = listener.accept().await {
        held.push(stream);
    }
}

/// Accept one connection and report every frame the client writes.
async fn record(listener: TcpListener, received: mpsc::UnboundedSender<Message>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    while let Some(Ok(msg)) = ws.next().await {
        let _ = received.send(msg);
    }
}

fn config(addr: SocketAddr, max_attempts: u32, delay_ms: u64) -> ClientConfig {
    ClientConfig {
        transport_url: format!("ws://{addr}"),
        snapshot_url: format!("http://{addr}/api/data"),
        max_attempts,
        delay_ms,
        ..ClientConfig::default()
    }
}

async fn wait_for_exhaustion(signals: &mut broadcast::Receiver<ClientSignal>) -> Vec<ClientSignal> {
    let mut seen = Vec::new();
    loop {
        let signal = timeout(Duration::from_secs(10), signals.recv())
            .await
            .expect("client never gave up")
            .unwrap();
        seen.push(signal);
        if signal == ClientSignal::ConnectionExhausted {
            return seen;
        }
    }
}

#[tokio::test]
async fn streams_events_across_reconnects() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(
        listener,
        vec![
            vec![
                r#"{"type":"system_notification","message":"Gateway restarted","priority":"high"}"#,
                r#"{"type":"mystery","payload":1}"#,
                r#"{"type":"cost_alert","message":"Daily budget exceeded","amount":12.5}"#,
            ],
            vec![r#"{"type":"agent_status_update","agentId":"agent:main:main","status":"offline"}"#],
        ],
    ));

    let client = RealtimeFleetClient::new(config(addr, 1, 10));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    client.subscribe(Topic::All, move |event| {
        let _ = events_tx.send(event.clone());
    });
    let mut signals = client.signals();
    client.start();

    let mut events = Vec::new();
    for _ in 0..3 {
        let event = timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("event not delivered")
            .unwrap();
        events.push(event);
    }
    assert_eq!(
        events,
        [
            FleetEvent::SystemNotice {
                message: "Gateway restarted".into(),
                severity: Severity::Warning,
            },
            FleetEvent::CostAlert {
                message: "Daily budget exceeded".into(),
                amount: 12.5,
            },
            FleetEvent::AgentStatusChanged {
                agent_id: "agent:main:main".parse().unwrap(),
                status: AgentStatus::Offline,
            },
        ]
    );

    let seen = wait_for_exhaustion(&mut signals).await;
    let connects = seen.iter().filter(|s| **s == ClientSignal::Connected).count();
    assert_eq!(connects, 2);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn refused_connections_exhaust_the_budget() {
    init_tracing();
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = RealtimeFleetClient::new(config(addr, 2, 10));
    let mut signals = client.signals();
    client.start();

    let seen = wait_for_exhaustion(&mut signals).await;
    let connecting = seen
        .iter()
        .filter(|s| {
            matches!(
                s,
                ClientSignal::StateChanged {
                    state: ConnectionState::Connecting,
                    ..
                }
            )
        })
        .count();
    assert_eq!(connecting, 3);
    assert!(!seen.contains(&ClientSignal::Connected));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.attempts(), 2);
}

#[tokio::test]
async fn stalled_handshakes_exhaust_the_budget() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(hold_silently(listener));

    let client = RealtimeFleetClient::new(ClientConfig {
        connect_timeout_ms: 200,
        ..config(addr, 1, 10)
    });
    let mut signals = client.signals();
    client.start();

    let seen = wait_for_exhaustion(&mut signals).await;
    assert!(!seen.contains(&ClientSignal::Connected));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn sends_commands_and_closes_on_stop() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (received_tx, mut received) = mpsc::unbounded_channel();
    let server = tokio::spawn(record(listener, received_tx));

    let client = RealtimeFleetClient::new(config(addr, 0, 10));
    let mut signals = client.signals();
    client.start();
    while timeout(Duration::from_secs(5), signals.recv())
        .await
        .expect("never connected")
        .unwrap()
        != ClientSignal::Connected
    {}

    assert!(client.send(&json!({ "type": "ping" })));
    let first = timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.to_text().unwrap(), r#"{"type":"ping"}"#);

    client.stop();
    let closing = timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(closing.is_close());
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server never saw the stream end")
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.send(&json!({ "type": "ping" })));
}
