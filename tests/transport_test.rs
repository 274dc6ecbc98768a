//! Transport adapter against a local WebSocket server.

mod common;

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WireMessage;

use common::{next_task, spawn_server};
use wsrepl::{ConnectOptions, DispatchTask, FrameKind, Marshal, Transport, WebSocketTransport};

#[tokio::test]
async fn test_frames_are_translated_and_sends_reach_server() {
    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<String>();
    let url = spawn_server(move |mut socket, _| {
        let received_tx = received_tx.clone();
        async move {
            socket.send(WireMessage::Text("hi".into())).await.unwrap();
            socket.send(WireMessage::Binary(vec![0, 1].into())).await.unwrap();
            socket.send(WireMessage::Ping(b"p".to_vec().into())).await.unwrap();
            while let Some(Ok(message)) = socket.next().await {
                if let WireMessage::Text(text) = message {
                    let _ = received_tx.send(text.to_string());
                }
            }
        }
    })
    .await;

    let (marshal, mut rx) = Marshal::channel();
    let mut transport = WebSocketTransport::new(ConnectOptions::new(url), Duration::from_secs(1));
    transport.start(marshal.clone()).unwrap();

    assert!(matches!(next_task(&mut rx).await, DispatchTask::Connected));
    match next_task(&mut rx).await {
        DispatchTask::Data { payload, frame, fin } => {
            assert_eq!(payload, b"hi");
            assert_eq!(frame, FrameKind::Text);
            assert!(fin);
        }
        other => panic!("expected text data, got {other:?}"),
    }
    match next_task(&mut rx).await {
        DispatchTask::Data { payload, frame, .. } => {
            assert_eq!(payload, vec![0, 1]);
            assert_eq!(frame, FrameKind::Binary);
        }
        other => panic!("expected binary data, got {other:?}"),
    }
    match next_task(&mut rx).await {
        DispatchTask::Ping(payload) => assert_eq!(payload, b"p"),
        other => panic!("expected ping, got {other:?}"),
    }

    assert!(transport.is_connected());
    transport.send(FrameKind::Text, b"reply".to_vec()).unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(5), received_rx.recv())
        .await
        .unwrap();
    assert_eq!(echoed.as_deref(), Some("reply"));
}

#[tokio::test]
async fn test_fragmented_message_arrives_reassembled() {
    let url = spawn_server(|mut socket, _| async move {
        let first = Frame::message(b"hel".to_vec(), OpCode::Data(Data::Text), false);
        let last = Frame::message(b"lo".to_vec(), OpCode::Data(Data::Continue), true);
        socket.send(WireMessage::Frame(first)).await.unwrap();
        socket.send(WireMessage::Frame(last)).await.unwrap();
        socket.send(WireMessage::Text("after".into())).await.unwrap();
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;

    let (marshal, mut rx) = Marshal::channel();
    let mut transport = WebSocketTransport::new(ConnectOptions::new(url), Duration::from_secs(1));
    transport.start(marshal).unwrap();

    assert!(matches!(next_task(&mut rx).await, DispatchTask::Connected));
    match next_task(&mut rx).await {
        DispatchTask::Data { payload, frame, fin } => {
            assert_eq!(payload, b"hello");
            assert_eq!(frame, FrameKind::Text);
            assert!(fin);
        }
        other => panic!("expected reassembled text, got {other:?}"),
    }
    match next_task(&mut rx).await {
        DispatchTask::Data { payload, .. } => assert_eq!(payload, b"after"),
        other => panic!("expected the next message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_reported_once_then_reconnects_after_delay() {
    let url = spawn_server(|mut socket, connection| async move {
        if connection == 0 {
            socket
                .send(WireMessage::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "bye".into(),
                })))
                .await
                .unwrap();
        }
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;

    let delay = Duration::from_secs(1);
    let (marshal, mut rx) = Marshal::channel();
    let mut transport = WebSocketTransport::new(ConnectOptions::new(url), delay);
    transport.start(marshal.clone()).unwrap();

    assert!(matches!(next_task(&mut rx).await, DispatchTask::Connected));
    match next_task(&mut rx).await {
        DispatchTask::Disconnected { code, reason } => {
            assert_eq!(code, 1000);
            assert_eq!(reason, "bye");
        }
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert!(!transport.is_connected());

    // The adapter waits until the reconnect notice has been displayed.
    let acknowledged = match next_task(&mut rx).await {
        DispatchTask::Log { message, done } => {
            assert_eq!(message.payload(), "Lost connection, reconnecting in 1 seconds");
            done.expect("reconnect notice waits for the dispatcher").send(()).unwrap();
            Instant::now()
        }
        other => panic!("expected reconnect notice, got {other:?}"),
    };

    loop {
        match next_task(&mut rx).await {
            DispatchTask::Connected => break,
            DispatchTask::Disconnected { .. } => panic!("disconnect reported twice"),
            _ => {}
        }
    }
    assert!(acknowledged.elapsed() >= delay);
}

#[tokio::test]
async fn test_thread_exits_when_dispatcher_is_gone() {
    let (marshal, rx) = Marshal::channel();
    drop(rx);
    let mut transport = WebSocketTransport::new(
        ConnectOptions::new("ws://127.0.0.1:1"),
        Duration::from_millis(10),
    );
    transport.start(marshal).unwrap();
    assert!(!transport.is_connected());
}
