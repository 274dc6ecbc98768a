//! Shared helpers: a local WebSocket server and queue utilities.

#![allow(dead_code, reason = "each test binary uses a subset")]

use std::future::Future;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::WebSocketStream;

use wsrepl::DispatchTask;

/// Server-side connection.
pub type ServerSocket = WebSocketStream<TcpStream>;

/// Start a WebSocket server on a free local port.
///
/// `handler` runs once per accepted connection with the connection number
/// (0 for the first). Returns the `ws://` URL.
pub async fn spawn_server<F, Fut>(handler: F) -> String
where
    F: Fn(ServerSocket, usize) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut count = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            tokio::spawn(handler(socket, count));
            count += 1;
        }
    });
    format!("ws://{addr}")
}

/// Next task from the dispatcher queue, failing the test after 10 seconds.
pub async fn next_task(rx: &mut UnboundedReceiver<DispatchTask>) -> DispatchTask {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a dispatcher task")
        .expect("dispatcher queue closed")
}
