use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use log::{error, info};

use crate::prices::Broadcaster;
use crate::websocket::WebSocketHandler;

/// Accepts sockets until `shutdown` fires, then waits for open connections to close.
pub async fn run_websocket_server(
    listener: TcpListener,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
) {
    let mut connections = JoinSet::new();

    info!("🔗 Ready to accept WebSocket connections");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let handler = WebSocketHandler::new(
                            broadcaster.clone(),
                            addr.to_string(),
                            shutdown.clone(),
                        );
                        connections.spawn(handler.handle_connection(stream));
                    }
                    Err(e) => error!("Failed to accept WebSocket connection: {}", e),
                }
            }
            // Reap finished sessions so the set does not grow unbounded
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    let open = connections.len();
    if open > 0 {
        info!("Waiting for {} WebSocket connections to close", open);
    }
    while connections.join_next().await.is_some() {}

    let dropped = broadcaster.close_all();
    info!("WebSocket server stopped ({} outboxes released)", dropped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::http::StatusCode;
    use tokio_tungstenite::tungstenite::{Error, Message};

    use crate::prices::{PriceStore, ServerMessage};

    #[tokio::test]
    async fn test_accept_loop_routes_and_stops_on_shutdown() {
        let feed = Broadcaster::new(PriceStore::from_seed(&[("BTC", 45000.0)]), 16);
        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(run_websocket_server(listener, feed.clone(), shutdown.clone()));

        let (mut client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        let greeting = loop {
            match client.next().await.unwrap().unwrap() {
                Message::Text(text) => break serde_json::from_str::<ServerMessage>(&text).unwrap(),
                _ => continue,
            }
        };
        assert!(matches!(greeting, ServerMessage::Connected { .. }));
        assert_eq!(feed.stats().connections, 1);

        match connect_async(format!("ws://{}/other", addr)).await {
            Err(Error::Http(response)) => assert_eq!(response.status(), StatusCode::NOT_FOUND),
            Err(e) => panic!("unexpected error {:?}", e),
            Ok(_) => panic!("handshake on an unknown path succeeded"),
        }

        shutdown.cancel();
        server.await.unwrap();
        assert_eq!(feed.stats().connections, 0);
    }
}
