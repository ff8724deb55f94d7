use std::time::Duration;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use log::{debug, error, info, warn};

use crate::config::HANDSHAKE_TIMEOUT_SECS;
use crate::prices::{Broadcaster, ConnectionId, ServerMessage};
use crate::websocket::ClientMessage;

pub const WS_PATH: &str = "/ws";
const GREETING: &str = "Connected to the real-time price feed";

pub struct WebSocketHandler {
    broadcaster: Broadcaster,
    peer_addr: String,
    shutdown: CancellationToken,
}

impl WebSocketHandler {
    pub fn new(broadcaster: Broadcaster, peer_addr: String, shutdown: CancellationToken) -> Self {
        Self {
            broadcaster,
            peer_addr,
            shutdown,
        }
    }

    pub async fn handle_connection(self, stream: TcpStream) {
        let handshake = accept_hdr_async(stream, |req: &Request, response: Response| {
            self.route_request(req, response)
        });

        let ws_stream = match timeout(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS), handshake).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                error!("WebSocket handshake failed for {}: {:?}", self.peer_addr, e);
                return;
            }
            Err(_) => {
                warn!("WebSocket handshake timed out for {}", self.peer_addr);
                return;
            }
        };

        self.serve(ws_stream).await;
    }

    fn route_request(&self, req: &Request, response: Response) -> Result<Response, ErrorResponse> {
        let path = req.uri().path();
        info!("WebSocket connection request for path: {} from {}", path, self.peer_addr);

        if path == WS_PATH {
            Ok(response)
        } else {
            warn!("Unknown WebSocket path '{}' from {}", path, self.peer_addr);
            Err(create_error_response(StatusCode::NOT_FOUND, "Invalid WebSocket path"))
        }
    }

    /// Runs an established socket until the client leaves or the server shuts down.
    pub async fn serve<S>(self, ws_stream: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (connection, outbox) = self.broadcaster.connect();
        let (write, read) = ws_stream.split();

        info!("WebSocket connection {} established from {}", connection.short(), self.peer_addr);

        if let Err(e) = self.broadcaster.send_to(
            connection,
            ServerMessage::Connected { message: GREETING.to_string() },
        ) {
            warn!("Greeting not delivered: {}", e);
        }

        let mut write_task = spawn_write_task(write, outbox, self.shutdown.clone(), connection);
        let mut read_task = spawn_read_task(read, connection, self.broadcaster.clone());

        tokio::select! {
            _ = &mut write_task => {
                debug!("Write task completed for {}", connection.short());
                read_task.abort();
            }
            _ = &mut read_task => {
                debug!("Read task completed for {}", connection.short());
            }
        }

        // Dropping the outbox sender ends the write task if it is still running
        self.broadcaster.disconnect(connection);

        info!("WebSocket connection {} closed from {}", connection.short(), self.peer_addr);
    }
}

fn create_error_response(status: StatusCode, message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = status;
    response
}

fn spawn_write_task<S>(
    mut write: SplitSink<WebSocketStream<S>, Message>,
    mut outbox: mpsc::Receiver<ServerMessage>,
    shutdown: CancellationToken,
    connection: ConnectionId,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let reason = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    break "Server shutting down";
                }
                message = outbox.recv() => {
                    let Some(message) = message else {
                        break "Feed closed";
                    };
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize message for {}: {}", connection.short(), e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!("Error sending to {}: {:?}", connection.short(), e);
                        return;
                    }
                }
            }
        };

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.into(),
        };
        if let Err(e) = write.send(Message::Close(Some(frame))).await {
            debug!("Close frame not sent to {}: {:?}", connection.short(), e);
        }
    })
}

fn spawn_read_task<S>(
    mut read: SplitStream<WebSocketStream<S>>,
    connection: ConnectionId,
    broadcaster: Broadcaster,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => dispatch(&broadcaster, connection, &text),
                Ok(Message::Close(frame)) => {
                    info!("Client {} sent close frame: {:?}", connection.short(), frame);
                    break;
                }
                Ok(Message::Binary(data)) => {
                    debug!("Ignoring {} byte binary message from {}", data.len(), connection.short());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error for {}: {:?}", connection.short(), e);
                    break;
                }
            }
        }
    })
}

/// Handles one text frame from a client.
pub fn dispatch(broadcaster: &Broadcaster, connection: ConnectionId, text: &str) {
    let reply = match ClientMessage::parse(text) {
        Ok(ClientMessage::SubscribePrices { symbols }) => {
            let accepted = broadcaster.subscribe(connection, &symbols);
            info!("📊 Connection {} requested {:?}, accepted {:?}", connection.short(), symbols, accepted);
            // Snapshots are already queued, so the ack always follows them
            Some(ServerMessage::Subscribed { symbols: accepted })
        }
        Ok(ClientMessage::Ping) => Some(ServerMessage::Pong),
        Err(message) => {
            debug!("Rejected message from {}: {}", connection.short(), message);
            Some(ServerMessage::Error { message })
        }
    };

    if let Some(reply) = reply {
        if let Err(e) = broadcaster.send_to(connection, reply) {
            warn!("{}", e);
        }
    }
}
