//! WebSocket transport adapter
//!
//! Every server message goes out as a JSON text frame. `audio_chunk`
//! headers are followed by one binary frame holding the interleaved samples
//! as little-endian f32.

use super::AppContext;
use crate::error::{Error, Result};
use crate::streaming::{ConnectionId, StreamRequest, Transport};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use chunkstream_common::{ClientCommand, StreamMessage};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One browser connection
pub struct WebSocketTransport {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sink: Mutex::new(sink),
            connected: AtomicBool::new(true),
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: StreamMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::ConnectionLost("websocket closed".to_string()));
        }

        let header = serde_json::to_string(&message)
            .map_err(|e| Error::Internal(format!("Failed to encode message: {}", e)))?;
        let payload = match &message {
            StreamMessage::AudioChunk { samples, .. } => Some(encode_samples(samples)),
            _ => None,
        };

        let mut sink = self.sink.lock().await;
        let result = async {
            sink.send(Message::Text(header)).await?;
            if let Some(bytes) = payload {
                sink.send(Message::Binary(bytes)).await?;
            }
            Ok::<(), axum::Error>(())
        }
        .await;

        result.map_err(|e| {
            self.mark_disconnected();
            Error::ConnectionLost(e.to_string())
        })
    }
}

/// Interleaved f32 samples as little-endian bytes
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: AppContext) {
    let (sink, mut stream) = socket.split();
    let transport = Arc::new(WebSocketTransport::new(sink));
    let connection_id = transport.connection_id();
    info!(connection = %connection_id, "Client connected");

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => dispatch(&ctx, &transport, command).await,
                Err(e) => warn!(connection = %connection_id, "Ignoring invalid command: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %connection_id, "Socket error: {}", e);
                break;
            }
        }
    }

    transport.mark_disconnected();
    let stopped = ctx.engine.controller.stop_connection(connection_id).await;
    info!(connection = %connection_id, stopped, "Client disconnected");
}

async fn dispatch(ctx: &AppContext, transport: &Arc<WebSocketTransport>, command: ClientCommand) {
    let connection_id = transport.connection_id();
    let request = match command {
        ClientCommand::PlayEnhanced {
            track_id,
            preset,
            intensity,
            start_chunk,
        } => StreamRequest::enhanced(track_id, preset, intensity).starting_at(start_chunk),
        ClientCommand::PlayOriginal {
            track_id,
            start_chunk,
        } => StreamRequest::original(track_id).starting_at(start_chunk),
        ClientCommand::Stop { stream_type } => {
            let controller = &ctx.engine.controller;
            match stream_type {
                Some(stream_type) => {
                    controller.stop_stream(connection_id, stream_type).await;
                }
                None => {
                    controller.stop_connection(connection_id).await;
                }
            }
            return;
        }
    };

    let controller = Arc::clone(&ctx.engine.controller);
    let transport: Arc<dyn Transport> = transport.clone();
    tokio::spawn(async move {
        if let Err(e) = controller.start_stream(transport, request).await {
            warn!(connection = %connection_id, "Stream not started: {}", e);
        }
    });
}
