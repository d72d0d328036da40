//! WebSocket transport (tokio-tungstenite)

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::packet::EnginePacket;
use super::{Endpoint, Pipe};
use crate::error::{Error, Result};

/// Open the socket and start the reader/writer tasks.
pub async fn open(endpoint: &Endpoint) -> Result<Pipe> {
    let url = endpoint.websocket_url();
    tracing::debug!(url = %url, "Opening websocket");

    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::Transport(format!("websocket connect failed: {}", e)))?;
    let (mut sink, mut stream) = ws.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<EnginePacket>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<EnginePacket>>();

    tokio::spawn(async move {
        while let Some(packet) = out_rx.recv().await {
            let closing = packet == EnginePacket::Close;
            if let Err(e) = sink.send(Message::Text(packet.encode())).await {
                tracing::debug!(error = %e, "Websocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let packet = match frame {
                Ok(Message::Text(text)) => EnginePacket::decode(&text),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "Websocket read failed");
                    break;
                }
            };
            if in_tx.send(packet).is_err() {
                break;
            }
        }
    });

    Ok(Pipe {
        outgoing: out_tx,
        incoming: in_rx,
    })
}
