//! HTTP long-polling transport (reqwest)
//!
//! The open handshake is a plain GET; afterwards one task keeps a GET
//! outstanding for inbound packets and another POSTs outbound packets in
//! batches.

use tokio::sync::mpsc;

use super::packet::{decode_payload, encode_payload, EnginePacket};
use super::{Endpoint, Pipe};
use crate::error::{Error, Result};

pub async fn open(client: &reqwest::Client, endpoint: &Endpoint) -> Result<Pipe> {
    let handshake = fetch(client, endpoint.polling_url(None).as_str()).await?;
    let (url, mut packets) = open_session(endpoint, &handshake)?;
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<EnginePacket>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<EnginePacket>>();

    for packet in packets.drain(..) {
        let _ = in_tx.send(Ok(packet));
    }

    let reader_client = client.clone();
    let reader_url = url.clone();
    tokio::spawn(async move {
        loop {
            let body = match fetch(&reader_client, &reader_url).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(error = %e, "Polling GET failed");
                    break;
                }
            };
            let packets = match decode_payload(&body) {
                Ok(packets) => packets,
                Err(e) => {
                    if in_tx.send(Err(e)).is_err() {
                        break;
                    }
                    continue;
                }
            };
            for packet in packets {
                let closing = packet == EnginePacket::Close;
                if in_tx.send(Ok(packet)).is_err() || closing {
                    return;
                }
            }
        }
    });

    let writer_client = client.clone();
    tokio::spawn(async move {
        while let Some(first) = out_rx.recv().await {
            let mut batch = vec![first];
            while let Ok(next) = out_rx.try_recv() {
                batch.push(next);
            }
            let closing = batch.contains(&EnginePacket::Close);
            let result = writer_client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
                .body(encode_payload(&batch))
                .send()
                .await
                .and_then(|response| response.error_for_status());
            if let Err(e) = result {
                tracing::debug!(error = %e, "Polling POST failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    Ok(Pipe {
        outgoing: out_tx,
        incoming: in_rx,
    })
}

/// Session URL and packets from the handshake body, which must lead
/// with the open packet.
fn open_session(endpoint: &Endpoint, handshake: &str) -> Result<(String, Vec<EnginePacket>)> {
    let packets = decode_payload(handshake)?;
    let sid = match packets.first() {
        Some(EnginePacket::Open(open)) => open.sid.clone(),
        _ => {
            return Err(Error::Protocol(
                "polling handshake did not start with an open packet".to_string(),
            ))
        }
    };
    tracing::debug!(sid = %sid, "Polling session opened");
    Ok((endpoint.polling_url(Some(&sid)).to_string(), packets))
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Transport(format!("polling request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(Error::Transport(format!(
            "polling error ({}): {}",
            status, error_text
        )));
    }

    response
        .text()
        .await
        .map_err(|e| Error::Transport(format!("failed to read polling response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPEN: &str = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000}"#;

    fn endpoint() -> Endpoint {
        Endpoint::parse("http://localhost:5000", "socket.io").unwrap()
    }

    #[test]
    fn test_open_session_uses_sid() {
        let body = format!("{}\x1e40{{\"sid\":\"abc\"}}", OPEN);
        let (url, packets) = open_session(&endpoint(), &body).unwrap();

        assert_eq!(
            url,
            "http://localhost:5000/socket.io/?EIO=4&transport=polling&sid=lv_VI97HAXpY6yYWAAAC"
        );
        assert_eq!(packets.len(), 2);
        assert!(matches!(packets[0], EnginePacket::Open(_)));
        assert_eq!(packets[1], EnginePacket::Message("0{\"sid\":\"abc\"}".to_string()));
    }

    #[test]
    fn test_open_session_requires_open_first() {
        let body = format!("6\x1e{}", OPEN);
        let err = open_session(&endpoint(), &body).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        assert!(open_session(&endpoint(), "").is_err());
        assert!(open_session(&endpoint(), "0{not json").is_err());
    }
}
