//! Socket.IO session on top of an Engine.IO pipe
//!
//! [`establish`] runs the namespace handshake and then hands the pipe to a
//! pump task that answers server pings, decodes events and writes client
//! events until either side goes away.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

use super::events::{ClientEvent, ServerEvent};
use super::packet::{EnginePacket, SocketPacket};
use super::{Link, LinkEvent, Pipe};
use crate::error::{Error, Result};

pub async fn establish(mut pipe: Pipe) -> Result<Link> {
    let open = match next_packet(&mut pipe).await? {
        EnginePacket::Open(open) => open,
        other => {
            return Err(Error::Protocol(format!(
                "expected engine.io open packet, got {:?}",
                other
            )))
        }
    };
    tracing::debug!(sid = %open.sid, ping_interval = open.ping_interval, "Engine.IO session opened");

    send(&pipe, SocketPacket::Connect(None).into_engine())?;

    let mut early = Vec::new();
    loop {
        match next_packet(&mut pipe).await? {
            EnginePacket::Ping(data) => send(&pipe, EnginePacket::Pong(data))?,
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                SocketPacket::Connect(_) => break,
                SocketPacket::ConnectError(message) => return Err(Error::Transport(message)),
                SocketPacket::Disconnect => {
                    return Err(Error::Transport(
                        "server rejected the namespace".to_string(),
                    ))
                }
                SocketPacket::Event { name, data } => {
                    early.extend(ServerEvent::from_event(&name, data));
                }
            },
            EnginePacket::Close => {
                return Err(Error::Transport(
                    "server closed the connection during handshake".to_string(),
                ))
            }
            _ => {}
        }
    }

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    for event in early {
        let _ = in_tx.send(LinkEvent::Event(event));
    }

    tokio::spawn(pump(pipe, open.silence_limit(), out_rx, in_tx));

    Ok(Link::new(out_tx, in_rx))
}

async fn next_packet(pipe: &mut Pipe) -> Result<EnginePacket> {
    pipe.incoming
        .recv()
        .await
        .ok_or_else(|| Error::Transport("transport closed during handshake".to_string()))?
}

fn send(pipe: &Pipe, packet: EnginePacket) -> Result<()> {
    pipe.outgoing
        .send(packet)
        .map_err(|_| Error::Transport("transport closed".to_string()))
}

async fn pump(
    mut pipe: Pipe,
    silence_limit: Duration,
    mut commands: mpsc::UnboundedReceiver<ClientEvent>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let deadline = sleep(silence_limit);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            packet = pipe.incoming.recv() => {
                let packet = match packet {
                    None => break "transport close",
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Dropping malformed engine.io packet");
                        continue;
                    }
                    Some(Ok(packet)) => packet,
                };
                deadline.as_mut().reset(Instant::now() + silence_limit);

                match packet {
                    EnginePacket::Ping(data) => {
                        if pipe.outgoing.send(EnginePacket::Pong(data)).is_err() {
                            break "transport error";
                        }
                    }
                    EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                        Ok(SocketPacket::Event { name, data }) => {
                            if let Some(event) = ServerEvent::from_event(&name, data) {
                                if events.send(LinkEvent::Event(event)).is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(SocketPacket::Disconnect) => break "io server disconnect",
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "Dropping malformed socket.io packet"),
                    },
                    EnginePacket::Close => break "transport close",
                    _ => {}
                }
            }
            command = commands.recv() => match command {
                Some(event) => match event.to_packet() {
                    Ok(packet) => {
                        if pipe.outgoing.send(packet.into_engine()).is_err() {
                            break "transport error";
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, event = event.name(), "Failed to encode client event"),
                },
                None => {
                    // Owner dropped the link: close politely and stop.
                    let _ = pipe.outgoing.send(SocketPacket::Disconnect.into_engine());
                    let _ = pipe.outgoing.send(EnginePacket::Close);
                    return;
                }
            },
            _ = &mut deadline => break "ping timeout",
        }
    };

    tracing::debug!(reason, "Socket.IO session ended");
    let _ = events.send(LinkEvent::Closed {
        reason: reason.to_string(),
    });
}
