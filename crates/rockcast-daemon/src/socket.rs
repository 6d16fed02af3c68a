use crate::core::Control;
use crate::BroadcastMessage;
use rockcast_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use rockcast_proto::state::StateManager;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub fn start_server(bind_address: String, port: u16, control: Control) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, control).await;
    })
}

async fn serve(listener: TcpListener, control: Control) {
    let mut client_id = 0usize;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let control = control.clone();
                let bcast_rx = control.broadcast_tx.subscribe();
                tokio::spawn(async move {
                    handle_client(stream, control, id, bcast_rx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    control: Control,
    client_id: usize,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = encode_hello(&control.state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            match next_frame(&mut read_buf) {
                                Frame::Incomplete => break,
                                Frame::Message(Message::Command(cmd)) => {
                                    info!("Client {} sent command: {:?}", client_id, cmd);
                                    control.execute(cmd).await;

                                    if let Ok(encoded) = encode_state(&control.state_manager).await {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Frame::Message(_) => {}
                                Frame::Malformed(e) => {
                                    warn!("Client {} sent an undecodable frame: {}", client_id, e);
                                }
                                Frame::Oversized(len) => {
                                    warn!("Client {} announced a {} byte frame, disconnecting", client_id, len);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&control.state_manager).await,
                    Ok(BroadcastMessage::Snapshot(data)) => {
                        Message::Broadcast(Broadcast::Snapshot { data }).encode()
                    }
                    Ok(BroadcastMessage::Failure(message)) => {
                        Message::Broadcast(Broadcast::Failure { message }).encode()
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&control.state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Largest command frame a client may send.
const MAX_FRAME_LEN: usize = 64 * 1024;

enum Frame {
    Incomplete,
    Message(Message),
    /// A complete frame whose body is not a valid message; already consumed.
    Malformed(anyhow::Error),
    Oversized(usize),
}

/// Take the next length-prefixed frame off the front of `buf`.
fn next_frame(buf: &mut Vec<u8>) -> Frame {
    if buf.len() < 4 {
        return Frame::Incomplete;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Frame::Oversized(len);
    }
    if buf.len() < 4 + len {
        return Frame::Incomplete;
    }
    let frame: Vec<u8> = buf.drain(..4 + len).collect();
    match Message::decode(&frame) {
        Ok((msg, _)) => Frame::Message(msg),
        Err(e) => Frame::Malformed(e),
    }
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}
