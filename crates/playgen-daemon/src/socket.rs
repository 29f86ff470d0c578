use crate::core::{CoreHandle, SharedSnapshot};
use crate::BroadcastMessage;
use playgen_proto::protocol::{Broadcast, Message, Request, Response, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    snapshot: SharedSnapshot,
    core: CoreHandle,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
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
        serve(listener, snapshot, core, broadcast_tx).await;
    })
}

async fn serve(
    listener: TcpListener,
    snapshot: SharedSnapshot,
    core: CoreHandle,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let snapshot = snapshot.clone();
                let core = core.clone();
                let bcast_rx = broadcast_tx.subscribe();
                tokio::spawn(async move {
                    handle_client(stream, snapshot, id, core, bcast_rx).await;
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
    snapshot: SharedSnapshot,
    client_id: usize,
    core: CoreHandle,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Replies come back out of order: downloads answer long after playback
    // commands sent later on the same connection.
    let (reply_tx, mut reply_rx) = mpsc::channel::<Broadcast>(32);

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&snapshot).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            if read_buf.len() < 4 { break; }
                            match Message::decode(&read_buf) {
                                Ok((Message::Request(request), consumed)) => {
                                    read_buf.drain(..consumed);
                                    debug!("Client {} sent request {:?}", client_id, request);
                                    forward_request(&core, request, reply_tx.clone()).await;
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(e) => {
                                    if let Some(consumed) = undecodable_frame(&read_buf) {
                                        warn!("Client {} sent an invalid message: {}", client_id, e);
                                        read_buf.drain(..consumed);
                                        continue;
                                    }
                                    break;
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

            Some(reply) = reply_rx.recv() => {
                if let Ok(encoded) = Message::Broadcast(reply).encode() {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(msg) => {
                        if let Ok(encoded) = Message::Broadcast(msg.into_broadcast()).encode() {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        if let Ok(encoded) = encode_state(&snapshot).await {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

/// Hand `request` to the core in read order; only the wait for its reply
/// runs in the background.
async fn forward_request(core: &CoreHandle, request: Request, reply_tx: mpsc::Sender<Broadcast>) {
    let request_id = request.request_id;
    let pending = core.submit(request.command).await;
    tokio::spawn(async move {
        let response = match pending {
            Ok(rx) => rx
                .await
                .unwrap_or_else(|_| Response::error("daemon core dropped the request")),
            Err(e) => Response::error(e),
        };
        let _ = reply_tx
            .send(Broadcast::Reply {
                request_id,
                response,
            })
            .await;
    });
}

/// Length of a complete frame whose body failed to parse, so it can be
/// skipped.  `None` while the frame is still arriving.
fn undecodable_frame(buf: &[u8]) -> Option<usize> {
    let header: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    let total = 4 + u32::from_be_bytes(header) as usize;
    (buf.len() >= total).then_some(total)
}

async fn encode_hello(snapshot: &SharedSnapshot) -> anyhow::Result<Vec<u8>> {
    let state = snapshot.read().await.clone();
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state,
    })
    .encode()
}

async fn encode_state(snapshot: &SharedSnapshot) -> anyhow::Result<Vec<u8>> {
    let data = snapshot.read().await.clone();
    Message::Broadcast(Broadcast::State { data }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DaemonEvent;
    use playgen_proto::player::PlayerSnapshot;
    use playgen_proto::protocol::{Command, WindowAction};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    async fn read_message(stream: &mut TcpStream) -> Message {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        let mut frame = header.to_vec();
        frame.extend_from_slice(&body);
        Message::decode(&frame).unwrap().0
    }

    /// Listener on an ephemeral port, with a core that answers every
    /// request with `Ok`.
    async fn server() -> (std::net::SocketAddr, broadcast::Sender<BroadcastMessage>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut event_rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(evt) = event_rx.recv().await {
                if let DaemonEvent::Request { reply, .. } = evt {
                    let _ = reply.send(Response::Ok);
                }
            }
        });
        let (broadcast_tx, _) = broadcast::channel(16);
        let snapshot = Arc::new(RwLock::new(PlayerSnapshot::default()));
        tokio::spawn(serve(
            listener,
            snapshot,
            CoreHandle::new(event_tx),
            broadcast_tx.clone(),
        ));
        (addr, broadcast_tx)
    }

    #[tokio::test]
    async fn test_hello_then_reply_with_request_id() {
        let (addr, _bcast) = server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        match read_message(&mut stream).await {
            Message::Broadcast(Broadcast::Hello { protocol_version, .. }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION)
            }
            other => panic!("expected hello, got {other:?}"),
        }

        let request = Message::Request(Request {
            request_id: 42,
            command: Command::GetState,
        });
        stream.write_all(&request.encode().unwrap()).await.unwrap();

        match read_message(&mut stream).await {
            Message::Broadcast(Broadcast::Reply { request_id, response }) => {
                assert_eq!(request_id, 42);
                assert_eq!(response, Response::Ok);
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcasts_reach_clients() {
        let (addr, bcast) = server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _hello = read_message(&mut stream).await;

        bcast
            .send(BroadcastMessage::Window(WindowAction::ShowMiniPlayer))
            .unwrap();
        match read_message(&mut stream).await {
            Message::Broadcast(Broadcast::Window { action }) => {
                assert_eq!(action, WindowAction::ShowMiniPlayer)
            }
            other => panic!("expected window relay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_frame_is_skipped() {
        let (addr, _bcast) = server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _hello = read_message(&mut stream).await;

        let junk = b"{not json";
        let mut frame = (junk.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(junk);
        stream.write_all(&frame).await.unwrap();

        let request = Message::Request(Request {
            request_id: 1,
            command: Command::Next,
        });
        stream.write_all(&request.encode().unwrap()).await.unwrap();
        assert!(matches!(
            read_message(&mut stream).await,
            Message::Broadcast(Broadcast::Reply { request_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_pipelined_requests_reach_core_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(evt) = event_rx.recv().await {
                if let DaemonEvent::Request { command, reply } = evt {
                    let _ = seen_tx.send(command);
                    let _ = reply.send(Response::Ok);
                }
            }
        });
        let (broadcast_tx, _) = broadcast::channel(16);
        let snapshot = Arc::new(RwLock::new(PlayerSnapshot::default()));
        tokio::spawn(serve(listener, snapshot, CoreHandle::new(event_tx), broadcast_tx));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _hello = read_message(&mut stream).await;

        let mut batch = Vec::new();
        for i in 0..32u64 {
            let request = Message::Request(Request {
                request_id: i,
                command: Command::SeekTo { seconds: i as f64 },
            });
            batch.extend(request.encode().unwrap());
        }
        stream.write_all(&batch).await.unwrap();

        for i in 0..32u64 {
            assert_eq!(
                seen_rx.recv().await,
                Some(Command::SeekTo { seconds: i as f64 })
            );
        }
    }

    #[test]
    fn test_undecodable_frame() {
        assert_eq!(undecodable_frame(&[0, 0]), None);
        assert_eq!(undecodable_frame(&[0, 0, 0, 3, b'x']), None);
        assert_eq!(undecodable_frame(&[0, 0, 0, 1, b'x', b'y']), Some(5));
    }
}
