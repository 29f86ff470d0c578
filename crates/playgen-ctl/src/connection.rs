use playgen_proto::protocol::{Broadcast, Command, Message, Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub struct DaemonConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
    next_request_id: u64,
}

impl DaemonConnection {
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self {
            stream,
            read_buffer: Vec::with_capacity(4096),
            next_request_id: 1,
        })
    }

    pub async fn send_command(&mut self, command: Command) -> anyhow::Result<u64> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let encoded = Message::Request(Request { request_id, command }).encode()?;
        self.stream.write_all(&encoded).await?;
        Ok(request_id)
    }

    /// Next complete message, `None` once the daemon hangs up.
    pub async fn receive_message(&mut self) -> anyhow::Result<Option<Message>> {
        let mut buf = [0u8; 4096];
        loop {
            if self.read_buffer.len() >= 4 {
                if let Some(total) = frame_len(&self.read_buffer) {
                    let frame: Vec<u8> = self.read_buffer.drain(..total).collect();
                    match Message::decode(&frame) {
                        Ok((msg, _)) => return Ok(Some(msg)),
                        Err(e) => {
                            debug!("skipping undecodable frame: {}", e);
                            continue;
                        }
                    }
                }
            }

            match self.stream.read(&mut buf).await {
                Ok(0) => return Ok(None),
                Ok(n) => self.read_buffer.extend_from_slice(&buf[..n]),
                Err(e) => return Err(anyhow::anyhow!("Read error: {}", e)),
            }
        }
    }

    /// Send `command` and wait for its reply, passing every other message
    /// to `on_broadcast`.
    pub async fn request<F>(&mut self, command: Command, mut on_broadcast: F) -> anyhow::Result<Response>
    where
        F: FnMut(&Broadcast),
    {
        let id = self.send_command(command).await?;
        loop {
            match self.receive_message().await? {
                Some(Message::Broadcast(Broadcast::Reply {
                    request_id,
                    response,
                })) if request_id == id => return Ok(response),
                Some(Message::Broadcast(other)) => on_broadcast(&other),
                Some(Message::Request(_)) => {}
                None => anyhow::bail!("daemon closed the connection"),
            }
        }
    }
}

fn frame_len(buf: &[u8]) -> Option<usize> {
    let header: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    let total = 4 + u32::from_be_bytes(header) as usize;
    (buf.len() >= total).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use playgen_proto::player::PlayerSnapshot;
    use playgen_proto::protocol::PROTOCOL_VERSION;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_request_skips_broadcasts_until_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let hello = Message::Broadcast(Broadcast::Hello {
                protocol_version: PROTOCOL_VERSION,
                state: PlayerSnapshot::default(),
            });
            stream.write_all(&hello.encode().unwrap()).await.unwrap();

            let mut header = [0u8; 4];
            stream.read_exact(&mut header).await.unwrap();
            let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
            stream.read_exact(&mut body).await.unwrap();
            let request: Request = serde_json::from_slice(&body).unwrap();

            let log = Message::Broadcast(Broadcast::Log {
                message: "noise".into(),
            });
            let stale = Message::Broadcast(Broadcast::Reply {
                request_id: request.request_id + 100,
                response: Response::error("not yours"),
            });
            let reply = Message::Broadcast(Broadcast::Reply {
                request_id: request.request_id,
                response: Response::Ok,
            });
            for msg in [log, stale, reply] {
                stream.write_all(&msg.encode().unwrap()).await.unwrap();
            }
        });

        let mut conn = DaemonConnection::connect(&addr).await.unwrap();
        let mut seen = Vec::new();
        let response = conn
            .request(Command::Next, |b| seen.push(b.clone()))
            .await
            .unwrap();
        assert_eq!(response, Response::Ok);
        assert!(matches!(seen[0], Broadcast::Hello { .. }));
        assert!(matches!(seen[1], Broadcast::Log { .. }));
        assert_eq!(seen.len(), 3);
    }
}
