use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::network::framing::{read_frame, write_frame};
use crate::protocol::{ClientRequest, OccupantId};
use crate::room::service::RoomService;
use crate::room::{RoomCommand, RoomHandle};

/// Bind the listener and serve sessions until the process stops. Each
/// connection gets an independent task; nothing here holds a cross-client
/// lock while waiting on socket I/O.
pub async fn run(bind_addr: &str, service: Arc<RoomService>) {
    let listener = match TcpListener::bind(bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {}: {}", bind_addr, e);
            return;
        }
    };
    info!("listening on {}", bind_addr);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("accept error: {}", e);
                continue;
            }
        };
        info!("connection from {}", addr);
        let service = service.clone();
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            handle_session(reader, writer, service).await;
            info!("connection from {} closed", addr);
        });
    }
}

/// One client session: a handshake (`LOGIN <name>`, then `GOTO <model>`),
/// after which every frame is parsed into a `ClientRequest` and forwarded
/// to the current room. A writer task drains the session's outbound
/// channel, the same channel the room broadcast delivers into.
pub async fn handle_session<R, W>(mut reader: R, mut writer: W, service: Arc<RoomService>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &line).await {
                debug!("write failed, dropping session writer: {}", e);
                break;
            }
        }
    });

    let mut name: Option<String> = None;
    let mut room: Option<(RoomHandle, OccupantId)> = None;

    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!("read error: {}", e);
                break;
            }
        };

        let mut parts = frame.splitn(2, ' ');
        let code = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match code {
            "LOGIN" => {
                if rest.is_empty() || name.is_some() {
                    continue;
                }
                name = Some(rest.to_string());
                let _ = out_tx.send("HELLO".to_string());
            }
            "GOTO" => {
                let Some(user) = name.as_deref() else {
                    continue;
                };
                if let Some((handle, id)) = room.take() {
                    handle.send(RoomCommand::Leave { id });
                }
                match enter_room(&service, rest, user, &out_tx).await {
                    Ok(entered) => {
                        let _ = out_tx.send(format!("ROOM {} {}", rest, entered.1));
                        room = Some(entered);
                    }
                    Err(e) => {
                        debug!("entry to '{}' refused: {}", rest, e);
                        let _ = out_tx.send(format!("DENIED {}", rest));
                    }
                }
            }
            _ => {
                let Some((handle, id)) = &room else {
                    continue;
                };
                match ClientRequest::parse(&frame) {
                    Some(request) => {
                        handle.send(RoomCommand::Request { id: *id, request });
                    }
                    // Stale or garbled client packets are expected noise.
                    None => debug!("unparsed frame: {:?}", frame),
                }
            }
        }
    }

    if let Some((handle, id)) = room {
        handle.send(RoomCommand::Leave { id });
    }
}

/// Enter a room, retrying once if the room task evicted itself between
/// the handle lookup and the Enter command.
async fn enter_room(
    service: &RoomService,
    model: &str,
    name: &str,
    out_tx: &mpsc::UnboundedSender<String>,
) -> Result<(RoomHandle, OccupantId), String> {
    for _ in 0..2 {
        let handle = service.get_or_spawn(model).await?;
        if let Some(id) = handle.enter(name, out_tx.clone()).await {
            return Ok((handle, id));
        }
    }
    Err("room shut down while entering".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomConfig;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    async fn next_frame(reader: &mut (impl tokio::io::AsyncRead + Unpin)) -> String {
        timeout(Duration::from_millis(500), read_frame(reader))
            .await
            .expect("frame within the deadline")
            .expect("stream healthy")
            .expect("stream open")
    }

    #[tokio::test]
    async fn session_handshake_enter_and_move() {
        let service = Arc::new(RoomService::new(RoomConfig {
            tick_interval: Duration::from_millis(20),
            ..RoomConfig::default()
        }));

        let (client_to_server, server_read) = tokio::io::duplex(4096);
        let (server_write, client_from_server) = tokio::io::duplex(4096);
        tokio::spawn(handle_session(server_read, server_write, service));

        let mut tx = client_to_server;
        let mut rx = client_from_server;

        write_frame(&mut tx, "LOGIN astrid").await.unwrap();
        assert_eq!(next_frame(&mut rx).await, "HELLO");

        // The entry broadcast and the ROOM ack come from different tasks,
        // so their order is not fixed.
        write_frame(&mut tx, "GOTO lobby_a").await.unwrap();
        let mut stashed = Vec::new();
        let ack = loop {
            let frame = next_frame(&mut rx).await;
            if frame.starts_with("ROOM lobby_a ") {
                break frame;
            }
            stashed.push(frame);
        };
        let id: OccupantId = ack.rsplit(' ').next().unwrap().parse().unwrap();
        if stashed.is_empty() {
            stashed.push(next_frame(&mut rx).await);
        }
        assert!(stashed[0].starts_with(&format!("{} 0,0,", id)));

        write_frame(&mut tx, "MOVE 0 2").await.unwrap();
        assert_eq!(next_frame(&mut rx).await, format!("{} 0,1,0.0,4,4/", id));
        assert_eq!(next_frame(&mut rx).await, format!("{} 0,2,0.0,4,4/", id));
    }

    #[tokio::test]
    async fn unknown_room_is_denied() {
        let service = Arc::new(RoomService::new(RoomConfig::default()));
        let (client_to_server, server_read) = tokio::io::duplex(4096);
        let (server_write, client_from_server) = tokio::io::duplex(4096);
        tokio::spawn(handle_session(server_read, server_write, service));

        let mut tx = client_to_server;
        let mut rx = client_from_server;
        write_frame(&mut tx, "LOGIN astrid").await.unwrap();
        assert_eq!(next_frame(&mut rx).await, "HELLO");
        write_frame(&mut tx, "GOTO atlantis").await.unwrap();
        assert_eq!(next_frame(&mut rx).await, "DENIED atlantis");
    }

    #[tokio::test]
    async fn disconnect_leaves_the_room() {
        let service = Arc::new(RoomService::new(RoomConfig::default()));
        let (client_to_server, server_read) = tokio::io::duplex(4096);
        let (server_write, client_from_server) = tokio::io::duplex(4096);
        tokio::spawn(handle_session(server_read, server_write, service.clone()));

        let mut tx = client_to_server;
        let mut rx = client_from_server;
        write_frame(&mut tx, "LOGIN astrid").await.unwrap();
        let _hello = next_frame(&mut rx).await;
        write_frame(&mut tx, "GOTO lobby_a").await.unwrap();
        let _ack = next_frame(&mut rx).await;

        let handle = service.get_or_spawn("lobby_a").await.unwrap();
        tx.shutdown().await.unwrap();
        drop(tx);
        drop(rx);

        // The session's Leave empties the room, which then evicts itself.
        for _ in 0..50 {
            if handle.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("room still live after its only session disconnected");
    }
}
