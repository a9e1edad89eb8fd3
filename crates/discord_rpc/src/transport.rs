use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

const PORTS: std::ops::RangeInclusive<u16> = 6463..=6472;
const IPC_SLOTS: std::ops::RangeInclusive<u8> = 0..=9;

pub(crate) const OPCODE_HANDSHAKE: i32 = 0;
pub(crate) const OPCODE_FRAME: i32 = 1;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[cfg(unix)]
type IpcStream = tokio::net::UnixStream;
#[cfg(windows)]
type IpcStream = tokio::net::windows::named_pipe::NamedPipeClient;

pub(crate) enum Connection {
    Ipc(IpcStream),
    Ws(Ws),
}

impl Connection {
    pub(crate) async fn open(client_id: &str) -> Option<Self> {
        if let Some(ipc) = open_ipc(client_id).await {
            return Some(Connection::Ipc(ipc));
        }
        open_ws(client_id).await.map(Connection::Ws)
    }

    pub(crate) async fn request(&mut self, body: &serde_json::Value) -> Result<Vec<u8>> {
        match self {
            Connection::Ipc(ipc) => {
                write_frame(ipc, OPCODE_FRAME, body.to_string().as_bytes()).await?;
                let (_, raw) = read_frame(ipc).await?;
                Ok(raw)
            }
            Connection::Ws(ws) => {
                ws.send(Message::Text(body.to_string()))
                    .await
                    .context("failed sending discord ws message")?;
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => Ok(text.into_bytes()),
                    Some(Ok(Message::Binary(bin))) => Ok(bin),
                    Some(Ok(_)) => Ok(Vec::new()),
                    Some(Err(err)) => Err(anyhow!("discord ws receive failed: {err}")),
                    None => Err(anyhow!("discord ws closed")),
                }
            }
        }
    }
}

fn handshake(client_id: &str) -> String {
    json!({"v": 1, "client_id": client_id}).to_string()
}

async fn open_ws(client_id: &str) -> Option<Ws> {
    for port in PORTS {
        let url = Url::parse(&format!("ws://127.0.0.1:{port}/?v=1&client_id={client_id}")).ok()?;
        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                if ws.send(Message::Text(handshake(client_id))).await.is_err() {
                    continue;
                }
                if ws.next().await.is_some() {
                    debug!(port, "connected to discord rpc websocket");
                    return Some(ws);
                }
            }
            Err(err) => debug!(port, error = %err, "discord ws connect failed"),
        }
    }
    None
}

async fn open_ipc(client_id: &str) -> Option<IpcStream> {
    for slot in IPC_SLOTS {
        let Some(mut ipc) = connect_ipc_slot(slot).await else {
            continue;
        };
        if write_frame(&mut ipc, OPCODE_HANDSHAKE, handshake(client_id).as_bytes())
            .await
            .is_err()
        {
            continue;
        }
        if read_frame(&mut ipc).await.is_ok() {
            debug!(slot, "connected to discord ipc");
            return Some(ipc);
        }
    }
    None
}

#[cfg(unix)]
pub fn ipc_socket_paths(slot: u8) -> Vec<std::path::PathBuf> {
    use std::path::PathBuf;

    let name = format!("discord-ipc-{slot}");
    let mut paths: Vec<PathBuf> = ["TMPDIR", "XDG_RUNTIME_DIR"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|dir| PathBuf::from(dir).join(&name))
        .collect();
    paths.push(PathBuf::from("/tmp").join(&name));
    paths.push(PathBuf::from("/private/tmp").join(&name));
    paths
}

#[cfg(unix)]
async fn connect_ipc_slot(slot: u8) -> Option<IpcStream> {
    for path in ipc_socket_paths(slot) {
        if let Ok(stream) = tokio::net::UnixStream::connect(&path).await {
            return Some(stream);
        }
    }
    None
}

#[cfg(windows)]
async fn connect_ipc_slot(slot: u8) -> Option<IpcStream> {
    use tokio::net::windows::named_pipe::ClientOptions;
    ClientOptions::new()
        .open(format!(r"\\?\pipe\discord-ipc-{slot}"))
        .ok()
}

pub async fn endpoint_reachable() -> bool {
    #[cfg(unix)]
    {
        if IPC_SLOTS.clone().any(|slot| ipc_socket_paths(slot).iter().any(|p| p.exists())) {
            return true;
        }
    }

    for port in PORTS {
        let probe = tokio::time::timeout(
            Duration::from_millis(200),
            TcpStream::connect(("127.0.0.1", port)),
        )
        .await;
        if matches!(probe, Ok(Ok(_))) {
            return true;
        }
    }
    false
}

pub(crate) fn encode_frame(opcode: i32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub(crate) fn decode_header(hdr: [u8; 8]) -> Result<(i32, usize)> {
    let opcode = i32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
    let len = i32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
    let len = usize::try_from(len).map_err(|_| anyhow!("invalid discord ipc frame length"))?;
    Ok((opcode, len))
}

async fn write_frame<S>(stream: &mut S, opcode: i32, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&encode_frame(opcode, payload)).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<S>(stream: &mut S) -> Result<(i32, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut hdr = [0u8; 8];
    stream.read_exact(&mut hdr).await?;
    let (opcode, len) = decode_header(hdr)?;

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;

    if opcode != OPCODE_FRAME && opcode != OPCODE_HANDSHAKE {
        warn!(opcode, "discord ipc unexpected opcode");
    }
    Ok((opcode, payload))
}
