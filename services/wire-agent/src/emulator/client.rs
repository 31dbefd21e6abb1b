//! Emulator control client.
//!
//! One long-lived connection. The transport has no request ids, so a request
//! and its reply must never interleave with another caller's: every exchange
//! holds the connection mutex from the first byte written until the final
//! reply line is read.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::protocol::{is_success, parse_line, request_line, ControlProtocolError, Reply, ReplyLine};
use super::EmulatorControl;

/// Byte stream the client can talk over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

struct Connection {
    stream: BufReader<Box<dyn Transport>>,
    /// Set once an exchange failed part way; replies can no longer be matched
    /// to requests.
    broken: bool,
}

/// Client for the emulator control port.
pub struct EmulatorClient {
    conn: Mutex<Connection>,
    timeout: Duration,
}

impl EmulatorClient {
    /// Connect to the emulator at `host:port`.
    pub async fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, ControlProtocolError> {
        let addr = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ControlProtocolError::Timeout(format!("connect {}", addr)))??;
        stream.set_nodelay(true)?;

        info!(%addr, "connected to emulator");
        Ok(Self::from_stream(stream, timeout))
    }

    /// Wrap an already established stream.
    pub fn from_stream<T: Transport + 'static>(stream: T, timeout: Duration) -> Self {
        Self {
            conn: Mutex::new(Connection {
                stream: BufReader::new(Box::new(stream)),
                broken: false,
            }),
            timeout,
        }
    }

    /// Send one request and wait for its complete reply.
    ///
    /// A reply with a non-success code is returned as
    /// [`ControlProtocolError::Rejected`].
    pub async fn send(
        &self,
        module: &str,
        command: &str,
        args: &[String],
    ) -> Result<Reply, ControlProtocolError> {
        let request = request_line(module, command, args);
        let mut conn = self.conn.lock().await;
        if conn.broken {
            return Err(ControlProtocolError::Disconnected);
        }

        trace!(request = %request.trim_end(), "control request");
        // Stays set unless a whole reply is read, so a caller that abandons
        // this future mid-exchange leaves the stream unusable.
        conn.broken = true;
        let exchanged = exchange(&mut conn.stream, &request);
        let reply = match tokio::time::timeout(self.timeout, exchanged).await {
            Ok(Ok(reply)) => {
                conn.broken = false;
                reply
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(
                    request = %request.trim_end(),
                    timeout = ?self.timeout,
                    "control exchange timed out"
                );
                return Err(ControlProtocolError::Timeout(request.trim_end().to_string()));
            }
        };
        drop(conn);

        debug!(
            request = %request.trim_end(),
            code = reply.code,
            message = %reply.message(),
            "control reply"
        );
        if is_success(reply.code) {
            Ok(reply)
        } else {
            Err(ControlProtocolError::Rejected {
                code: reply.code,
                message: reply.message().to_string(),
            })
        }
    }

    async fn vm(&self, command: &str, args: Vec<String>) -> Result<(), ControlProtocolError> {
        self.send("vm", command, &args).await.map(|_| ())
    }

    async fn nio(&self, command: &str, args: Vec<String>) -> Result<(), ControlProtocolError> {
        self.send("nio", command, &args).await.map(|_| ())
    }
}

/// Write `request` and read lines up to the final one.
async fn exchange(
    stream: &mut BufReader<Box<dyn Transport>>,
    request: &str,
) -> Result<Reply, ControlProtocolError> {
    stream.get_mut().write_all(request.as_bytes()).await?;
    stream.get_mut().flush().await?;

    let mut lines = Vec::new();
    let mut buf = String::new();
    loop {
        buf.clear();
        if stream.read_line(&mut buf).await? == 0 {
            return Err(ControlProtocolError::Disconnected);
        }
        match parse_line(buf.trim_end_matches(['\r', '\n']))? {
            ReplyLine::Continuation(_, text) => lines.push(text),
            ReplyLine::Final(code, text) => {
                lines.push(text);
                return Ok(Reply { code, lines });
            }
        }
    }
}

#[async_trait]
impl EmulatorControl for EmulatorClient {
    async fn create_device(
        &self,
        name: &str,
        emulator_id: u32,
        platform: &str,
    ) -> Result<(), ControlProtocolError> {
        self.vm("create", vec![name.into(), emulator_id.to_string(), platform.into()])
            .await
    }

    async fn delete_device(&self, name: &str) -> Result<(), ControlProtocolError> {
        self.vm("delete", vec![name.into()]).await
    }

    async fn set_ram(&self, name: &str, ram_mb: u32) -> Result<(), ControlProtocolError> {
        self.vm("set_ram", vec![name.into(), ram_mb.to_string()]).await
    }

    async fn set_console_port(&self, name: &str, port: u16) -> Result<(), ControlProtocolError> {
        self.vm("set_con_tcp_port", vec![name.into(), port.to_string()])
            .await
    }

    async fn start_device(&self, name: &str) -> Result<(), ControlProtocolError> {
        self.vm("start", vec![name.into()]).await
    }

    async fn stop_device(&self, name: &str) -> Result<(), ControlProtocolError> {
        self.vm("stop", vec![name.into()]).await
    }

    async fn add_adapter(
        &self,
        name: &str,
        slot: u8,
        model: &str,
    ) -> Result<(), ControlProtocolError> {
        self.vm(
            "slot_add_binding",
            vec![name.into(), slot.to_string(), "0".into(), model.into()],
        )
        .await
    }

    async fn remove_adapter(&self, name: &str, slot: u8) -> Result<(), ControlProtocolError> {
        self.vm(
            "slot_remove_binding",
            vec![name.into(), slot.to_string(), "0".into()],
        )
        .await
    }

    async fn create_udp_tunnel(
        &self,
        tunnel: &str,
        local_port: u16,
        remote_address: Ipv4Addr,
        remote_port: u16,
    ) -> Result<(), ControlProtocolError> {
        self.nio(
            "create_udp",
            vec![
                tunnel.into(),
                local_port.to_string(),
                remote_address.to_string(),
                remote_port.to_string(),
            ],
        )
        .await
    }

    async fn delete_tunnel(&self, tunnel: &str) -> Result<(), ControlProtocolError> {
        self.nio("delete", vec![tunnel.into()]).await
    }

    async fn bind_tunnel(
        &self,
        name: &str,
        slot: u8,
        port: u8,
        tunnel: &str,
    ) -> Result<(), ControlProtocolError> {
        self.vm(
            "slot_add_nio_binding",
            vec![name.into(), slot.to_string(), port.to_string(), tunnel.into()],
        )
        .await
    }

    async fn unbind_tunnel(
        &self,
        name: &str,
        slot: u8,
        port: u8,
    ) -> Result<(), ControlProtocolError> {
        self.vm(
            "slot_remove_nio_binding",
            vec![name.into(), slot.to_string(), port.to_string()],
        )
        .await
    }
}
