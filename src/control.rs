//! Identity rotation over the Tor control port.
//!
//! Only the handful of commands needed to request a new identity are spoken
//! here: `PROTOCOLINFO`, `AUTHENTICATE`, `SIGNAL NEWNYM` and `QUIT`.

use crate::config::{ControlAuth, HandlerConfig};
use crate::error::RotationError;

use async_trait::async_trait;
use log::{debug, info};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;

/// Something that can give the proxied client a fresh network identity.
#[async_trait]
pub trait CircuitController: Send + Sync {
    /// Request a new identity. Does not retry on failure.
    async fn rotate(&self) -> Result<(), RotationError>;
}

/// Rotates identity by sending `SIGNAL NEWNYM` to a Tor control port.
///
/// Each call opens, uses and closes its own connection.
#[derive(Debug, Clone)]
pub struct TorController {
    addr: String,
    auth: ControlAuth,
    timeout: Duration,
}

impl TorController {
    /// Create a controller for the control port at `addr`.
    pub fn new(addr: impl Into<String>, auth: ControlAuth, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            auth,
            timeout,
        }
    }

    /// Create a controller from the handler configuration.
    pub fn from_config(config: &HandlerConfig) -> Self {
        Self::new(config.control_addr(), config.control_auth.clone(), config.control_timeout)
    }

    async fn new_identity(&self) -> Result<(), RotationError> {
        let mut conn = ControlConnection::connect(&self.addr).await?;
        conn.authenticate(&self.auth).await?;
        conn.signal_new_identity().await?;
        conn.close().await;
        Ok(())
    }
}

#[async_trait]
impl CircuitController for TorController {
    async fn rotate(&self) -> Result<(), RotationError> {
        debug!("Requesting new identity from control port {}", self.addr);
        time::timeout(self.timeout, self.new_identity())
            .await
            .map_err(|_| RotationError::Timeout(self.timeout))??;
        info!("Tor identity rotated via {}", self.addr);
        Ok(())
    }
}

/// A single reply from the control port.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    status: u16,
    lines: Vec<String>,
}

impl Reply {
    fn is_ok(&self) -> bool {
        self.status == 250
    }

    fn message(&self) -> String {
        format!("{} {}", self.status, self.lines.join("; "))
    }
}

/// Authentication methods advertised in a `PROTOCOLINFO` reply.
#[derive(Debug, Default, PartialEq, Eq)]
struct ProtocolInfo {
    methods: Vec<String>,
    cookie_file: Option<PathBuf>,
}

impl ProtocolInfo {
    fn parse(reply: &Reply) -> Self {
        let mut info = ProtocolInfo::default();

        for line in &reply.lines {
            let Some(rest) = line.strip_prefix("AUTH ") else {
                continue;
            };
            if let Some(methods) = rest.strip_prefix("METHODS=") {
                let methods = methods.split(' ').next().unwrap_or_default();
                info.methods = methods.split(',').map(str::to_string).collect();
            }
            if let Some(idx) = rest.find("COOKIEFILE=\"") {
                let quoted = &rest[idx + "COOKIEFILE=".len()..];
                info.cookie_file = unquote(quoted).map(PathBuf::from);
            }
        }

        info
    }

    fn offers(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Read a `"..."` quoted string with backslash escapes from the start of `s`.
fn unquote(s: &str) -> Option<String> {
    let mut chars = s.strip_prefix('"')?.chars();
    let mut out = String::new();
    loop {
        match chars.next()? {
            '"' => return Some(out),
            '\\' => out.push(chars.next()?),
            c => out.push(c),
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// An open control-port connection.
pub struct ControlConnection<S> {
    stream: BufReader<S>,
}

impl ControlConnection<TcpStream> {
    /// Open a TCP connection to the control port.
    pub async fn connect(addr: &str) -> Result<Self, RotationError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RotationError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self::new(stream))
    }
}

impl<S> ControlConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Authenticate with the given mechanism.
    pub async fn authenticate(&mut self, auth: &ControlAuth) -> Result<(), RotationError> {
        let command = match auth {
            ControlAuth::None => "AUTHENTICATE".to_string(),
            ControlAuth::Password(password) => format!("AUTHENTICATE {}", quote(password)),
            ControlAuth::Cookie(path) => self.cookie_command(path).await?,
            ControlAuth::Auto => self.negotiate().await?,
        };

        let reply = self.command(&command).await?;
        if !reply.is_ok() {
            return Err(RotationError::Authenticate(reply.message()));
        }
        Ok(())
    }

    /// Send `SIGNAL NEWNYM`.
    pub async fn signal_new_identity(&mut self) -> Result<(), RotationError> {
        let reply = self.command("SIGNAL NEWNYM").await?;
        if !reply.is_ok() {
            return Err(RotationError::Signal(reply.message()));
        }
        Ok(())
    }

    /// Say goodbye and drop the connection. Errors are ignored.
    pub async fn close(mut self) {
        if let Err(e) = self.command("QUIT").await {
            debug!("Control port QUIT failed: {}", e);
        }
        let _ = self.stream.get_mut().shutdown().await;
    }

    /// Pick an authentication command from the methods the server offers.
    async fn negotiate(&mut self) -> Result<String, RotationError> {
        let reply = self.command("PROTOCOLINFO 1").await?;
        if !reply.is_ok() {
            return Err(RotationError::Authenticate(reply.message()));
        }

        let info = ProtocolInfo::parse(&reply);
        debug!("Control port offers auth methods {:?}", info.methods);

        if info.offers("NULL") {
            return Ok("AUTHENTICATE".to_string());
        }
        if info.offers("COOKIE") {
            if let Some(path) = &info.cookie_file {
                return self.cookie_command(path).await;
            }
        }
        Err(RotationError::Authenticate(format!(
            "no usable auth method among {:?}, configure a password",
            info.methods
        )))
    }

    async fn cookie_command(&self, path: &Path) -> Result<String, RotationError> {
        let cookie = tokio::fs::read(path).await.map_err(|e| {
            RotationError::Authenticate(format!("cannot read cookie {}: {}", path.display(), e))
        })?;
        Ok(format!("AUTHENTICATE {}", to_hex(&cookie)))
    }

    async fn command(&mut self, line: &str) -> Result<Reply, RotationError> {
        self.stream.write_all(format!("{}\r\n", line).as_bytes()).await?;
        self.stream.flush().await?;
        Ok(self.read_reply().await?)
    }

    async fn read_reply(&mut self) -> io::Result<Reply> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?;
            if line.len() < 4 || !line.is_char_boundary(3) {
                return Err(malformed(&line));
            }
            let status: u16 = line[..3].parse().map_err(|_| malformed(&line))?;
            let sep = line.as_bytes()[3];
            if !matches!(sep, b' ' | b'-' | b'+') {
                return Err(malformed(&line));
            }
            lines.push(line[4..].to_string());

            match sep {
                b' ' => return Ok(Reply { status, lines }),
                b'+' => loop {
                    let data = self.read_line().await?;
                    if data == "." {
                        break;
                    }
                    lines.push(data);
                },
                _ => {}
            }
        }
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "control port closed the connection",
            ));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }
}

fn malformed(line: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed reply line {:?}", line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn password_auth_then_newnym() {
        let mock = Builder::new()
            .write(b"AUTHENTICATE \"s3\\\"cret\"\r\n")
            .read(b"250 OK\r\n")
            .write(b"SIGNAL NEWNYM\r\n")
            .read(b"250 OK\r\n")
            .write(b"QUIT\r\n")
            .read(b"250 closing connection\r\n")
            .build();

        let mut conn = ControlConnection::new(mock);
        conn.authenticate(&ControlAuth::Password("s3\"cret".into()))
            .await
            .unwrap();
        conn.signal_new_identity().await.unwrap();
        conn.close().await;
    }

    #[tokio::test]
    async fn rejected_password_is_an_auth_error() {
        let mock = Builder::new()
            .write(b"AUTHENTICATE \"wrong\"\r\n")
            .read(b"515 Authentication failed: Password did not match HashedControlPassword value from configuration\r\n")
            .build();

        let mut conn = ControlConnection::new(mock);
        let err = conn
            .authenticate(&ControlAuth::Password("wrong".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::Authenticate(ref m) if m.starts_with("515")));
    }

    #[tokio::test]
    async fn rejected_signal_is_a_signal_error() {
        let mock = Builder::new()
            .write(b"AUTHENTICATE\r\n")
            .read(b"250 OK\r\n")
            .write(b"SIGNAL NEWNYM\r\n")
            .read(b"514 Authentication required.\r\n")
            .build();

        let mut conn = ControlConnection::new(mock);
        conn.authenticate(&ControlAuth::None).await.unwrap();
        let err = conn.signal_new_identity().await.unwrap_err();
        assert!(matches!(err, RotationError::Signal(_)));
    }

    #[tokio::test]
    async fn auto_auth_uses_null_when_offered() {
        let mock = Builder::new()
            .write(b"PROTOCOLINFO 1\r\n")
            .read(b"250-PROTOCOLINFO 1\r\n250-AUTH METHODS=NULL\r\n250-VERSION Tor=\"0.4.8.9\"\r\n250 OK\r\n")
            .write(b"AUTHENTICATE\r\n")
            .read(b"250 OK\r\n")
            .build();

        let mut conn = ControlConnection::new(mock);
        conn.authenticate(&ControlAuth::Auto).await.unwrap();
    }

    #[tokio::test]
    async fn auto_auth_reads_advertised_cookie() {
        let dir = std::env::temp_dir().join(format!("tor-cookie-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cookie = dir.join("control_auth_cookie");
        std::fs::write(&cookie, [0xde, 0xad, 0xbe, 0xef]).unwrap();

        let protocolinfo = format!(
            "250-PROTOCOLINFO 1\r\n250-AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE=\"{}\"\r\n250 OK\r\n",
            cookie.display()
        );
        let mock = Builder::new()
            .write(b"PROTOCOLINFO 1\r\n")
            .read(protocolinfo.as_bytes())
            .write(b"AUTHENTICATE DEADBEEF\r\n")
            .read(b"250 OK\r\n")
            .build();

        let mut conn = ControlConnection::new(mock);
        conn.authenticate(&ControlAuth::Auto).await.unwrap();

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn auto_auth_without_usable_method_fails() {
        let mock = Builder::new()
            .write(b"PROTOCOLINFO 1\r\n")
            .read(b"250-PROTOCOLINFO 1\r\n250-AUTH METHODS=HASHEDPASSWORD\r\n250 OK\r\n")
            .build();

        let mut conn = ControlConnection::new(mock);
        let err = conn.authenticate(&ControlAuth::Auto).await.unwrap_err();
        assert!(matches!(err, RotationError::Authenticate(_)));
    }

    #[tokio::test]
    async fn truncated_reply_is_an_io_error() {
        let mock = Builder::new()
            .write(b"SIGNAL NEWNYM\r\n")
            .read(b"250-partial\r\n")
            .build();

        let mut conn = ControlConnection::new(mock);
        let err = conn.signal_new_identity().await.unwrap_err();
        assert!(matches!(err, RotationError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn unreachable_control_port_is_a_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let controller = TorController::new(addr, ControlAuth::None, Duration::from_secs(2));
        let err = controller.rotate().await.unwrap_err();
        assert!(matches!(err, RotationError::Connect { .. }));
    }

    #[tokio::test]
    async fn rotates_against_a_live_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut seen = String::new();
            for reply in ["250 OK\r\n", "250 OK\r\n", "250 closing connection\r\n"] {
                socket.read_line(&mut seen).await.unwrap();
                socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
            seen
        });

        let controller = TorController::new(addr, ControlAuth::None, Duration::from_secs(2));
        controller.rotate().await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(seen, "AUTHENTICATE\r\nSIGNAL NEWNYM\r\nQUIT\r\n");
    }

    #[test]
    fn parses_protocolinfo() {
        let reply = Reply {
            status: 250,
            lines: vec![
                "PROTOCOLINFO 1".into(),
                r#"AUTH METHODS=COOKIE,SAFECOOKIE,HASHEDPASSWORD COOKIEFILE="/run/tor/control.authcookie""#.into(),
                "OK".into(),
            ],
        };
        let info = ProtocolInfo::parse(&reply);
        assert_eq!(info.methods, vec!["COOKIE", "SAFECOOKIE", "HASHEDPASSWORD"]);
        assert_eq!(info.cookie_file, Some(PathBuf::from("/run/tor/control.authcookie")));
        assert!(info.offers("COOKIE"));
        assert!(!info.offers("NULL"));
    }

    #[test]
    fn quoting_round_trips() {
        let quoted = quote(r#"a"b\c"#);
        assert_eq!(quoted, r#""a\"b\\c""#);
        assert_eq!(unquote(&quoted).as_deref(), Some(r#"a"b\c"#));
    }
}
