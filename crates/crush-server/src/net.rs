//! Listener abstraction over the three local transports: TCP, Unix domain
//! sockets, and Windows named pipes. The dialing side lives in the client
//! crate; both agree on [`Scheme`] from the shared crate.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::{Context as _, Result};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crush_shared::host::Scheme;

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(windows)]
use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

pub enum LocalListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
    #[cfg(windows)]
    Pipe { server: Option<NamedPipeServer>, address: String },
}

impl LocalListener {
    /// Binds the listener for `scheme://address`. A stale Unix socket file
    /// left by a dead server is removed before binding.
    pub async fn bind(scheme: Scheme, address: &str) -> Result<Self> {
        match scheme {
            Scheme::Tcp => {
                let listener = TcpListener::bind(address)
                    .await
                    .with_context(|| format!("failed to listen on tcp://{address}"))?;
                Ok(Self::Tcp(listener))
            }
            Scheme::Unix => {
                #[cfg(unix)]
                {
                    let path = PathBuf::from(address);
                    if path.exists() {
                        debug!(path = %path.display(), "removing stale socket file");
                        let _ = std::fs::remove_file(&path);
                    }
                    let listener = UnixListener::bind(&path)
                        .with_context(|| format!("failed to listen on unix://{address}"))?;
                    Ok(Self::Unix { listener, path })
                }
                #[cfg(not(unix))]
                {
                    anyhow::bail!("unix sockets are not supported on this platform")
                }
            }
            Scheme::Npipe => {
                #[cfg(windows)]
                {
                    let server = ServerOptions::new()
                        .first_pipe_instance(true)
                        .create(address)
                        .with_context(|| format!("failed to listen on npipe://{address}"))?;
                    Ok(Self::Pipe {
                        server: Some(server),
                        address: address.to_string(),
                    })
                }
                #[cfg(not(windows))]
                {
                    anyhow::bail!("named pipes are only supported on Windows")
                }
            }
        }
    }

    pub fn local_addr(&self) -> String {
        match self {
            Self::Tcp(listener) => listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            #[cfg(unix)]
            Self::Unix { path, .. } => path.display().to_string(),
            #[cfg(windows)]
            Self::Pipe { address, .. } => address.clone(),
        }
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Self::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl axum::serve::Listener for LocalListener {
    type Io = LocalIo;
    type Addr = String;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.try_accept().await {
                Ok(pair) => return pair,
                Err(e) => {
                    debug!(error = %e, "accept failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(LocalListener::local_addr(self))
    }
}

impl LocalListener {
    async fn try_accept(&mut self) -> Result<(LocalIo, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((LocalIo::Tcp(stream), addr.to_string()))
            }
            #[cfg(unix)]
            Self::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((LocalIo::Unix(stream), path.display().to_string()))
            }
            #[cfg(windows)]
            Self::Pipe { server, address } => {
                let connected = server
                    .take()
                    .expect("pipe server instance must exist");
                connected.connect().await?;
                // Queue the next instance before handing this one out.
                *server = Some(ServerOptions::new().create(address.as_str())?);
                Ok((LocalIo::Pipe(connected), address.clone()))
            }
        }
    }
}

pub enum LocalIo {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    #[cfg(windows)]
    Pipe(NamedPipeServer),
}

impl AsyncRead for LocalIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(windows)]
            Self::Pipe(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LocalIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(windows)]
            Self::Pipe(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
            #[cfg(windows)]
            Self::Pipe(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(windows)]
            Self::Pipe(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_tcp_on_ephemeral_port() {
        let listener = LocalListener::bind(Scheme::Tcp, "127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        assert!(addr.starts_with("127.0.0.1:"));
        assert_ne!(addr, "127.0.0.1:0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_replaces_stale_socket_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crush-test.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = LocalListener::bind(Scheme::Unix, path.to_str().unwrap())
            .await
            .unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists(), "socket file removed on drop");
    }
}
