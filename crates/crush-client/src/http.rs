//! HTTP/1.1 transport over the three local schemes. One connection per
//! request is plenty for a local control surface; the SSE path keeps its
//! connection for the stream's lifetime.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::{bail, Context as _, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crush_shared::host::Scheme;
use crush_shared::instance::ApiError;

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};

/// Placeholder authority for non-TCP connections, which have no real host.
const DUMMY_HOST: &str = "api.crush.localhost";

pub(crate) struct Transport {
    scheme: Scheme,
    address: String,
}

impl Transport {
    pub fn new(scheme: Scheme, address: String) -> Self {
        Self { scheme, address }
    }

    pub fn host_header(&self) -> &str {
        match self.scheme {
            Scheme::Tcp => &self.address,
            _ => DUMMY_HOST,
        }
    }

    async fn dial(&self) -> io::Result<ClientStream> {
        match self.scheme {
            Scheme::Tcp => Ok(ClientStream::Tcp(TcpStream::connect(&self.address).await?)),
            Scheme::Unix => {
                #[cfg(unix)]
                {
                    Ok(ClientStream::Unix(UnixStream::connect(&self.address).await?))
                }
                #[cfg(not(unix))]
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are not supported on this platform",
                ))
            }
            Scheme::Npipe => {
                #[cfg(windows)]
                {
                    Ok(ClientStream::Pipe(ClientOptions::new().open(&self.address)?))
                }
                #[cfg(not(windows))]
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "named pipes are only supported on Windows",
                ))
            }
        }
    }

    /// Connects and sends one request, returning the raw response. The
    /// connection task lives until the response body is fully consumed.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response<Incoming>> {
        let stream = self
            .dial()
            .await
            .with_context(|| format!("failed to dial {}://{}", self.scheme, self.address))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .context("http handshake failed")?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "client connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(format!("/v1{path}"))
            .header(header::HOST, self.host_header());
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(serde_json::to_vec(&value)?))
            }
            None => Full::new(Bytes::new()),
        };

        let request = builder.body(body).context("failed to build request")?;
        let response = sender
            .send_request(request)
            .await
            .context("request failed")?;
        Ok(response)
    }

    /// Sends a request and collects the whole body, mapping non-2xx to the
    /// `{message}` error envelope.
    pub async fn roundtrip(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Bytes> {
        let response = self.send(method, path, body).await?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .context("failed to read response body")?
            .to_bytes();

        if !status.is_success() {
            bail!("{}", decode_error(status, &bytes));
        }
        Ok(bytes)
    }
}

fn decode_error(status: StatusCode, bytes: &Bytes) -> String {
    match serde_json::from_slice::<ApiError>(bytes) {
        Ok(err) if !err.message.is_empty() => err.message,
        _ => format!("server returned {status}"),
    }
}

pub(crate) enum ClientStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    #[cfg(windows)]
    Pipe(NamedPipeClient),
}

impl AsyncRead for ClientStream {
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

impl AsyncWrite for ClientStream {
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
