//! WebSocket Transport
//!
//! Wraps a tokio-tungstenite stream as a packet transport. Outbound packets
//! are encoded into single binary messages; inbound binary messages are
//! buffered until the decoder has a complete packet.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::trace;

use super::TransportError;
use crate::codec::{Decoder, Encoder};
use crate::protocol::Packet;

/// WebSocket subprotocol offered and accepted for MQTT
pub const MQTT_SUBPROTOCOL: &str = "mqtt";

const SUBPROTOCOL_HEADER: &str = "sec-websocket-protocol";

/// Write half of a packet transport
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    encoder: Encoder,
    buf: BytesMut,
}

/// Read half of a packet transport
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    decoder: Decoder,
    read_buffer: BytesMut,
    closed: bool,
}

/// Packet transport over a WebSocket stream
pub struct WsTransport<S> {
    writer: WsWriter<S>,
    reader: WsReader<S>,
}

impl WsTransport<MaybeTlsStream<TcpStream>> {
    /// Open a client connection offering the `mqtt` subprotocol
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        if url.starts_with("wss://") {
            install_crypto_provider();
        }

        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        request.headers_mut().insert(
            SUBPROTOCOL_HEADER,
            HeaderValue::from_static(MQTT_SUBPROTOCOL),
        );

        let (ws, response) = timeout(connect_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout)??;
        trace!("WebSocket handshake completed: {}", response.status());

        Ok(Self::new(ws))
    }
}

/// Make ring the process-wide rustls provider unless one is installed
fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Losing a race to another installer is fine
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

impl WsTransport<TcpStream> {
    /// Accept a server-side connection on `/mqtt`
    pub async fn accept(stream: TcpStream) -> Result<Self, TransportError> {
        Self::accept_with_path(stream, "/mqtt").await
    }

    /// Accept a server-side connection, checking the request path and
    /// echoing the MQTT subprotocol when the client offers it
    pub async fn accept_with_path(
        stream: TcpStream,
        expected_path: &str,
    ) -> Result<Self, TransportError> {
        let expected_path = expected_path.to_string();

        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            move |req: &Request, mut response: Response| {
                let request_path = req.uri().path();
                if request_path != expected_path {
                    return Err(ErrorResponse::new(Some(format!(
                        "Invalid path: expected '{}', got '{}'",
                        expected_path, request_path
                    ))));
                }

                let offers_mqtt = req
                    .headers()
                    .get(SUBPROTOCOL_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(',').any(|p| p.trim() == MQTT_SUBPROTOCOL))
                    .unwrap_or(false);
                if offers_mqtt {
                    response.headers_mut().insert(
                        SUBPROTOCOL_HEADER,
                        HeaderValue::from_static(MQTT_SUBPROTOCOL),
                    );
                }
                Ok(response)
            },
        )
        .await?;

        Ok(Self::new(ws))
    }
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            writer: WsWriter {
                sink,
                encoder: Encoder::new(),
                buf: BytesMut::with_capacity(256),
            },
            reader: WsReader {
                stream,
                decoder: Decoder::new(),
                read_buffer: BytesMut::with_capacity(2048),
                closed: false,
            },
        }
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.writer.send(packet).await
    }

    pub async fn recv(&mut self) -> Result<Option<Packet>, TransportError> {
        self.reader.recv().await
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.close().await
    }

    /// Split into independently owned halves
    pub fn into_split(self) -> (WsReader<S>, WsWriter<S>) {
        (self.reader, self.writer)
    }
}

impl<S> WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Encode and send one packet as a single binary message
    pub async fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.buf.clear();
        self.encoder.encode(packet, &mut self.buf)?;
        self.sink.send(Message::Binary(self.buf.to_vec())).await?;
        Ok(())
    }

    /// Send a close frame and flush
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await?;
        Ok(())
    }
}

impl<S> WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Receive the next packet; `Ok(None)` once the peer has closed
    ///
    /// Cancel safe: partially received data stays buffered in the reader.
    pub async fn recv(&mut self) -> Result<Option<Packet>, TransportError> {
        loop {
            if let Some((packet, used)) = self.decode_buffered()? {
                self.read_buffer.advance(used);
                return Ok(Some(packet));
            }

            if self.closed {
                return Ok(None);
            }

            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => self.read_buffer.extend_from_slice(&data),
                Some(Ok(Message::Close(_))) | None => self.closed = true,
                // Control frames are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn decode_buffered(&self) -> Result<Option<(Packet, usize)>, TransportError> {
        Ok(self.decoder.decode(&self.read_buffer)?)
    }
}
