//! MQTT-over-WebSocket client
//!
//! `WsConnector::connect` performs the first handshake inline so the caller
//! sees its failure. Afterwards a background task owns the socket: it runs
//! the command/inbound/keep-alive loop and, when the connection drops,
//! reconnects with exponential backoff until the client is closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, info, warn};

use super::{
    BrokerClient, ClientError, ConnectOptions, ConnectionEvent, ConnectionState, Connector,
    InboundHandler, StateCell,
};
use crate::protocol::{
    Connect, Packet, ProtocolError, PubAck, Publish, QoS, Subscribe, Unsubscribe,
};
use crate::transport::{WsTransport, WsWriter};

type Stream = MaybeTlsStream<TcpStream>;
type Reply = oneshot::Sender<Result<(), ClientError>>;

/// Request sent to the session task
enum ClientCommand {
    Subscribe { filter: String, reply: Reply },
    Unsubscribe { filter: String, reply: Reply },
    Publish { topic: String, payload: Bytes, reply: Reply },
    Reconnect { reply: Reply },
    Close { reply: oneshot::Sender<()> },
}

/// Why a session ended
enum SessionEnd {
    Closed,
    Lost(String),
}

/// What happened while waiting out a backoff delay
enum Backoff {
    Elapsed,
    Reconnect(Reply),
    Closed,
}

/// Opens WebSocket sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        options: &ConnectOptions,
        inbound: InboundHandler,
    ) -> Result<Arc<dyn BrokerClient>, ClientError> {
        let client = WsClient::connect(options.clone(), inbound).await?;
        Ok(client)
    }
}

/// Handle to a WebSocket MQTT session
pub struct WsClient {
    options: ConnectOptions,
    state: Arc<StateCell>,
    command_tx: mpsc::Sender<ClientCommand>,
}

impl WsClient {
    /// Connect and start the session task
    pub async fn connect(
        options: ConnectOptions,
        inbound: InboundHandler,
    ) -> Result<Arc<Self>, ClientError> {
        let state = Arc::new(StateCell::new());

        state.apply(ConnectionEvent::ConnectStarted);
        let transport = match establish(&options).await {
            Ok(t) => t,
            Err(e) => {
                state.apply(ConnectionEvent::ConnectFailed);
                return Err(e);
            }
        };
        state.apply(ConnectionEvent::ConnAckReceived);
        info!("Connected to {} as '{}'", options.url, options.client_id);

        let (command_tx, command_rx) = mpsc::channel(256);
        tokio::spawn(connection_loop(
            options.clone(),
            state.clone(),
            command_rx,
            inbound,
            transport,
        ));

        Ok(Arc::new(Self {
            options,
            state,
            command_tx,
        }))
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    async fn request(
        &self,
        build: impl FnOnce(Reply) -> ClientCommand,
    ) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| ClientError::ChannelClosed)?;
        rx.await.map_err(|_| {
            ClientError::ConnectionLost("session ended before acknowledgement".to_string())
        })?
    }

    /// Like `request`, but only while connected and bounded by the
    /// acknowledgement timeout
    async fn connected_request(
        &self,
        build: impl FnOnce(Reply) -> ClientCommand,
    ) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        timeout(self.options.connect_timeout, self.request(build))
            .await
            .map_err(|_| ClientError::Timeout)?
    }
}

#[async_trait]
impl BrokerClient for WsClient {
    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        let filter = topic.to_string();
        self.connected_request(|reply| ClientCommand::Subscribe { filter, reply })
            .await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        let filter = topic.to_string();
        self.connected_request(|reply| ClientCommand::Unsubscribe { filter, reply })
            .await
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ClientError> {
        let topic = topic.to_string();
        self.connected_request(|reply| ClientCommand::Publish {
            topic,
            payload,
            reply,
        })
        .await
    }

    async fn reconnect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }
        self.request(|reply| ClientCommand::Reconnect { reply }).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(ClientCommand::Close { reply })
            .await
            .is_err()
        {
            // session task already finished
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

/// Open the socket, send CONNECT and wait for an accepting CONNACK
async fn establish(options: &ConnectOptions) -> Result<WsTransport<Stream>, ClientError> {
    debug!("Connecting to {}", options.url);
    let mut transport = WsTransport::connect(&options.url, options.connect_timeout).await?;

    let connect = Packet::Connect(Box::new(Connect {
        client_id: options.client_id.clone(),
        clean_session: true,
        keep_alive: options.keep_alive,
        username: options.username.clone(),
        password: None,
    }));
    transport.send(&connect).await?;

    let reply = timeout(options.connect_timeout, transport.recv())
        .await
        .map_err(|_| ClientError::Timeout)??;

    match reply {
        Some(Packet::ConnAck(ack)) if ack.code.is_accepted() => {
            debug!("CONNACK accepted (session_present={})", ack.session_present);
            Ok(transport)
        }
        Some(Packet::ConnAck(ack)) => Err(ClientError::Rejected(ack.code.to_string())),
        Some(_) => Err(ProtocolError::ProtocolViolation("expected CONNACK").into()),
        None => Err(ClientError::ConnectionFailed(
            "connection closed before CONNACK".to_string(),
        )),
    }
}

async fn connection_loop(
    options: ConnectOptions,
    state: Arc<StateCell>,
    mut command_rx: mpsc::Receiver<ClientCommand>,
    inbound: InboundHandler,
    transport: WsTransport<Stream>,
) {
    let mut retry_interval = options.reconnect_interval;
    let mut session = Some(transport);
    let mut waiting_reconnect: Option<Reply> = None;

    loop {
        let transport = match session.take() {
            Some(t) => t,
            None => {
                state.apply(ConnectionEvent::ConnectStarted);
                match establish(&options).await {
                    Ok(t) => {
                        state.apply(ConnectionEvent::ConnAckReceived);
                        info!("Reconnected to {}", options.url);
                        retry_interval = options.reconnect_interval;
                        if let Some(reply) = waiting_reconnect.take() {
                            let _ = reply.send(Ok(()));
                        }
                        t
                    }
                    Err(e) => {
                        state.apply(ConnectionEvent::ConnectFailed);
                        warn!("Reconnect to {} failed: {}", options.url, e);
                        if let Some(reply) = waiting_reconnect.take() {
                            let _ = reply.send(Err(e));
                        }

                        match wait_backoff(retry_interval, &mut command_rx).await {
                            Backoff::Elapsed => {
                                retry_interval =
                                    std::cmp::min(retry_interval * 2, options.max_reconnect_interval);
                            }
                            Backoff::Reconnect(reply) => waiting_reconnect = Some(reply),
                            Backoff::Closed => {
                                state.apply(ConnectionEvent::Closed);
                                return;
                            }
                        }
                        continue;
                    }
                }
            }
        };

        match run_session(&options, &state, &mut command_rx, &inbound, transport).await {
            SessionEnd::Closed => {
                state.apply(ConnectionEvent::Closed);
                info!("Disconnected from {}", options.url);
                return;
            }
            SessionEnd::Lost(reason) => {
                state.apply(ConnectionEvent::ConnectionLost);
                warn!("Connection to {} lost: {}", options.url, reason);

                debug!("Reconnecting in {:?}", retry_interval);
                match wait_backoff(retry_interval, &mut command_rx).await {
                    Backoff::Elapsed => {}
                    Backoff::Reconnect(reply) => waiting_reconnect = Some(reply),
                    Backoff::Closed => {
                        state.apply(ConnectionEvent::Closed);
                        return;
                    }
                }
            }
        }
    }
}

/// Sleep for `delay`, answering commands that arrive meanwhile
async fn wait_backoff(delay: Duration, command_rx: &mut mpsc::Receiver<ClientCommand>) -> Backoff {
    let deadline = sleep(delay);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return Backoff::Elapsed,
            cmd = command_rx.recv() => match cmd {
                None => return Backoff::Closed,
                Some(ClientCommand::Close { reply }) => {
                    let _ = reply.send(());
                    return Backoff::Closed;
                }
                Some(ClientCommand::Reconnect { reply }) => return Backoff::Reconnect(reply),
                Some(ClientCommand::Subscribe { reply, .. })
                | Some(ClientCommand::Unsubscribe { reply, .. })
                | Some(ClientCommand::Publish { reply, .. }) => {
                    let _ = reply.send(Err(ClientError::NotConnected));
                }
            }
        }
    }
}

/// Drive one established connection until it closes or fails
async fn run_session(
    options: &ConnectOptions,
    state: &StateCell,
    command_rx: &mut mpsc::Receiver<ClientCommand>,
    inbound: &InboundHandler,
    transport: WsTransport<Stream>,
) -> SessionEnd {
    let (mut reader, mut writer) = transport.into_split();
    let mut pending: HashMap<u16, Reply> = HashMap::new();
    let mut next_packet_id: u16 = 0;

    let keep_alive = Duration::from_secs(u64::from(options.keep_alive.max(1)));
    let mut keepalive_timer = interval_at(Instant::now() + keep_alive, keep_alive);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                None => {
                    shutdown(&mut writer).await;
                    return SessionEnd::Closed;
                }
                Some(ClientCommand::Close { reply }) => {
                    shutdown(&mut writer).await;
                    state.apply(ConnectionEvent::Closed);
                    let _ = reply.send(());
                    return SessionEnd::Closed;
                }
                Some(ClientCommand::Reconnect { reply }) => {
                    let _ = reply.send(Ok(()));
                }
                Some(ClientCommand::Publish { topic, payload, reply }) => {
                    let publish = Packet::Publish(Publish::at_most_once(topic, payload));
                    match writer.send(&publish).await {
                        Ok(()) => {
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            let _ = reply.send(Err(ClientError::ConnectionLost(reason.clone())));
                            return SessionEnd::Lost(reason);
                        }
                    }
                }
                Some(ClientCommand::Subscribe { filter, reply }) => {
                    let packet_id = allocate_packet_id(&mut next_packet_id);
                    let subscribe = Packet::Subscribe(Subscribe {
                        packet_id,
                        filters: vec![(filter, QoS::AtMostOnce)],
                    });
                    let sent =
                        send_tracked(&mut writer, &subscribe, packet_id, reply, &mut pending).await;
                    if let Err(reason) = sent {
                        return SessionEnd::Lost(reason);
                    }
                }
                Some(ClientCommand::Unsubscribe { filter, reply }) => {
                    let packet_id = allocate_packet_id(&mut next_packet_id);
                    let unsubscribe = Packet::Unsubscribe(Unsubscribe {
                        packet_id,
                        filters: vec![filter],
                    });
                    let sent =
                        send_tracked(&mut writer, &unsubscribe, packet_id, reply, &mut pending).await;
                    if let Err(reason) = sent {
                        return SessionEnd::Lost(reason);
                    }
                }
            },

            packet = reader.recv() => match packet {
                Ok(Some(Packet::Publish(publish))) => {
                    if let (QoS::AtLeastOnce, Some(packet_id)) = (publish.qos, publish.packet_id) {
                        if let Err(e) = writer.send(&Packet::PubAck(PubAck { packet_id })).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    if publish.qos == QoS::ExactlyOnce {
                        debug!("Dropping QoS 2 publish on '{}'", publish.topic);
                        continue;
                    }
                    inbound(&publish.topic, publish.payload);
                }
                Ok(Some(Packet::SubAck(ack))) => {
                    if let Some(reply) = pending.remove(&ack.packet_id) {
                        let result = if ack.return_codes.iter().any(|c| c.is_failure()) {
                            Err(ClientError::Rejected("subscription refused".to_string()))
                        } else {
                            Ok(())
                        };
                        let _ = reply.send(result);
                    }
                }
                Ok(Some(Packet::UnsubAck(ack))) => {
                    if let Some(reply) = pending.remove(&ack.packet_id) {
                        let _ = reply.send(Ok(()));
                    }
                }
                Ok(Some(Packet::PingResp)) => {
                    awaiting_pong = false;
                }
                Ok(Some(other)) => {
                    debug!("Ignoring unexpected packet type {}", other.packet_type());
                }
                Ok(None) => return SessionEnd::Lost("connection closed by broker".to_string()),
                Err(e) => return SessionEnd::Lost(e.to_string()),
            },

            _ = keepalive_timer.tick() => {
                if awaiting_pong {
                    return SessionEnd::Lost(ProtocolError::KeepAliveTimeout.to_string());
                }
                if let Err(e) = writer.send(&Packet::PingReq).await {
                    return SessionEnd::Lost(e.to_string());
                }
                awaiting_pong = true;
            }
        }
    }
}

/// Send a packet whose acknowledgement resolves `reply`
async fn send_tracked(
    writer: &mut WsWriter<Stream>,
    packet: &Packet,
    packet_id: u16,
    reply: Reply,
    pending: &mut HashMap<u16, Reply>,
) -> Result<(), String> {
    match writer.send(packet).await {
        Ok(()) => {
            pending.insert(packet_id, reply);
            Ok(())
        }
        Err(e) => {
            let reason = e.to_string();
            let _ = reply.send(Err(ClientError::ConnectionLost(reason.clone())));
            Err(reason)
        }
    }
}

async fn shutdown(writer: &mut WsWriter<Stream>) {
    if let Err(e) = writer.send(&Packet::Disconnect).await {
        debug!("DISCONNECT not delivered: {}", e);
    }
    let _ = writer.close().await;
}

fn allocate_packet_id(next: &mut u16) -> u16 {
    *next = next.wrapping_add(1);
    if *next == 0 {
        *next = 1;
    }
    *next
}
