//! Resilient simulator session: connection ownership, outbound sends with
//! reconnect-and-retry, control-rate limiting and the inbound receive loop.

use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::config::TransportConfig;
use crate::error::ConnectionError;
use crate::message::{Inbound, Outbound, timestamp_ms};
use crate::telemetry::TelemetryWriter;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ConnectionError>> + Send>>;

pub type SharedSession<C> = Arc<Mutex<TransportSession<C>>>;

/// Opens one text-frame channel to the simulator.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
    ) -> impl Future<Output = Result<(FrameSink, FrameStream), ConnectionError>> + Send;
}

/// WebSocket connector used against a real simulator.
#[derive(Clone, Debug)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), ConnectionError> {
        let (socket, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|err| ConnectionError::Connect {
                    url: self.url.clone(),
                    reason: err.to_string(),
                })?;
        let (write, read) = socket.split();
        let sink = write
            .sink_map_err(|err| ConnectionError::Write(err.to_string()))
            .with(|frame: String| future::ready(Ok::<_, ConnectionError>(Message::Text(frame))));
        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                Ok(_) => None,
                Err(err) => Some(Err(ConnectionError::Read(err.to_string()))),
            })
        });
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Inbound half of a freshly established connection, handed to the receive
/// loop.
pub struct InstalledStream {
    generation: u64,
    stream: FrameStream,
}

pub type StreamFeed = mpsc::UnboundedReceiver<InstalledStream>;

/// Sole owner of the simulator connection.
pub struct TransportSession<C: Connector> {
    connector: C,
    config: TransportConfig,
    sink: Option<FrameSink>,
    attempts: u32,
    generation: u64,
    last_control: Option<Instant>,
    installs: mpsc::UnboundedSender<InstalledStream>,
}

impl<C: Connector> TransportSession<C> {
    pub fn new(connector: C, config: TransportConfig) -> (Self, StreamFeed) {
        let (installs, feed) = mpsc::unbounded_channel();
        let session = Self {
            connector,
            config,
            sink: None,
            attempts: 0,
            generation: 0,
            last_control: None,
            installs,
        };
        (session, feed)
    }

    /// Builds a shared session, spawns its receive loop and opens the first
    /// connection. Fails only when every connection attempt is exhausted.
    pub async fn start(
        connector: C,
        config: TransportConfig,
        writer: TelemetryWriter,
    ) -> Result<(SharedSession<C>, JoinHandle<()>), ConnectionError> {
        let attempts = config.max_reconnect_attempts;
        let (session, feed) = Self::new(connector, config);
        let session = Arc::new(Mutex::new(session));
        let receiver = spawn_receiver(Arc::clone(&session), feed, writer);
        let opened = session.lock().await.open().await;
        if !opened {
            receiver.abort();
            return Err(ConnectionError::Exhausted { attempts });
        }
        Ok((session, receiver))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Initial connection under the reconnection policy; the first try counts
    /// against `max_reconnect_attempts`.
    pub async fn open(&mut self) -> bool {
        info!(url = %self.config.url, "opening simulator session");
        self.reconnect().await
    }

    /// Opens a channel within the per-attempt timeout and announces external
    /// control.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        let limit = self.config.connect_timeout();
        let (mut sink, stream) = match timeout(limit, self.connector.connect()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout(limit)),
        };
        let announce = Outbound::config()
            .encode()
            .map_err(|err| ConnectionError::Write(err.to_string()))?;
        sink.send(announce).await?;

        self.generation += 1;
        self.sink = Some(sink);
        self.last_control = None;
        let generation = self.generation;
        if self.installs.send(InstalledStream { generation, stream }).is_err() {
            debug!(generation, "no receive loop attached");
        }
        info!(url = %self.config.url, generation, "connected to simulator");
        Ok(())
    }

    /// Retries with exponential backoff up to `max_reconnect_attempts`. The
    /// attempt counter is reset both on success and on exhaustion.
    pub async fn reconnect(&mut self) -> bool {
        self.sink = None;
        let max = self.config.max_reconnect_attempts;
        while self.attempts < max {
            self.attempts += 1;
            let attempt = self.attempts;
            if attempt > 1 {
                sleep(self.config.backoff(attempt - 1)).await;
            }
            info!(attempt, max, "reconnecting to simulator");
            match self.connect().await {
                Ok(()) => {
                    self.attempts = 0;
                    return true;
                }
                Err(err) => warn!(attempt, %err, "reconnection attempt failed"),
            }
        }
        error!(attempts = max, "reconnection attempts exhausted");
        self.attempts = 0;
        false
    }

    /// Sends one message, reconnecting first if needed and retrying once
    /// after a failed write. Control commands arriving faster than the
    /// configured interval are dropped. Returns whether the frame was written.
    pub async fn send(&mut self, message: &Outbound) -> bool {
        let is_control = message.is_control();
        if is_control {
            if let Some(last) = self.last_control {
                if last.elapsed() < self.config.control_interval() {
                    trace!("control command throttled");
                    return false;
                }
            }
        }
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                error!(%err, "cannot encode outbound message");
                return false;
            }
        };
        if self.sink.is_none() && !self.reconnect().await {
            warn!("not connected; message dropped");
            return false;
        }
        let mut sent = self.write(frame.clone()).await;
        if let Err(err) = &sent {
            warn!(%err, "send failed; reconnecting");
            sent = if self.reconnect().await {
                self.write(frame).await
            } else {
                Err(ConnectionError::Closed)
            };
        }
        match sent {
            Ok(()) => {
                if is_control {
                    self.last_control = Some(Instant::now());
                }
                true
            }
            Err(err) => {
                warn!(%err, "message dropped");
                false
            }
        }
    }

    pub async fn ping(&mut self) -> bool {
        self.send(&Outbound::ping()).await
    }

    pub async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.close().await {
                debug!(%err, "error while closing connection");
            }
        }
    }

    /// Forgets the connection if `generation` is still the current one.
    fn mark_disconnected(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.sink = None;
        true
    }

    async fn write(&mut self, frame: String) -> Result<(), ConnectionError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(ConnectionError::Closed);
        };
        let result = sink.send(frame).await;
        if result.is_err() {
            self.sink = None;
        }
        result
    }
}

enum ReceiveEvent {
    Installed(Option<InstalledStream>),
    Frame(Option<Result<String, ConnectionError>>),
}

/// Long-lived task reading the current connection. A newer connection
/// installed by a sender replaces the stream being read; a closed stream
/// triggers reconnection only if it is still the current one.
pub fn spawn_receiver<C: Connector>(
    session: SharedSession<C>,
    mut feed: StreamFeed,
    writer: TelemetryWriter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut current: Option<InstalledStream> = None;
        loop {
            if current.is_none() {
                match feed.recv().await {
                    Some(installed) => current = Some(installed),
                    None => break,
                }
            }
            let Some(active) = current.as_mut() else {
                continue;
            };
            let generation = active.generation;
            let event = tokio::select! {
                biased;
                installed = feed.recv() => ReceiveEvent::Installed(installed),
                frame = active.stream.next() => ReceiveEvent::Frame(frame),
            };
            match event {
                ReceiveEvent::Installed(Some(installed)) => {
                    debug!(generation = installed.generation, "receive loop switched connection");
                    current = Some(installed);
                }
                ReceiveEvent::Installed(None) => break,
                ReceiveEvent::Frame(Some(Ok(frame))) => dispatch(&frame, &writer),
                ReceiveEvent::Frame(closed) => {
                    if let Some(Err(err)) = closed {
                        warn!(%err, "receive failed");
                    }
                    current = None;
                    let mut session = session.lock().await;
                    if session.mark_disconnected(generation) {
                        warn!(generation, "simulator connection closed");
                        if !session.reconnect().await {
                            error!("simulator unreachable; waiting for a new connection");
                        }
                    }
                }
            }
        }
        debug!("receive loop finished");
    })
}

fn dispatch(frame: &str, writer: &TelemetryWriter) {
    match Inbound::decode(frame) {
        Ok(Inbound::State(telemetry)) => writer.publish(telemetry),
        Ok(Inbound::ConfigAck { settings }) => info!(%settings, "simulator accepted configuration"),
        Ok(Inbound::ResetAck { .. }) => debug!("simulator acknowledged reset"),
        Ok(Inbound::Pong { timestamp }) => {
            let latency_ms = timestamp_ms() as f64 - timestamp;
            debug!(latency_ms, "pong");
        }
        Err(err) => warn!(%err, "inbound frame dropped"),
    }
}
