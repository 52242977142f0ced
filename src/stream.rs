//! The public client: a blocking façade over a background tokio runtime
//! that owns the websocket, following the split-sink/split-stream
//! pattern used by the teacher's own realtime client, generalized from a
//! single trade-update feed to the full quote/candle/study multiplex.

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use derive_builder::Builder;
use futures::sink::Sink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc as tokio_mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::auth::{CredentialStore, StaticCredentials};
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::entities::{Candle, IndicatorDescriptor, InputValue, QuoteRecord, StudyRecord};
use crate::errors::Error;
use crate::framer::{Frame, Framer};
use crate::metadata::{standard_descriptor_by_pine_id, MetadataFetcher, PineFacadeClient};
use crate::reconnect::ReconnectState;
use crate::registry::{Registry, StudyKey};
use crate::session::{bootstrap_messages, SessionIds};
use crate::store::DataStore;

/// Configuration for a [`BorsaStream`]. Everything but the endpoint has a
/// sensible default, mirroring the teacher's builder-style config types.
#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct StreamConfig {
    /// The websocket endpoint to connect to.
    pub endpoint: String,
    /// Number of historical bars requested on every new candle series.
    #[builder(default = "crate::protocol::DEFAULT_BAR_COUNT")]
    pub bar_count: u32,
    /// How long a blocking `wait_for_*` call waits before timing out.
    #[builder(default = "Duration::from_secs(10)")]
    pub default_timeout: Duration,
    /// How long `connect()` waits for the initial handshake to settle.
    #[builder(default = "Duration::from_secs(10)")]
    pub connect_timeout: Duration,
}

impl StreamConfig {
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }
}

enum Outbound {
    Send(String),
    Shutdown,
}

/// A connected streaming client. Dropping it disconnects.
pub struct BorsaStream {
    config: StreamConfig,
    credentials: Arc<dyn CredentialStore>,
    metadata: Arc<dyn MetadataFetcher>,
    store: Arc<DataStore>,
    registry: Arc<Mutex<Registry>>,
    dispatcher: Arc<Dispatcher>,
    session_ids: Arc<Mutex<SessionIds>>,
    reconnect: Arc<Mutex<ReconnectState>>,
    outbound: std_mpsc::Sender<Outbound>,
    worker: Option<JoinHandle<()>>,
    descriptor_cache: Mutex<HashMap<String, Arc<IndicatorDescriptor>>>,
}

impl BorsaStream {
    /// Connects with anonymous credentials and the default metadata
    /// fetcher. Use [`BorsaStream::connect_with`] to supply custom
    /// credentials or a fake fetcher for testing.
    pub fn connect(config: StreamConfig) -> Result<Self, Error> {
        Self::connect_with(config, Arc::new(StaticCredentials::anonymous()), Arc::new(PineFacadeClient::new()))
    }

    pub fn connect_with(
        config: StreamConfig,
        credentials: Arc<dyn CredentialStore>,
        metadata: Arc<dyn MetadataFetcher>,
    ) -> Result<Self, Error> {
        let store = Arc::new(DataStore::new());
        let registry = Arc::new(Mutex::new(Registry::new()));
        let dispatcher = Arc::new(Dispatcher::new());
        let session_ids = Arc::new(Mutex::new(SessionIds::generate()));
        let reconnect = Arc::new(Mutex::new(ReconnectState::new()));
        let (outbound_tx, outbound_rx) = std_mpsc::channel::<Outbound>();

        let worker = spawn_worker(
            config.clone(),
            credentials.clone(),
            store.clone(),
            registry.clone(),
            dispatcher.clone(),
            session_ids.clone(),
            reconnect.clone(),
            outbound_rx,
        );

        Ok(Self {
            config,
            credentials,
            metadata,
            store,
            registry,
            dispatcher,
            session_ids,
            reconnect,
            outbound: outbound_tx,
            worker: Some(worker),
            descriptor_cache: Mutex::new(HashMap::new()),
        })
    }

    fn send(&self, message: serde_json::Value) {
        let wire = Framer::encode_data(&message);
        let _ = self.outbound.send(Outbound::Send(wire));
    }

    pub fn subscribe(&self, symbol: &str, exchange: &str) -> Result<(), Error> {
        let ids = self.session_ids.lock().unwrap().clone();
        if let Some(msg) = self.registry.lock().unwrap().subscribe_quote(&ids, symbol, exchange) {
            self.send(msg);
        }
        Ok(())
    }

    pub fn unsubscribe(&self, symbol: &str) -> Result<(), Error> {
        let ids = self.session_ids.lock().unwrap().clone();
        if let Some(msg) = self.registry.lock().unwrap().unsubscribe_quote(&ids, symbol) {
            self.send(msg);
        }
        Ok(())
    }

    pub fn subscribe_chart(&self, symbol: &str, interval: &str, exchange: &str) -> Result<(), Error> {
        let ids = self.session_ids.lock().unwrap().clone();
        let messages = self
            .registry
            .lock()
            .unwrap()
            .subscribe_candle(&ids, symbol, interval, exchange, self.config.bar_count)?;
        for msg in messages {
            self.send(msg);
        }
        Ok(())
    }

    pub fn unsubscribe_chart(&self, symbol: &str, interval: &str) -> Result<(), Error> {
        let ids = self.session_ids.lock().unwrap().clone();
        if let Some(msg) = self.registry.lock().unwrap().unsubscribe_candle(&ids, symbol, interval) {
            self.send(msg);
        }
        Ok(())
    }

    /// Adds a study. `indicator` is either a standard short name (`"RSI"`,
    /// `"MACD"`, ...), a full standard id (`"STD;RSI"`), or a custom pine
    /// id (`"USER;..."`/`"PUB;..."`), the latter requiring credentials with
    /// metadata access. See [`crate::protocol::normalize_indicator`] for
    /// how `indicator` maps to a wire id and display name.
    pub fn add_study(
        &self,
        symbol: &str,
        interval: &str,
        indicator: &str,
        inputs: HashMap<String, InputValue>,
    ) -> Result<(), Error> {
        let (pine_id, display_name) = crate::protocol::normalize_indicator(indicator);
        let descriptor = self.resolve_descriptor(&pine_id)?;
        let ids = self.session_ids.lock().unwrap().clone();
        let msg = self.registry.lock().unwrap().add_study(
            &ids,
            symbol,
            interval,
            &display_name,
            descriptor,
            inputs,
        )?;
        if let Some(msg) = msg {
            self.send(msg);
        }
        Ok(())
    }

    pub fn remove_study(&self, symbol: &str, interval: &str, display_name: &str) -> Result<(), Error> {
        let ids = self.session_ids.lock().unwrap().clone();
        if let Some(msg) = self.registry.lock().unwrap().remove_study(&ids, symbol, interval, display_name) {
            self.send(msg);
        }
        Ok(())
    }

    /// Resolves an already-normalized pine id to a descriptor, preferring
    /// the zero-network standard table over a live metadata fetch.
    fn resolve_descriptor(&self, pine_id: &str) -> Result<Arc<IndicatorDescriptor>, Error> {
        if let Some(cached) = self.descriptor_cache.lock().unwrap().get(pine_id) {
            return Ok(cached.clone());
        }
        let descriptor = if let Some(standard) = standard_descriptor_by_pine_id(pine_id) {
            standard
        } else {
            self.metadata.fetch(pine_id, "last", self.credentials.cookies().as_ref())?
        };
        let descriptor = Arc::new(descriptor);
        self.descriptor_cache.lock().unwrap().insert(pine_id.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    pub fn get_quote(&self, symbol: &str) -> Option<QuoteRecord> {
        self.store.get_quote(symbol)
    }

    pub fn wait_for_quote(&self, symbol: &str) -> Result<QuoteRecord, Error> {
        self.store.wait_for_quote(symbol, self.config.default_timeout)
    }

    pub fn get_candle(&self, symbol: &str, interval: &str) -> Option<Candle> {
        self.store.get_candle(symbol, interval)
    }

    pub fn get_candles(&self, symbol: &str, interval: &str) -> Vec<Candle> {
        self.store.get_candles(symbol, interval)
    }

    pub fn wait_for_candle(&self, symbol: &str, interval: &str) -> Result<Candle, Error> {
        self.store.wait_for_candle(symbol, interval, self.config.default_timeout)
    }

    pub fn get_study(&self, symbol: &str, interval: &str, display_name: &str) -> Option<StudyRecord> {
        let key = StudyKey { symbol: symbol.to_string(), interval: interval.to_string(), display_name: display_name.to_string() };
        self.store.get_study(&key)
    }

    pub fn get_studies(&self, symbol: &str, interval: &str) -> Vec<(StudyKey, StudyRecord)> {
        self.store.get_studies(symbol, interval)
    }

    pub fn wait_for_study(&self, symbol: &str, interval: &str, display_name: &str) -> Result<StudyRecord, Error> {
        let key = StudyKey { symbol: symbol.to_string(), interval: interval.to_string(), display_name: display_name.to_string() };
        self.store.wait_for_study(&key, self.config.default_timeout)
    }

    pub fn on_quote(&self, symbol: &str, callback: impl Fn(&QuoteRecord) + Send + Sync + 'static) {
        self.store.on_quote(symbol, callback);
    }

    pub fn on_any_quote(&self, callback: impl Fn(&QuoteRecord) + Send + Sync + 'static) {
        self.store.on_any_quote(callback);
    }

    pub fn on_candle(&self, symbol: &str, interval: &str, callback: impl Fn(&str, &str, &Candle) + Send + Sync + 'static) {
        self.store.on_candle(symbol, interval, callback);
    }

    pub fn on_any_candle(&self, callback: impl Fn(&str, &str, &Candle) + Send + Sync + 'static) {
        self.store.on_any_candle(callback);
    }

    pub fn on_study(&self, symbol: &str, interval: &str, display_name: &str, callback: impl Fn(&StudyKey, &StudyRecord) + Send + Sync + 'static) {
        let key = StudyKey { symbol: symbol.to_string(), interval: interval.to_string(), display_name: display_name.to_string() };
        self.store.on_study(key, callback);
    }

    pub fn on_any_study(&self, callback: impl Fn(&StudyKey, &StudyRecord) + Send + Sync + 'static) {
        self.store.on_any_study(callback);
    }

    pub fn ping(&self) -> Option<std::time::Instant> {
        self.dispatcher.last_heartbeat()
    }

    pub fn disconnect(&mut self) {
        self.reconnect.lock().unwrap().disable();
        let _ = self.outbound.send(Outbound::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.store.clear();
    }
}

impl Drop for BorsaStream {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.disconnect();
        }
    }
}


#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    config: StreamConfig,
    credentials: Arc<dyn CredentialStore>,
    store: Arc<DataStore>,
    registry: Arc<Mutex<Registry>>,
    dispatcher: Arc<Dispatcher>,
    session_ids: Arc<Mutex<SessionIds>>,
    reconnect: Arc<Mutex<ReconnectState>>,
    outbound_rx: std_mpsc::Receiver<Outbound>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                tracing::error!(%err, "failed to start background runtime");
                return;
            }
        };
        runtime.block_on(run(config, credentials, store, registry, dispatcher, session_ids, reconnect, outbound_rx));
    })
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: StreamConfig,
    credentials: Arc<dyn CredentialStore>,
    store: Arc<DataStore>,
    registry: Arc<Mutex<Registry>>,
    dispatcher: Arc<Dispatcher>,
    session_ids: Arc<Mutex<SessionIds>>,
    reconnect: Arc<Mutex<ReconnectState>>,
    outbound_rx: std_mpsc::Receiver<Outbound>,
) {
    // Bridges the std::sync outbound channel (fed by the blocking public
    // API) into the async world this task runs in.
    let (bridge_tx, mut bridge_rx) = tokio_mpsc::unbounded_channel::<Outbound>();
    std::thread::spawn(move || {
        while let Ok(item) = outbound_rx.recv() {
            let shutdown = matches!(item, Outbound::Shutdown);
            if bridge_tx.send(item).is_err() || shutdown {
                break;
            }
        }
    });

    loop {
        *session_ids.lock().unwrap() = SessionIds::generate();
        let ids = session_ids.lock().unwrap().clone();

        let connected = tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(&config.endpoint)).await;
        let socket = match connected {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(err)) => {
                tracing::warn!(%err, "connect failed");
                if !backoff_and_continue(&reconnect).await {
                    return;
                }
                continue;
            }
            Err(_) => {
                tracing::warn!("connect timed out");
                if !backoff_and_continue(&reconnect).await {
                    return;
                }
                continue;
            }
        };

        reconnect.lock().unwrap().record_success();
        let (mut sink, mut stream) = socket.split();

        for msg in bootstrap_messages(&ids, credentials.as_ref()) {
            let _ = sink.send(WsMessage::Text(Framer::encode_data(&msg))).await;
        }
        for msg in registry.lock().unwrap().resubscribe_messages(&ids) {
            let _ = sink.send(WsMessage::Text(Framer::encode_data(&msg))).await;
        }

        let mut shutdown_requested = false;
        loop {
            tokio::select! {
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            handle_text(&text, &dispatcher, &registry, &store, &mut sink).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            tracing::warn!("connection closed by peer");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::warn!(%err, "transport read error");
                            break;
                        }
                    }
                }
                outbound = bridge_rx.recv() => {
                    match outbound {
                        Some(Outbound::Send(wire)) => { let _ = sink.send(WsMessage::Text(wire)).await; }
                        Some(Outbound::Shutdown) | None => { shutdown_requested = true; break; }
                    }
                }
            }
        }

        let _ = sink.close().await;
        if shutdown_requested {
            return;
        }
        if !backoff_and_continue(&reconnect).await {
            return;
        }
    }
}

async fn handle_text(
    text: &str,
    dispatcher: &Dispatcher,
    registry: &Mutex<Registry>,
    store: &DataStore,
    sink: &mut (impl Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
) {
    let frames = match Framer::decode(text) {
        Ok(frames) => frames,
        Err(err) => {
            tracing::warn!(%err, "framing error, dropping read");
            return;
        }
    };
    for frame in frames {
        if let Dispatched::Reply(echo) = dispatcher.handle(frame, registry, store) {
            let _ = sink.send(WsMessage::Text(echo)).await;
        }
    }
}

/// Waits out the current backoff delay, returning `false` once the
/// attempt cap is reached (the caller should give up entirely).
async fn backoff_and_continue(reconnect: &Mutex<ReconnectState>) -> bool {
    let delay = reconnect.lock().unwrap().record_failure();
    match delay {
        Some(delay) => {
            tokio::time::sleep(delay).await;
            true
        }
        None => {
            tracing::error!("giving up after exhausting reconnect attempts");
            false
        }
    }
}
