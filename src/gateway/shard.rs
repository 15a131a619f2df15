use std::collections::VecDeque;
use std::fmt;
use std::io::Read;
use std::time::{Duration, Instant};

use flate2::read::ZlibDecoder;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use super::inflater::Inflater;
use super::ws::{self, WsClient};
use super::{
    ActivityData, ChunkGuildFilter, ConnectionStage, EventSink, GatewayError, PresenceData,
};
use crate::constants::{self, close_codes, Opcode};
use crate::internal::prelude::*;
use crate::json;
use crate::model::event::GatewayEvent;
use crate::model::gateway::{GatewayIntents, OnlineStatus, ShardInfo};
use crate::model::id::{ChannelId, GuildId};
use crate::secret_string::SecretString;

/// How long one read on the socket may block inside [`Shard::process`].
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for a [`Shard`].
pub struct GatewayConfig {
    /// The account token.
    pub token: SecretString,
    /// The intents bitmask sent with Identify.
    pub intents: GatewayIntents,
    /// This shard's index. Must be below `shard_count` unless both are zero.
    pub shard_id: u16,
    /// The total shard count; zero omits the shard field from Identify.
    pub shard_count: u16,
    /// The member count past which a guild is "large" and sends offline
    /// members only on request. Zero omits the field; otherwise 50 to 250.
    pub large_threshold: u8,
    /// Whether to use `compress=zlib-stream` transport compression. Mutually
    /// exclusive with [`Self::payload_compression`].
    pub transport_compression: bool,
    /// Whether to request per-payload compression in Identify.
    pub payload_compression: bool,
    /// How long an unacknowledged heartbeat is tolerated. The effective
    /// patience is the larger of this and the heartbeat interval.
    pub heartbeat_timeout: Duration,
    /// The deadline for establishing the WebSocket connection.
    pub connect_timeout: Duration,
    /// Where dispatched events and stage changes are delivered.
    pub sink: Option<Box<dyn EventSink>>,
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>, intents: GatewayIntents) -> Self {
        Self {
            token: SecretString::new(token.into().into()),
            intents,
            shard_id: 0,
            shard_count: 0,
            large_threshold: 0,
            transport_compression: false,
            payload_compression: false,
            heartbeat_timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(30),
            sink: None,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("intents", &self.intents)
            .field("shard_id", &self.shard_id)
            .field("shard_count", &self.shard_count)
            .field("large_threshold", &self.large_threshold)
            .field("transport_compression", &self.transport_compression)
            .field("payload_compression", &self.payload_compression)
            .finish_non_exhaustive()
    }
}

/// A message sitting in the outbox, waiting for its due time and a free slot
/// in the send window.
#[derive(Debug)]
struct OutgoingMessage {
    opcode: Opcode,
    json: String,
    due: Instant,
}

/// The 120-messages-per-minute budget the gateway enforces on a connection.
#[derive(Clone, Copy, Debug, Default)]
struct SendWindow {
    start: Option<Instant>,
    sent: u32,
    blocked_until: Option<Instant>,
}

impl SendWindow {
    /// Whether a send is allowed right now.
    fn open(&mut self, now: Instant) -> bool {
        if let Some(until) = self.blocked_until {
            if now < until {
                return false;
            }
            *self = Self::default();
        }

        true
    }

    /// Accounts for one successful transmission.
    fn record(&mut self, now: Instant) {
        match self.start {
            Some(start) if now.duration_since(start) < constants::GATEWAY_SEND_WINDOW => {
                self.sent += 1;
                if self.sent >= constants::GATEWAY_SEND_LIMIT {
                    self.blocked_until = Some(start + constants::GATEWAY_SEND_WINDOW);
                }
            },
            _ => {
                self.start = Some(now);
                self.sent = 1;
            },
        }
    }
}

/// A Shard is a handler for a WebSocket connection to Discord's gateway.
///
/// A shard drives the whole session lifecycle: the Hello/Identify handshake,
/// heartbeats on the interval the gateway dictates, resuming after a dropped
/// connection, and reconnecting with jittered backoff when the gateway asks
/// for it or the connection dies.
///
/// The shard is single-threaded and cooperative. After [`Self::connect`],
/// call [`Self::process`] in a loop; each call drives the connection for at
/// most the given duration. Every incoming dispatch is handed to the
/// configured [`EventSink`] as the event name plus the raw JSON of its
/// payload.
///
/// ```rust,no_run
/// use std::time::Duration;
///
/// use accord::gateway::{GatewayConfig, Shard};
/// use accord::model::gateway::GatewayIntents;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = GatewayConfig::new(
///     std::env::var("DISCORD_TOKEN")?,
///     GatewayIntents::non_privileged(),
/// );
///
/// let mut shard = Shard::new(config)?;
/// shard.connect(None).await?;
///
/// loop {
///     if let Err(why) = shard.process(Duration::from_millis(500)).await {
///         eprintln!("shard error: {why}");
///     }
/// }
/// # }
/// ```
pub struct Shard {
    config: GatewayConfig,
    client: Option<WsClient>,
    stage: ConnectionStage,
    /// The last explicitly supplied base URL.
    ws_url: Option<String>,
    /// The gateway's preferred URL for resuming, from READY.
    resume_url: Option<String>,
    session_id: Option<String>,
    should_resume: bool,
    /// The highest sequence number seen.
    seq: Option<u64>,
    /// The sequence of the last dispatch handed to the sink, for dedup.
    last_dispatch_seq: Option<u64>,
    heartbeat_interval: Option<Duration>,
    next_heartbeat: Option<Instant>,
    last_heartbeat_sent: Option<Instant>,
    last_heartbeat_ack: Option<Instant>,
    last_heartbeat_acknowledged: bool,
    last_identify: Option<Instant>,
    outbox: VecDeque<OutgoingMessage>,
    send_window: SendWindow,
    reconnect_at: Option<Instant>,
    reconnect_attempts: u32,
    inflater: Option<Inflater>,
}

impl Shard {
    /// Creates a shard from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidParameter`] when the token is empty,
    /// the shard numbering is inconsistent, the large threshold is out of
    /// range, or both compression modes are requested at once.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        if config.token.expose_secret().trim().is_empty() {
            return Err(Error::Gateway(GatewayError::InvalidParameter("token")));
        }

        if config.shard_count == 0 {
            if config.shard_id != 0 {
                return Err(Error::Gateway(GatewayError::InvalidParameter("shard_id")));
            }
        } else if config.shard_id >= config.shard_count {
            return Err(Error::Gateway(GatewayError::InvalidParameter("shard_id")));
        }

        if config.large_threshold != 0 && !(50..=250).contains(&config.large_threshold) {
            return Err(Error::Gateway(GatewayError::InvalidParameter("large_threshold")));
        }

        if config.transport_compression && config.payload_compression {
            return Err(Error::Gateway(GatewayError::InvalidParameter("compression")));
        }

        Ok(Self {
            config,
            client: None,
            stage: ConnectionStage::Disconnected,
            ws_url: None,
            resume_url: None,
            session_id: None,
            should_resume: false,
            seq: None,
            last_dispatch_seq: None,
            heartbeat_interval: None,
            next_heartbeat: None,
            last_heartbeat_sent: None,
            last_heartbeat_ack: None,
            last_heartbeat_acknowledged: true,
            last_identify: None,
            outbox: VecDeque::new(),
            send_window: SendWindow::default(),
            reconnect_at: None,
            reconnect_attempts: 0,
            inflater: None,
        })
    }

    /// Returns the current connection stage of the shard.
    #[must_use]
    pub fn stage(&self) -> ConnectionStage {
        self.stage
    }

    /// The highest sequence number seen on this session.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Calculates the heartbeat latency between the shard and the gateway.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        if let (Some(sent), Some(received)) = (self.last_heartbeat_sent, self.last_heartbeat_ack)
        {
            if received > sent {
                return Some(received - sent);
            }
        }

        None
    }

    /// Opens the WebSocket connection.
    ///
    /// With an explicit `url` the shard connects there and remembers it as
    /// its base URL. Without one, a live session reconnects to the resume URL
    /// from READY; otherwise the last base URL (or the default gateway URL)
    /// is used. The URL is augmented with the `v`, `encoding` and `compress`
    /// query parameters as configured.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidParameter`] for a URL whose existing
    /// query parameters conflict, [`GatewayError::ConnectTimeout`] when the
    /// handshake misses the configured deadline, and transport errors as
    /// [`Error::Tungstenite`].
    pub async fn connect(&mut self, url: Option<&str>) -> Result<()> {
        if let Some(url) = url {
            self.ws_url = Some(url.to_owned());
        }

        let resuming = self.should_resume && self.session_id.is_some() && self.seq.is_some();
        let base = resuming
            .then(|| self.resume_url.clone())
            .flatten()
            .or_else(|| self.ws_url.clone())
            .unwrap_or_else(|| constants::GATEWAY_URL.to_owned());

        let target = ws::build_gateway_url(&base, self.config.transport_compression)?;

        debug!("Connecting to {}", target);
        self.set_stage(ConnectionStage::Connecting);

        let client =
            match tokio::time::timeout(self.config.connect_timeout, WsClient::connect(target))
                .await
            {
                Ok(Ok(client)) => client,
                Ok(Err(why)) => {
                    self.set_stage(ConnectionStage::Disconnected);
                    return Err(why);
                },
                Err(_) => {
                    self.set_stage(ConnectionStage::Disconnected);
                    return Err(Error::Gateway(GatewayError::ConnectTimeout));
                },
            };

        self.client = Some(client);
        self.reconnect_at = None;
        self.reconnect_attempts = 0;

        if self.config.transport_compression {
            match &mut self.inflater {
                Some(inflater) => inflater.reset(),
                None => self.inflater = Some(Inflater::new()),
            }
        }

        self.set_stage(ConnectionStage::Connected);

        Ok(())
    }

    /// Drives the connection for up to `budget`: initiates a due reconnect,
    /// heartbeats on schedule, flushes the outbox within the send budget, and
    /// reads from the socket.
    ///
    /// Call this in a loop. An `Err` does not mean the shard is dead; a
    /// heartbeat timeout, for instance, surfaces here once while the
    /// reconnect it scheduled is already pending. Only errors of
    /// [`ErrorKind::Unauthorized`], [`ErrorKind::InvalidParam`] or
    /// [`ErrorKind::InvalidState`] from fatal close codes leave the shard
    /// disconnected for good.
    ///
    /// # Errors
    ///
    /// Protocol-fatal close codes, heartbeat timeouts, malformed payloads,
    /// and transport failures.
    ///
    /// [`ErrorKind::Unauthorized`]: crate::ErrorKind::Unauthorized
    /// [`ErrorKind::InvalidParam`]: crate::ErrorKind::InvalidParam
    /// [`ErrorKind::InvalidState`]: crate::ErrorKind::InvalidState
    pub async fn process(&mut self, budget: Duration) -> Result<()> {
        let deadline = Instant::now() + budget;

        loop {
            if let Some(at) = self.reconnect_at {
                if Instant::now() >= at {
                    self.reconnect_at = None;
                    if let Err(why) = self.connect(None).await {
                        warn!("Reconnect attempt failed: {why}");
                        self.schedule_reconnect();
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }

            if self.client.is_none() {
                // Nothing to drive; sleep out the slice, or less if a
                // reconnect comes due first.
                let mut wake = deadline;
                if let Some(at) = self.reconnect_at {
                    wake = wake.min(at);
                }
                tokio::time::sleep_until(wake.max(now).into()).await;
                continue;
            }

            self.check_heartbeat()?;
            self.drain_outbox().await;

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let slice = deadline.duration_since(now).min(RECV_TIMEOUT);

            let received = match self.client.as_mut() {
                Some(client) => client.recv(slice).await,
                None => continue,
            };

            match received {
                Ok(Some(message)) => self.handle_message(message)?,
                Ok(None) => {},
                Err(why) => {
                    warn!("WebSocket error: {why}");
                    self.schedule_reconnect();
                },
            }
        }
    }

    /// Closes the connection with status 1000 and forgets the session. No
    /// automatic reconnect will follow. Idempotent.
    pub async fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.outbox.clear();

        if let Some(client) = self.client.as_mut() {
            if let Err(why) = client.close(1000).await {
                debug!("Error closing websocket: {why:?}");
            }
        }

        self.client = None;
        self.clear_session();
        self.reset_connection_state();
        self.set_stage(ConnectionStage::Disconnected);
    }

    /// Queues a presence update. Valid only while the session is Ready.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotReady`] outside the Ready stage.
    pub fn update_presence(
        &mut self,
        status: OnlineStatus,
        activity: Option<ActivityData>,
    ) -> Result<()> {
        if self.stage != ConnectionStage::Ready {
            return Err(Error::Gateway(GatewayError::NotReady));
        }

        let presence = PresenceData {
            activity,
            status,
        };
        let payload = ws::presence_payload(&presence)?;

        self.enqueue(Opcode::PresenceUpdate, payload, false)
    }

    /// Requests that one guild be chunked, yielding `GUILD_MEMBERS_CHUNK`
    /// dispatches.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidParameter`] for an empty or over-100
    /// user id list, or a nonce longer than 32 bytes.
    pub fn request_guild_members(
        &mut self,
        guild_id: GuildId,
        limit: Option<u16>,
        presences: bool,
        filter: ChunkGuildFilter,
        nonce: Option<&str>,
    ) -> Result<()> {
        if let ChunkGuildFilter::UserIds(user_ids) = &filter {
            if user_ids.is_empty() || user_ids.len() > 100 {
                return Err(Error::Gateway(GatewayError::InvalidParameter("user_ids")));
            }
        }

        if nonce.is_some_and(|nonce| nonce.len() > 32) {
            return Err(Error::Gateway(GatewayError::InvalidParameter("nonce")));
        }

        let payload = ws::chunk_guild_payload(guild_id, limit, presences, &filter, nonce)?;
        self.enqueue(Opcode::RequestGuildMembers, payload, false)
    }

    /// Requests the soundboard sounds of one or more guilds.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidParameter`] for an empty guild list.
    pub fn request_soundboard_sounds(&mut self, guild_ids: &[GuildId]) -> Result<()> {
        if guild_ids.is_empty() {
            return Err(Error::Gateway(GatewayError::InvalidParameter("guild_ids")));
        }

        let payload = ws::soundboard_sounds_payload(guild_ids)?;
        self.enqueue(Opcode::RequestSoundboardSounds, payload, false)
    }

    /// Queues a voice state update. A `None` channel disconnects from voice.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize or exceeds the
    /// outgoing size cap.
    pub fn update_voice_state(
        &mut self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        let payload = ws::voice_state_payload(guild_id, channel_id, self_mute, self_deaf)?;
        self.enqueue(Opcode::VoiceStateUpdate, payload, false)
    }

    fn set_stage(&mut self, stage: ConnectionStage) {
        if self.stage == stage {
            return;
        }

        trace!("Stage {} -> {}", self.stage, stage);
        self.stage = stage;

        if let Some(sink) = &self.config.sink {
            sink.on_state(stage);
        }
    }

    fn clear_session(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.should_resume = false;
        self.seq = None;
        self.last_dispatch_seq = None;
    }

    /// Tears down the per-connection state ahead of a reconnect: heartbeat
    /// and identify timers, the send window, buffers, and the inflate stream.
    fn reset_connection_state(&mut self) {
        self.heartbeat_interval = None;
        self.next_heartbeat = None;
        self.last_heartbeat_sent = None;
        self.last_heartbeat_ack = None;
        self.last_heartbeat_acknowledged = true;
        self.last_identify = None;
        self.send_window = SendWindow::default();
        self.outbox.clear();
        self.client = None;

        if let Some(inflater) = &mut self.inflater {
            inflater.reset();
        }
    }

    fn schedule_reconnect(&mut self) {
        let backoff =
            Duration::from_secs((1u64 << self.reconnect_attempts.min(5)).min(30));
        let jitter = backoff.mul_f64(fastrand::f64() / 5.0);
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);

        self.schedule_reconnect_in(backoff + jitter);
    }

    fn schedule_reconnect_in(&mut self, delay: Duration) {
        debug!("Reconnecting in {delay:?}");
        self.reset_connection_state();
        self.reconnect_at = Some(Instant::now() + delay);
        self.set_stage(ConnectionStage::Reconnecting);
    }

    fn enqueue(&mut self, opcode: Opcode, json: String, urgent: bool) -> Result<()> {
        self.enqueue_at(opcode, json, urgent, Instant::now())
    }

    fn enqueue_at(
        &mut self,
        opcode: Opcode,
        json: String,
        urgent: bool,
        due: Instant,
    ) -> Result<()> {
        if json.len() > constants::GATEWAY_PAYLOAD_LIMIT {
            return Err(Error::Gateway(GatewayError::PayloadTooLarge));
        }

        let message = OutgoingMessage {
            opcode,
            json,
            due,
        };

        if urgent {
            self.outbox.push_front(message);
        } else {
            self.outbox.push_back(message);
        }

        Ok(())
    }

    fn queue_heartbeat(&mut self) -> Result<()> {
        trace!("Sending heartbeat d: {:?}", self.seq);
        let payload = ws::heartbeat_payload(self.seq)?;
        self.enqueue(Opcode::Heartbeat, payload, true)?;

        self.last_heartbeat_sent = Some(Instant::now());
        self.last_heartbeat_acknowledged = false;

        Ok(())
    }

    fn queue_identify(&mut self) -> Result<()> {
        debug!("Identifying");

        let shard = (self.config.shard_count > 0)
            .then(|| ShardInfo::new(self.config.shard_id, self.config.shard_count));
        let payload = ws::identify_payload(
            self.config.token.expose_secret(),
            self.config.intents,
            shard,
            self.config.large_threshold,
            self.config.payload_compression,
        )?;

        // Identifies are spaced at least five seconds apart; a deferred one
        // sits in the outbox until its due time.
        let now = Instant::now();
        let due = match self.last_identify {
            Some(last) if last + constants::IDENTIFY_DELAY > now => {
                last + constants::IDENTIFY_DELAY
            },
            _ => now,
        };

        self.enqueue_at(Opcode::Identify, payload, true, due)
    }

    fn queue_resume(&mut self) -> Result<()> {
        let session_id = match self.session_id.clone() {
            Some(session_id) => session_id,
            None => return Err(Error::Gateway(GatewayError::NoSessionId)),
        };
        let seq = self.seq.unwrap_or(0);

        debug!("Sending resume; seq: {seq}");

        let payload =
            ws::resume_payload(self.config.token.expose_secret(), &session_id, seq)?;
        self.enqueue(Opcode::Resume, payload, true)
    }

    /// Enqueues a heartbeat if one is due, and declares the connection
    /// zombied when the previous one went unacknowledged past its patience.
    fn check_heartbeat(&mut self) -> Result<()> {
        let Some(interval) = self.heartbeat_interval else {
            return Ok(());
        };
        let now = Instant::now();

        if !self.last_heartbeat_acknowledged {
            if let Some(sent) = self.last_heartbeat_sent {
                let patience = self.config.heartbeat_timeout.max(interval);
                if now.duration_since(sent) >= patience {
                    warn!("Heartbeat not acknowledged for {patience:?}; reconnecting");
                    self.schedule_reconnect();
                    return Err(Error::Gateway(GatewayError::HeartbeatTimeout));
                }
            }
        }

        if self.next_heartbeat.is_some_and(|due| now >= due) {
            self.queue_heartbeat()?;
            self.next_heartbeat = self.next_heartbeat.map(|due| due + interval);
        }

        Ok(())
    }

    /// Sends every due message the send window allows. Urgent messages sit at
    /// the front of the queue; a deferred message (an identify waiting out
    /// its spacing) does not block the ones behind it.
    async fn drain_outbox(&mut self) {
        loop {
            let now = Instant::now();

            if self.client.is_none() || !self.send_window.open(now) {
                return;
            }

            let Some(pos) = self.outbox.iter().position(|message| message.due <= now) else {
                return;
            };
            let Some(message) = self.outbox.remove(pos) else {
                return;
            };

            let sent = match self.client.as_mut() {
                Some(client) => client.send_text(message.json).await,
                None => return,
            };

            if let Err(why) = sent {
                warn!("Error sending gateway message: {why}");
                self.schedule_reconnect();
                return;
            }

            self.send_window.record(now);

            if message.opcode == Opcode::Identify {
                self.last_identify = Some(Instant::now());
            }
        }
    }

    fn handle_message(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Text(text) => self.handle_payload(&text),
            Message::Binary(bytes) => {
                let text = match &mut self.inflater {
                    Some(inflater) => match inflater.inflate(&bytes)? {
                        Some(text) => text,
                        None => return Ok(()),
                    },
                    None => {
                        // Payload compression: each binary message is one
                        // complete zlib document.
                        let mut decompressed = String::with_capacity(bytes.len() * 3);
                        ZlibDecoder::new(&bytes[..])
                            .read_to_string(&mut decompressed)
                            .map_err(|why| {
                                warn!("Error decompressing bytes: {why:?}");
                                Error::Gateway(GatewayError::Compression)
                            })?;

                        decompressed
                    },
                };

                self.handle_payload(&text)
            },
            Message::Close(frame) => self.handle_close(frame.map(|frame| frame.code.into())),
            _ => Ok(()),
        }
    }

    fn handle_payload(&mut self, text: &str) -> Result<()> {
        let event = GatewayEvent::decode(text)?;
        self.handle_event(event)
    }

    fn handle_event(&mut self, event: GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::Hello {
                heartbeat_interval,
            } => {
                debug!("Received a Hello; interval: {heartbeat_interval}");

                let interval = Duration::from_millis(heartbeat_interval);
                self.heartbeat_interval = Some(interval);
                self.last_heartbeat_acknowledged = true;
                // The first heartbeat lands at a random point in the interval
                // so a fleet of shards does not beat in lockstep.
                self.next_heartbeat = Some(Instant::now() + interval.mul_f64(fastrand::f64()));

                let resumable = self.should_resume
                    && self.seq.is_some()
                    && self.session_id.is_some()
                    && self.resume_url.is_some();

                if resumable {
                    self.queue_resume()?;
                    self.set_stage(ConnectionStage::Resuming);
                } else {
                    self.queue_identify()?;
                    self.set_stage(ConnectionStage::Identifying);
                }
            },
            GatewayEvent::Dispatch {
                seq,
                event_type,
                data,
            } => self.handle_dispatch(seq, &event_type, data)?,
            GatewayEvent::Heartbeat => {
                info!("Received gateway heartbeat request");
                self.queue_heartbeat()?;
            },
            GatewayEvent::HeartbeatAck => {
                trace!("Received heartbeat ack");
                self.last_heartbeat_ack = Some(Instant::now());
                self.last_heartbeat_acknowledged = true;
            },
            GatewayEvent::Reconnect => {
                info!("Gateway requested a reconnect");
                self.schedule_reconnect();
            },
            GatewayEvent::InvalidSession {
                resumable,
            } => {
                info!("Received session invalidation; resumable: {resumable}");

                self.outbox.clear();
                if !resumable {
                    self.clear_session();
                }

                let delay = Duration::from_millis(fastrand::u64(1_000..=5_000));
                self.schedule_reconnect_in(delay);
            },
            GatewayEvent::Unknown {
                op,
            } => {
                info!("Received an unknown opcode: {op}");
            },
        }

        Ok(())
    }

    fn handle_dispatch(&mut self, seq: Option<u64>, event_type: &str, data: Value) -> Result<()> {
        if let Some(s) = seq {
            if self.last_dispatch_seq.is_some_and(|last| s <= last) {
                trace!("Dropping duplicate dispatch; seq: {s}");
                return Ok(());
            }

            self.last_dispatch_seq = Some(s);
            if self.seq.map_or(true, |current| s > current) {
                self.seq = Some(s);
            }
        }

        match event_type {
            "READY" => {
                debug!("Received Ready");

                self.session_id = data
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                self.resume_url = data
                    .get("resume_gateway_url")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                self.should_resume = true;

                self.set_stage(ConnectionStage::Ready);
            },
            "RESUMED" => {
                info!("Resumed");
                self.set_stage(ConnectionStage::Ready);
            },
            _ => {},
        }

        if let Some(sink) = &self.config.sink {
            let payload = json::to_string(&data)?;
            sink.on_event(event_type, &payload);
        }

        Ok(())
    }

    /// Applies the close-code table: fatal codes surface an error and stay
    /// down, 4007/4009 force a fresh identify but still reconnect, everything
    /// else reconnects (resuming where the session survived).
    fn handle_close(&mut self, code: Option<u16>) -> Result<()> {
        let clean = code == Some(1000);

        match code {
            Some(close_codes::AUTHENTICATION_FAILED) => {
                return self.fatal_close(GatewayError::InvalidAuthentication);
            },
            Some(close_codes::INVALID_GATEWAY_INTENTS) => {
                return self.fatal_close(GatewayError::InvalidGatewayIntents);
            },
            Some(close_codes::DISALLOWED_GATEWAY_INTENTS) => {
                return self.fatal_close(GatewayError::DisallowedGatewayIntents);
            },
            Some(close_codes::INVALID_SHARD) => {
                return self.fatal_close(GatewayError::InvalidShardData);
            },
            Some(close_codes::SHARDING_REQUIRED) => {
                return self.fatal_close(GatewayError::OverloadedShard);
            },
            Some(close_codes::INVALID_API_VERSION) => {
                return self.fatal_close(GatewayError::InvalidApiVersion);
            },
            Some(close_codes::INVALID_SEQUENCE) | Some(close_codes::SESSION_TIMEOUT) => {
                info!("Session is gone (close code {code:?}); re-identifying");
                self.clear_session();
            },
            Some(other) if !clean => {
                warn!("Unclean close: {other}");
            },
            _ => {
                debug!("Connection closed (code {code:?})");
            },
        }

        self.schedule_reconnect();
        Ok(())
    }

    fn fatal_close(&mut self, error: GatewayError) -> Result<()> {
        warn!("Fatal close: {error}");

        self.clear_session();
        self.reset_connection_state();
        self.reconnect_at = None;
        self.set_stage(ConnectionStage::Disconnected);

        Err(Error::Gateway(error))
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("stage", &self.stage)
            .field("seq", &self.seq)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::json::json;
    use crate::ErrorKind;

    #[derive(Clone, Default)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<(String, String)>>>,
        stages: Arc<Mutex<Vec<ConnectionStage>>>,
    }

    impl EventSink for RecordingSink {
        fn on_event(&self, name: &str, data: &str) {
            self.events.lock().expect("not poisoned").push((name.to_owned(), data.to_owned()));
        }

        fn on_state(&self, stage: ConnectionStage) {
            self.stages.lock().expect("not poisoned").push(stage);
        }
    }

    fn shard() -> Shard {
        Shard::new(GatewayConfig::new("token", GatewayIntents::GUILDS)).expect("valid config")
    }

    fn shard_with_sink() -> (Shard, RecordingSink) {
        let sink = RecordingSink::default();
        let mut config = GatewayConfig::new("token", GatewayIntents::GUILDS);
        config.sink = Some(Box::new(sink.clone()));

        (Shard::new(config).expect("valid config"), sink)
    }

    fn ready_dispatch(seq: u64) -> GatewayEvent {
        GatewayEvent::Dispatch {
            seq: Some(seq),
            event_type: "READY".to_owned(),
            data: json!({
                "session_id": "deadbeef",
                "resume_gateway_url": "wss://gateway-us-east1-b.discord.gg",
            }),
        }
    }

    #[test]
    fn rejects_invalid_configurations() {
        let err = |config: GatewayConfig| {
            Shard::new(config).expect_err("invalid config").kind()
        };

        let empty_token = GatewayConfig::new("  ", GatewayIntents::empty());
        assert_eq!(err(empty_token), ErrorKind::InvalidParam);

        let mut bad_shard = GatewayConfig::new("token", GatewayIntents::empty());
        bad_shard.shard_id = 2;
        bad_shard.shard_count = 2;
        assert_eq!(err(bad_shard), ErrorKind::InvalidParam);

        let mut bad_threshold = GatewayConfig::new("token", GatewayIntents::empty());
        bad_threshold.large_threshold = 10;
        assert_eq!(err(bad_threshold), ErrorKind::InvalidParam);

        let mut both_compressions = GatewayConfig::new("token", GatewayIntents::empty());
        both_compressions.transport_compression = true;
        both_compressions.payload_compression = true;
        assert_eq!(err(both_compressions), ErrorKind::InvalidParam);

        let mut zero_count = GatewayConfig::new("token", GatewayIntents::empty());
        zero_count.shard_id = 1;
        zero_count.shard_count = 0;
        assert_eq!(err(zero_count), ErrorKind::InvalidParam);
    }

    #[test]
    fn hello_without_session_queues_identify() {
        let mut shard = shard();
        let before = Instant::now();

        shard
            .handle_event(GatewayEvent::Hello {
                heartbeat_interval: 45_000,
            })
            .expect("hello handled");

        assert_eq!(shard.stage(), ConnectionStage::Identifying);

        let front = shard.outbox.front().expect("identify queued");
        assert_eq!(front.opcode, Opcode::Identify);

        // First heartbeat lands somewhere within one interval.
        let next = shard.next_heartbeat.expect("heartbeat scheduled");
        assert!(next >= before);
        assert!(next <= before + Duration::from_millis(45_000) + Duration::from_secs(1));
    }

    #[test]
    fn hello_with_live_session_queues_resume() {
        let mut shard = shard();
        shard.handle_event(ready_dispatch(1)).expect("ready handled");
        assert_eq!(shard.stage(), ConnectionStage::Ready);
        assert_eq!(shard.session_id(), Some("deadbeef"));

        shard
            .handle_event(GatewayEvent::Hello {
                heartbeat_interval: 45_000,
            })
            .expect("hello handled");

        assert_eq!(shard.stage(), ConnectionStage::Resuming);
        let front = shard.outbox.front().expect("resume queued");
        assert_eq!(front.opcode, Opcode::Resume);
        assert!(front.json.contains("deadbeef"));
    }

    #[test]
    fn invalid_session_clears_outbox_and_schedules_reconnect() {
        let mut shard = shard();
        shard.handle_event(ready_dispatch(1)).expect("ready handled");
        shard
            .enqueue(Opcode::PresenceUpdate, "{}".to_owned(), false)
            .expect("enqueue fits");

        let before = Instant::now();
        shard
            .handle_event(GatewayEvent::InvalidSession {
                resumable: false,
            })
            .expect("invalid session handled");

        assert!(shard.outbox.is_empty());
        assert_eq!(shard.session_id(), None);
        assert!(!shard.should_resume);
        assert_eq!(shard.stage(), ConnectionStage::Reconnecting);

        let at = shard.reconnect_at.expect("reconnect scheduled");
        let delay = at.duration_since(before);
        assert!(delay >= Duration::from_millis(900), "delay was {delay:?}");
        assert!(delay <= Duration::from_millis(5_100), "delay was {delay:?}");
    }

    #[test]
    fn resumable_invalid_session_keeps_the_session() {
        let mut shard = shard();
        shard.handle_event(ready_dispatch(1)).expect("ready handled");

        shard
            .handle_event(GatewayEvent::InvalidSession {
                resumable: true,
            })
            .expect("invalid session handled");

        assert_eq!(shard.session_id(), Some("deadbeef"));
        assert!(shard.should_resume);
        assert_eq!(shard.stage(), ConnectionStage::Reconnecting);
    }

    #[test]
    fn dispatches_dedupe_on_stale_sequence_numbers() {
        let (mut shard, sink) = shard_with_sink();

        let event = |seq| GatewayEvent::Dispatch {
            seq: Some(seq),
            event_type: "MESSAGE_CREATE".to_owned(),
            data: json!({"id": seq.to_string()}),
        };

        shard.handle_event(event(5)).expect("dispatch handled");
        shard.handle_event(event(5)).expect("duplicate dropped");
        shard.handle_event(event(4)).expect("stale dropped");
        shard.handle_event(event(6)).expect("dispatch handled");

        let events = sink.events.lock().expect("not poisoned");
        assert_eq!(events.len(), 2);
        assert_eq!(shard.seq(), Some(6));
    }

    #[test]
    fn heartbeat_request_queues_urgent_heartbeat() {
        let mut shard = shard();
        shard
            .enqueue(Opcode::PresenceUpdate, "{}".to_owned(), false)
            .expect("enqueue fits");

        shard.handle_event(GatewayEvent::Heartbeat).expect("heartbeat handled");

        let front = shard.outbox.front().expect("heartbeat queued");
        assert_eq!(front.opcode, Opcode::Heartbeat);
        assert!(!shard.last_heartbeat_acknowledged);
    }

    #[test]
    fn due_heartbeat_is_queued_and_rescheduled() {
        let mut shard = shard();
        let interval = Duration::from_millis(100);
        shard.heartbeat_interval = Some(interval);
        let due = Instant::now() - Duration::from_millis(1);
        shard.next_heartbeat = Some(due);

        shard.check_heartbeat().expect("heartbeat queued");

        let front = shard.outbox.front().expect("heartbeat queued");
        assert_eq!(front.opcode, Opcode::Heartbeat);
        assert_eq!(front.json, r#"{"op":1,"d":null}"#);
        assert!(!shard.last_heartbeat_acknowledged);
        assert_eq!(shard.next_heartbeat, Some(due + interval));
    }

    #[test]
    fn unacked_heartbeat_times_out_and_reconnects() {
        let mut shard = shard();
        let interval = Duration::from_millis(50);
        shard.heartbeat_interval = Some(interval);
        shard.last_heartbeat_acknowledged = false;
        shard.last_heartbeat_sent = Some(Instant::now() - Duration::from_millis(200));

        let err = shard.check_heartbeat().expect_err("zombied connection");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(shard.reconnect_at.is_some());
        assert_eq!(shard.stage(), ConnectionStage::Reconnecting);
    }

    #[test]
    fn heartbeat_ack_clears_the_flag() {
        let mut shard = shard();
        shard.last_heartbeat_acknowledged = false;
        shard.last_heartbeat_sent = Some(Instant::now() - Duration::from_millis(5));

        shard.handle_event(GatewayEvent::HeartbeatAck).expect("ack handled");

        assert!(shard.last_heartbeat_acknowledged);
        assert!(shard.latency().is_some());
    }

    #[test]
    fn fatal_close_codes_surface_and_stay_down() {
        let cases = [
            (close_codes::AUTHENTICATION_FAILED, ErrorKind::Unauthorized),
            (close_codes::INVALID_GATEWAY_INTENTS, ErrorKind::InvalidParam),
            (close_codes::DISALLOWED_GATEWAY_INTENTS, ErrorKind::InvalidParam),
            (close_codes::SHARDING_REQUIRED, ErrorKind::InvalidState),
        ];

        for (code, kind) in cases {
            let mut shard = shard();
            shard.handle_event(ready_dispatch(1)).expect("ready handled");

            let err = shard.handle_close(Some(code)).expect_err("fatal close");
            assert_eq!(err.kind(), kind, "close code {code}");
            assert_eq!(shard.session_id(), None);
            assert_eq!(shard.reconnect_at, None);
            assert_eq!(shard.stage(), ConnectionStage::Disconnected);
        }
    }

    #[test]
    fn invalid_sequence_close_reidentifies_but_reconnects() {
        let mut shard = shard();
        shard.handle_event(ready_dispatch(1)).expect("ready handled");

        shard.handle_close(Some(close_codes::INVALID_SEQUENCE)).expect("recoverable close");

        assert_eq!(shard.session_id(), None);
        assert!(!shard.should_resume);
        assert!(shard.reconnect_at.is_some());
        assert_eq!(shard.stage(), ConnectionStage::Reconnecting);
    }

    #[test]
    fn unclean_close_resumes_where_possible() {
        let mut shard = shard();
        shard.handle_event(ready_dispatch(1)).expect("ready handled");

        shard.handle_close(Some(close_codes::UNKNOWN_ERROR)).expect("recoverable close");

        assert_eq!(shard.session_id(), Some("deadbeef"));
        assert!(shard.should_resume);
        assert!(shard.reconnect_at.is_some());
    }

    #[test]
    fn urgent_messages_jump_the_queue() {
        let mut shard = shard();
        shard
            .enqueue(Opcode::PresenceUpdate, "{}".to_owned(), false)
            .expect("enqueue fits");
        shard.enqueue(Opcode::Heartbeat, "{}".to_owned(), true).expect("enqueue fits");

        assert_eq!(shard.outbox.front().expect("non-empty").opcode, Opcode::Heartbeat);
        assert_eq!(shard.outbox.back().expect("non-empty").opcode, Opcode::PresenceUpdate);
    }

    #[test]
    fn oversized_payloads_are_rejected_at_enqueue() {
        let mut shard = shard();
        let oversized = "x".repeat(constants::GATEWAY_PAYLOAD_LIMIT + 1);

        let err = shard
            .enqueue(Opcode::PresenceUpdate, oversized, false)
            .expect_err("payload too large");
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
        assert!(shard.outbox.is_empty());
    }

    #[test]
    fn identify_spacing_defers_the_due_time() {
        let mut shard = shard();
        shard.last_identify = Some(Instant::now());

        shard.queue_identify().expect("identify queued");

        let front = shard.outbox.front().expect("identify queued");
        let wait = front.due.duration_since(Instant::now());
        assert!(wait >= Duration::from_millis(4_900), "wait was {wait:?}");
    }

    #[test]
    fn send_window_blocks_at_the_limit() {
        let mut window = SendWindow::default();
        let start = Instant::now();

        assert!(window.open(start));
        for _ in 0..constants::GATEWAY_SEND_LIMIT {
            window.record(start);
        }

        assert!(!window.open(start + Duration::from_secs(1)));
        // Past the window end the budget resets.
        assert!(window.open(start + constants::GATEWAY_SEND_WINDOW + Duration::from_secs(1)));
        window.record(start + constants::GATEWAY_SEND_WINDOW + Duration::from_secs(1));
        assert_eq!(window.sent, 1);
    }

    #[test]
    fn update_presence_requires_ready() {
        let mut shard = shard();

        let err = shard
            .update_presence(OnlineStatus::Idle, Some(ActivityData::playing("Factorio")))
            .expect_err("not ready");
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        shard.handle_event(ready_dispatch(1)).expect("ready handled");
        shard
            .update_presence(OnlineStatus::Idle, Some(ActivityData::playing("Factorio")))
            .expect("presence queued");
        assert_eq!(shard.outbox.back().expect("queued").opcode, Opcode::PresenceUpdate);
    }

    #[test]
    fn guild_member_request_validation() {
        let mut shard = shard();

        let too_many = ChunkGuildFilter::UserIds(
            (0..101u64).map(crate::model::id::UserId::new).collect(),
        );
        let err = shard
            .request_guild_members(GuildId::new(1), None, false, too_many, None)
            .expect_err("over the cap");
        assert_eq!(err.kind(), ErrorKind::InvalidParam);

        let long_nonce = "n".repeat(33);
        let err = shard
            .request_guild_members(
                GuildId::new(1),
                None,
                false,
                ChunkGuildFilter::Query("a".to_owned()),
                Some(&long_nonce),
            )
            .expect_err("nonce too long");
        assert_eq!(err.kind(), ErrorKind::InvalidParam);

        shard
            .request_guild_members(
                GuildId::new(1),
                Some(50),
                true,
                ChunkGuildFilter::Query("a".to_owned()),
                Some("nonce"),
            )
            .expect("request queued");
        assert_eq!(
            shard.outbox.back().expect("queued").opcode,
            Opcode::RequestGuildMembers
        );
    }

    #[test]
    fn soundboard_request_needs_at_least_one_guild() {
        let mut shard = shard();

        assert!(shard.request_soundboard_sounds(&[]).is_err());
        shard.request_soundboard_sounds(&[GuildId::new(1)]).expect("request queued");
        assert_eq!(
            shard.outbox.back().expect("queued").opcode,
            Opcode::RequestSoundboardSounds
        );
    }

    #[test]
    fn reconnect_backoff_doubles_and_caps() {
        let mut shard = shard();

        for expected_floor in [1u64, 2, 4, 8, 16, 30, 30] {
            let before = Instant::now();
            shard.schedule_reconnect();
            let delay = shard.reconnect_at.expect("scheduled").duration_since(before);

            // backoff plus at most a fifth of jitter
            assert!(delay >= Duration::from_secs(expected_floor), "delay {delay:?}");
            assert!(
                delay
                    <= Duration::from_secs_f64(expected_floor as f64 * 1.2)
                        + Duration::from_millis(50),
                "delay {delay:?}"
            );
        }
    }

    #[test]
    fn ready_emits_event_and_stage_changes() {
        let (mut shard, sink) = shard_with_sink();

        shard.handle_event(ready_dispatch(1)).expect("ready handled");

        let events = sink.events.lock().expect("not poisoned");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "READY");
        assert!(events[0].1.contains("deadbeef"));

        let stages = sink.stages.lock().expect("not poisoned");
        assert_eq!(stages.as_slice(), &[ConnectionStage::Ready]);
    }
}
