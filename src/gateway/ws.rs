use std::env::consts;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::trace;
use url::Url;

use super::{ActivityData, ChunkGuildFilter, GatewayError, PresenceData};
use crate::constants::{self, Opcode};
use crate::internal::prelude::*;
use crate::json;
use crate::model::gateway::{GatewayIntents, ShardInfo};
use crate::model::id::{ChannelId, GuildId, UserId};

#[derive(Serialize)]
struct WebSocketMessage<T: Serialize> {
    op: Opcode,
    d: T,
}

#[derive(Serialize)]
struct IdentifyProperties {
    browser: &'static str,
    device: &'static str,
    os: &'static str,
}

#[derive(Serialize)]
struct IdentifyMessage<'a> {
    token: &'a str,
    properties: IdentifyProperties,
    intents: GatewayIntents,
    #[serde(skip_serializing_if = "Option::is_none")]
    shard: Option<ShardInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    large_threshold: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compress: Option<bool>,
}

#[derive(Serialize)]
struct ResumeMessage<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}

#[derive(Serialize)]
struct PresenceUpdateMessage<'a> {
    afk: bool,
    since: Option<u64>,
    status: &'a str,
    activities: &'a [ActivityData],
}

#[derive(Serialize)]
struct ChunkGuildMessage<'a> {
    guild_id: GuildId,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    limit: u16,
    presences: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_ids: Option<&'a [UserId]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
}

#[derive(Serialize)]
struct VoiceStateUpdateMessage {
    guild_id: GuildId,
    // `null` means disconnect from voice, so this must always serialize
    channel_id: Option<ChannelId>,
    self_mute: bool,
    self_deaf: bool,
}

#[derive(Serialize)]
struct SoundboardSoundsMessage<'a> {
    guild_ids: &'a [GuildId],
}

pub(super) fn heartbeat_payload(seq: Option<u64>) -> Result<String> {
    json::to_string(&WebSocketMessage {
        op: Opcode::Heartbeat,
        d: seq,
    })
}

pub(super) fn identify_payload(
    token: &str,
    intents: GatewayIntents,
    shard: Option<ShardInfo>,
    large_threshold: u8,
    payload_compression: bool,
) -> Result<String> {
    json::to_string(&WebSocketMessage {
        op: Opcode::Identify,
        d: IdentifyMessage {
            token,
            properties: IdentifyProperties {
                browser: "accord",
                device: "accord",
                os: consts::OS,
            },
            intents,
            shard,
            large_threshold: (large_threshold > 0).then_some(large_threshold),
            compress: payload_compression.then_some(true),
        },
    })
}

pub(super) fn resume_payload(token: &str, session_id: &str, seq: u64) -> Result<String> {
    json::to_string(&WebSocketMessage {
        op: Opcode::Resume,
        d: ResumeMessage {
            token,
            session_id,
            seq,
        },
    })
}

pub(super) fn presence_payload(presence: &PresenceData) -> Result<String> {
    let activities = presence.activity.as_ref().map(std::slice::from_ref).unwrap_or_default();

    json::to_string(&WebSocketMessage {
        op: Opcode::PresenceUpdate,
        d: PresenceUpdateMessage {
            afk: false,
            since: None,
            status: presence.status.name(),
            activities,
        },
    })
}

pub(super) fn chunk_guild_payload(
    guild_id: GuildId,
    limit: Option<u16>,
    presences: bool,
    filter: &ChunkGuildFilter,
    nonce: Option<&str>,
) -> Result<String> {
    let (query, user_ids) = match filter {
        ChunkGuildFilter::None => (Some(""), None),
        ChunkGuildFilter::Query(query) => (Some(query.as_str()), None),
        ChunkGuildFilter::UserIds(user_ids) => (None, Some(user_ids.as_slice())),
    };

    json::to_string(&WebSocketMessage {
        op: Opcode::RequestGuildMembers,
        d: ChunkGuildMessage {
            guild_id,
            query,
            limit: limit.unwrap_or(0),
            presences,
            user_ids,
            nonce,
        },
    })
}

pub(super) fn voice_state_payload(
    guild_id: GuildId,
    channel_id: Option<ChannelId>,
    self_mute: bool,
    self_deaf: bool,
) -> Result<String> {
    json::to_string(&WebSocketMessage {
        op: Opcode::VoiceStateUpdate,
        d: VoiceStateUpdateMessage {
            guild_id,
            channel_id,
            self_mute,
            self_deaf,
        },
    })
}

pub(super) fn soundboard_sounds_payload(guild_ids: &[GuildId]) -> Result<String> {
    json::to_string(&WebSocketMessage {
        op: Opcode::RequestSoundboardSounds,
        d: SoundboardSoundsMessage {
            guild_ids,
        },
    })
}

/// Builds the URL a shard actually connects to: the base URL with `v`,
/// `encoding` and (when transport compression is on) `compress` query
/// parameters filled in.
///
/// Parameters already present must agree: a differing `v` or `encoding`, or a
/// `compress` without compression enabled, is refused rather than silently
/// rewritten.
pub(super) fn build_gateway_url(base: &str, transport_compression: bool) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|_| Error::Gateway(GatewayError::BuildingUrl))?;

    let mut has_version = false;
    let mut has_encoding = false;
    let mut has_compress = false;

    let version = constants::GATEWAY_VERSION.to_string();

    for (key, value) in url.query_pairs() {
        match &*key {
            "v" => {
                if &*value != version.as_str() {
                    return Err(Error::Gateway(GatewayError::InvalidParameter("v")));
                }
                has_version = true;
            },
            "encoding" => {
                if &*value != "json" {
                    return Err(Error::Gateway(GatewayError::InvalidParameter("encoding")));
                }
                has_encoding = true;
            },
            "compress" => {
                if !transport_compression || &*value != "zlib-stream" {
                    return Err(Error::Gateway(GatewayError::InvalidParameter("compress")));
                }
                has_compress = true;
            },
            _ => {},
        }
    }

    if !has_version {
        url.query_pairs_mut().append_pair("v", &version);
    }
    if !has_encoding {
        url.query_pairs_mut().append_pair("encoding", "json");
    }
    if transport_compression && !has_compress {
        url.query_pairs_mut().append_pair("compress", "zlib-stream");
    }

    Ok(url)
}

/// A WebSocket connection to the gateway.
pub struct WsClient(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsClient {
    pub(crate) async fn connect(url: Url) -> Result<Self> {
        let config = WebSocketConfig {
            max_message_size: None,
            max_frame_size: None,
            ..Default::default()
        };
        let (stream, _) = connect_async_with_config(url.as_str(), Some(config), false).await?;

        Ok(Self(stream))
    }

    /// Waits up to `wait` for the next message. `Ok(None)` means the wait
    /// elapsed quietly; an exhausted stream is reported as a close without a
    /// frame.
    pub(crate) async fn recv(&mut self, wait: Duration) -> Result<Option<Message>> {
        match timeout(wait, self.0.next()).await {
            Ok(Some(Ok(message))) => Ok(Some(message)),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Ok(Some(Message::Close(None))),
            Err(_) => Ok(None),
        }
    }

    pub(crate) async fn send_text(&mut self, text: String) -> Result<()> {
        trace!("Sending frame: {text}");
        self.0.send(Message::Text(text)).await?;
        Ok(())
    }

    pub(crate) async fn close(&mut self, code: u16) -> Result<()> {
        self.0
            .close(Some(CloseFrame {
                code: code.into(),
                reason: "".into(),
            }))
            .await?;
        Ok(())
    }
}
