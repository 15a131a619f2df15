//! Accord is a Rust library for the core of the Discord API: the rate-limited
//! REST client and the gateway client.
//!
//! The [`http`] module performs requests against the REST API. Every request
//! goes through the [`Http`] client, which tracks Discord's per-route rate
//! limit buckets, the client-wide global window, and the invalid-request
//! safety window, sleeping and retrying so that callers never have to care
//! about 429s.
//!
//! The [`gateway`] module maintains a WebSocket connection to Discord. The
//! [`Shard`] negotiates the session handshake, heartbeats on the cadence the
//! gateway dictates, resumes dropped sessions where possible, and hands
//! dispatched events to an [`EventSink`] supplied by the application.
//!
//! Domain object models are intentionally not part of this crate: dispatched
//! events are delivered as the event name plus the raw JSON of the payload,
//! and REST responses expose their bodies as bytes with a typed decode helper.
//!
//! Note that, although this documentation will try to be as up-to-date and
//! accurate as possible, Discord hosts [official documentation][docs]. If you
//! need to be sure that some information piece is sanctioned by Discord, refer
//! to their own documentation.
//!
//! [`EventSink`]: crate::gateway::EventSink
//! [`Http`]: crate::http::Http
//! [`Shard`]: crate::gateway::Shard
//! [docs]: https://discord.com/developers/docs/intro
#![doc(html_root_url = "https://docs.rs/accord/*")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

#[macro_use]
mod internal;

pub mod constants;
pub mod gateway;
pub mod http;
pub mod json;
pub mod model;

mod error;
mod secret_string;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::secret_string::SecretString;
