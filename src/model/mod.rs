//! The minimal object mappings the protocol core consumes.
//!
//! Full domain models (guilds, channels, messages, and the rest) are the
//! business of a layer above this crate; the gateway hands events over as raw
//! JSON. What lives here is only what the wire protocols themselves need:
//! type-strong snowflake IDs, the intents bitmask, and the gateway envelope.

pub mod event;
pub mod gateway;
pub mod id;
