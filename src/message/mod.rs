//! Message types exchanged between pipeline stages
//!
//! Every queue carries [`Message`] envelopes. The envelope holds an id, an integer
//! message type and an opaque JSON payload; the typed payloads defined here are
//! decoded from that payload by the stage that consumes them.

mod types;

pub use types::{
    CompositeAnalysis, FetchRequest, FetchResponse, Message, MessageType, Protocol,
};
