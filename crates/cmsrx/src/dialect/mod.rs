//! Dialect adapters.
//!
//! Every receiver speaks one dialect: a framing rule, a parser, and a
//! pair of response builders. The connection handler is generic over
//! this trait; the per-protocol quirks (hard-close on NAK, heartbeat
//! exemptions) surface as small policy hooks instead of special cases
//! in the handler.

pub mod manitou;
pub mod masxml;
pub mod microkey;
pub mod sentinel;
pub mod sia_dc09;

use crate::frame::Framing;
use crate::message::ClassifiedMessage;

/// Inputs the mode engine contributes to a reply.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    /// Timestamp substituted into replies that carry one (SIA).
    pub timestamp: String,
    /// Operator-selected NAK result code, when one was set.
    pub nak_code: Option<u32>,
}

impl ReplyContext {
    /// Context with a fixed timestamp and no NAK code override.
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            nak_code: None,
        }
    }
}

/// A built wire reply.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Exact bytes to write back to the panel.
    pub bytes: Vec<u8>,
    /// Correlation token issued inside the reply (Manitou `RawNo`),
    /// kept by the connection so later binary frames can be attributed
    /// to the originating event.
    pub token: Option<String>,
}

impl Reply {
    /// A reply with no correlation token.
    pub fn plain(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            token: None,
        }
    }
}

/// One protocol dialect: framing boundary, parser, and response builders.
pub trait Dialect: Send + Sync {
    /// The frame boundary rule for this dialect.
    fn framing(&self) -> Framing;

    /// Parse and classify a complete frame. Never fails: an
    /// unrecognizable frame classifies as `Unknown`.
    fn classify(&self, frame: &[u8]) -> ClassifiedMessage;

    /// True when the frame is a heartbeat.
    fn is_ping(&self, frame: &[u8]) -> bool;

    /// Build a positive acknowledgement.
    fn ack(&self, msg: &ClassifiedMessage, ctx: &ReplyContext) -> Reply;

    /// Build a negative acknowledgement.
    fn nak(&self, msg: &ClassifiedMessage, ctx: &ReplyContext) -> Reply;

    /// Whether NAK mode rejects heartbeats too. Manitou exempts them.
    fn nak_applies_to_ping(&self) -> bool {
        true
    }

    /// Whether the connection is closed right after writing a NAK.
    fn close_after_nak(&self) -> bool {
        false
    }
}
