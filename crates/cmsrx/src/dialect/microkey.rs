//! Micro Key dialect.
//!
//! Text frames carrying one or more `<Signal>` blocks, terminated by
//! `</Signals><Checksum>XXXX</Checksum>`. A frame with
//! `<SignalCount>0</SignalCount>` is a heartbeat. Signals classify
//! individually (photo / link / event) and the frame label aggregates
//! per category with counts, e.g. `[PHOTO E130 x3] [EVENT R145]`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::frame::Framing;
use crate::label::{self, Category};
use crate::message::{ClassifiedMessage, MessageKind};
use crate::redact::lossy_text;

use super::{Dialect, Reply, ReplyContext};

/// Event codes that are photos even without a recognizable URL.
static PHOTO_CODES: &[&str] = &["E130"];

/// Explicit per-code category overrides, consulted before URL
/// heuristics. E761 is intentionally absent: an E761 with image-like
/// URLs must classify as PHOTO.
static CODE_OVERRIDES: LazyLock<HashMap<&'static str, Category>> =
    LazyLock::new(|| HashMap::from([("E130", Category::Photo)]));

static SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Sequence>(\d+)</Sequence>").unwrap());

static SIGNAL_COUNT_ZERO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<SignalCount>\s*0\s*</SignalCount>").unwrap());

static STATUS_PING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Ping|<Status>PING</Status>").unwrap());

static SIGNAL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Signal>(.*?)</Signal>").unwrap());

static SIGNAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<SignalIdentifier>(.*?)</SignalIdentifier>").unwrap());

static ACCOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Account>(.*?)</Account>").unwrap());

/// Micro Key dialect adapter.
#[derive(Debug, Default)]
pub struct Microkey;

impl Microkey {
    /// New adapter.
    pub fn new() -> Self {
        Self
    }

    /// Classify one signal block.
    ///
    /// Priority: explicit code override, image-like URL, photo-code
    /// whitelist, any URL, plain event.
    fn classify_signal(code: &str, raw: &str) -> Category {
        if let Some(&category) = CODE_OVERRIDES.get(code) {
            return category;
        }
        if label::looks_like_image_url(raw) {
            return Category::Photo;
        }
        if PHOTO_CODES.contains(&code) {
            return Category::Photo;
        }
        if label::has_any_url(raw) {
            return Category::Link;
        }
        Category::Event
    }
}

impl Dialect for Microkey {
    fn framing(&self) -> Framing {
        Framing::MicrokeyChecksum
    }

    fn classify(&self, frame: &[u8]) -> ClassifiedMessage {
        let text = lossy_text(frame);
        let mut msg = ClassifiedMessage::unknown();

        if let Some(caps) = SEQUENCE.captures(&text) {
            msg.sequence = caps[1].to_string();
        }
        if let Some(caps) = ACCOUNT.captures(&text) {
            msg.account = caps[1].trim().to_string();
        }

        if self.is_ping(frame) {
            msg.kind = MessageKind::Ping;
            return msg;
        }

        let classified: Vec<(Category, String)> = SIGNAL_BLOCK
            .captures_iter(&text)
            .map(|block| {
                let raw = &block[1];
                let code = SIGNAL_ID
                    .captures(raw)
                    .map(|c| c[1].trim().to_string())
                    .unwrap_or_default();
                (Self::classify_signal(&code, raw), code)
            })
            .collect();

        if classified.is_empty() {
            return msg;
        }

        msg.code = classified
            .iter()
            .map(|(_, code)| code.clone())
            .find(|code| !code.is_empty());
        msg.kind = if classified.iter().any(|(c, _)| *c == Category::Photo) {
            MessageKind::Photo
        } else if classified.iter().any(|(c, _)| *c == Category::Link) {
            MessageKind::Link
        } else {
            MessageKind::Event
        };
        msg.labels = label::aggregate(classified);
        msg
    }

    fn is_ping(&self, frame: &[u8]) -> bool {
        let text = lossy_text(frame);
        SIGNAL_COUNT_ZERO.is_match(&text) || STATUS_PING.is_match(&text)
    }

    fn ack(&self, msg: &ClassifiedMessage, _ctx: &ReplyContext) -> Reply {
        let body = format!(
            "\r<Response><Sequence>{}</Sequence><Status>ACK</Status></Response>\
             <Checksum>4FE9</Checksum>\n",
            msg.sequence
        );
        Reply::plain(body.into_bytes())
    }

    fn nak(&self, msg: &ClassifiedMessage, _ctx: &ReplyContext) -> Reply {
        let body = format!(
            "\r<Response><Sequence>{}</Sequence><Status>NAK</Status>\
             <Error>Checksum error</Error></Response><Checksum>0000</Checksum>\n",
            msg.sequence
        );
        Reply::plain(body.into_bytes())
    }
}
