//! Manitou dialect (MASXML family, STX/ETX framing).
//!
//! Frames arrive as `STX <xml> ETX`; the reassembler hands this module
//! the inner XML. Two payloads matter: `<Signal Event="...">` events,
//! acknowledged with a freshly generated `RawNo` token, and `<Binary
//! RawNo="..." FrameNo="...">` photo continuations that reference a
//! previously issued token. The connection keeps the `RawNo → event`
//! map so saved photos carry the event code of the signal that started
//! them.

use std::sync::LazyLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use regex::Regex;

use crate::frame::Framing;
use crate::message::{ClassifiedMessage, MediaItem, MessageKind};
use crate::redact::lossy_text;

use super::{Dialect, Reply, ReplyContext};

const STX: char = '\u{02}';
const ETX: char = '\u{03}';

/// Default NAK reason code when the operator did not pick one.
pub const DEFAULT_NAK_CODE: u32 = 10;

static PING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<Heartbeat|<Ping|<MessageType>\s*HEARTBEAT\s*</MessageType>").unwrap()
});

static SIGNAL_EVENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<Signal[^>]*\bEvent="(\w+)""#).unwrap());

static PACKET_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<Packet\b[^>]*\bID="([^"]*)""#).unwrap());

static BINARY_ATTRS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<Binary\b[^>]*\bRawNo="([^"]*)"[^>]*\bFrameNo="([^"]*)""#).unwrap());

static DATA_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Data(?:\s[^>]*)?>(.*?)</Data>").unwrap());

static PACKET_DATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<PacketData>(.*?)</PacketData>").unwrap());

static ACCOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Account>([^<]+)</Account>").unwrap());

/// Random 12-character alphanumeric token (ACK `RawNo`).
fn random_token12() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Random 12-character URL-safe token (NAK `Index`).
///
/// The NAK alphabet differs from the RawNo one: 9 random bytes encode
/// to exactly 12 characters of the URL-safe base64 set.
fn random_urlsafe12() -> String {
    let mut bytes = [0u8; 9];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Manitou dialect adapter.
#[derive(Debug, Default)]
pub struct Manitou;

impl Manitou {
    /// New adapter.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for Manitou {
    fn framing(&self) -> Framing {
        Framing::StxEtx
    }

    fn classify(&self, frame: &[u8]) -> ClassifiedMessage {
        let text = lossy_text(frame);
        let mut msg = ClassifiedMessage::unknown();

        if let Some(caps) = PACKET_ID.captures(&text) {
            msg.sequence = caps[1].to_string();
        }
        if let Some(caps) = ACCOUNT.captures(&text) {
            msg.account = caps[1].to_string();
        }

        if self.is_ping(frame) {
            msg.kind = MessageKind::Ping;
            return msg;
        }

        if let Some(caps) = BINARY_ATTRS.captures(&text) {
            let raw_no = caps[1].to_string();
            let frame_no = caps[2].to_string();
            let data = DATA_BODY
                .captures(&text)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            msg.kind = MessageKind::Binary;
            msg.media.push(MediaItem::Base64 {
                data,
                raw_no: Some(raw_no),
                frame_no: Some(frame_no),
            });
            return msg;
        }

        if let Some(caps) = SIGNAL_EVENT.captures(&text) {
            msg.code = Some(caps[1].to_string());
            if let Some(b64) = PACKET_DATA.captures(&text) {
                msg.kind = MessageKind::Photo;
                msg.media.push(MediaItem::Base64 {
                    data: b64[1].to_string(),
                    raw_no: None,
                    frame_no: None,
                });
            } else {
                msg.kind = MessageKind::Event;
            }
        }
        msg
    }

    fn is_ping(&self, frame: &[u8]) -> bool {
        PING.is_match(&lossy_text(frame))
    }

    fn ack(&self, msg: &ClassifiedMessage, _ctx: &ReplyContext) -> Reply {
        let raw_no = random_token12();
        let payload = format!("<?xml version=\"1.0\"?><Ack><RawNo>{raw_no}</RawNo></Ack>");
        let bytes = format!("{STX}{payload}{ETX}").into_bytes();
        // Only Signal acks establish a correlation; heartbeat and
        // Binary acks carry a token the panel will never reference.
        let token =
            (msg.code.is_some() && msg.kind != MessageKind::Binary).then_some(raw_no);
        Reply { bytes, token }
    }

    fn nak(&self, _msg: &ClassifiedMessage, ctx: &ReplyContext) -> Reply {
        let index = random_urlsafe12();
        let code = ctx.nak_code.unwrap_or(DEFAULT_NAK_CODE);
        let payload = format!("<?xml version=\"1.0\"?><Nak Index=\"{index}\" Code=\"{code}\"/>");
        Reply::plain(format!("{STX}{payload}{ETX}").into_bytes())
    }

    /// Heartbeats stay acknowledged even in NAK mode.
    fn nak_applies_to_ping(&self) -> bool {
        false
    }

    /// NAK mode hard-closes the connection after the write.
    fn close_after_nak(&self) -> bool {
        true
    }
}
