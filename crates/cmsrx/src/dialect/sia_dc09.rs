//! SIA-DC09 dialect (also carries ADM-CID event coding).
//!
//! Frames look like `4AA9003C"SIA-DCS"0001R0L0A0#acct[...]` and are
//! terminated by `\r`. Identity fields are recovered through a fallback
//! ladder: the strict compound header first, then looser and looser
//! searches, with neutral defaults when everything misses. A miss is
//! never an error; the frame still gets a generic acknowledgement.

use std::sync::LazyLock;

use regex::Regex;

use crate::frame::Framing;
use crate::label::{self, Category};
use crate::message::{ClassifiedMessage, MediaItem, MessageKind};
use crate::redact::lossy_text;

use super::{Dialect, Reply, ReplyContext};

/// Compound header: CRC, length, quoted type, sequence, receiver, line,
/// optional area, account.
static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^([0-9A-Fa-f]{4})([0-9A-Fa-f]{4})"([A-Za-z\-\*]+)"(\d{4})(R\d+)?(L\d+)(A\d+)?#(\w+)"#,
    )
    .unwrap()
});

/// Loose search: quoted type, sequence, line, account.
static HEADER_LOOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""[A-Za-z\-\*]+"\s*(\d{4})(?:R\d+)?(L\d+)(?:A\d+)?#(\w+)"#).unwrap()
});

/// Last resort: sequence and line only.
static HEADER_MINIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})(L\d+)#").unwrap());

static QUOTED_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([A-Za-z0-9\-\*]+)""#).unwrap());

static SIA_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""SIA-DCS".*?([A-Z]{2})"#).unwrap());

static ADM_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\|(\d{4})\s").unwrap());

static AREA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/PA(\d+)").unwrap());

static V_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[V([^\]]+)\]").unwrap());

/// SIA-DC09 dialect adapter.
#[derive(Debug, Default)]
pub struct SiaDc09;

impl SiaDc09 {
    /// New adapter.
    pub fn new() -> Self {
        Self
    }

    fn parse_identity(text: &str, msg: &mut ClassifiedMessage) {
        if let Some(caps) = HEADER.captures(text) {
            msg.sequence = caps[4].to_string();
            if let Some(r) = caps.get(5) {
                msg.receiver = r.as_str().to_string();
            }
            msg.line = caps[6].to_string();
            if let Some(a) = caps.get(7) {
                msg.area = a.as_str().to_string();
            }
            msg.account = caps[8].to_string();
        } else if let Some(caps) = HEADER_LOOSE.captures(text) {
            msg.sequence = caps[1].to_string();
            msg.line = caps[2].to_string();
            msg.account = caps[3].to_string();
        } else if let Some(caps) = HEADER_MINIMAL.captures(text) {
            msg.sequence = caps[1].to_string();
            msg.line = caps[2].to_string();
        } else {
            tracing::trace!("(SIA_DCS) header regex did not match frame");
        }

        if let Some(caps) = AREA.captures(text) {
            msg.area = format!("A{}", &caps[1]);
        }
    }

    fn event_code(text: &str) -> Option<String> {
        let quoted = QUOTED_TYPE.captures(text).map(|c| c[1].to_string());
        match quoted.as_deref() {
            Some("SIA-DCS") => SIA_CODE.captures(text).map(|c| c[1].to_string()),
            Some("ADM-CID") => ADM_CODE.captures(text).map(|c| c[1].to_string()),
            // Some panels put the event token straight into the quoted
            // type position (`"BR"`).
            Some(t) if t.len() == 2 && t.chars().all(|c| c.is_ascii_uppercase()) => {
                Some(t.to_string())
            }
            _ => None,
        }
    }

    /// Classify the comma-separated parts of every `[V...]` block.
    fn classify_links(text: &str, code: &str, msg: &mut ClassifiedMessage) {
        let mut photos = 0usize;
        let mut links = 0usize;
        for block in V_BLOCK.captures_iter(text) {
            for part in block[1].split(',').map(str::trim) {
                if part.is_empty() {
                    continue;
                }
                match label::classify_text(part) {
                    Category::Photo => {
                        photos += 1;
                        msg.media.push(MediaItem::Url(part.to_string()));
                    }
                    Category::Link => links += 1,
                    Category::Event => {}
                }
            }
        }
        if photos > 0 {
            msg.kind = MessageKind::Photo;
            msg.labels = label::aggregate(
                std::iter::repeat((Category::Photo, code.to_string())).take(photos),
            );
        } else if links > 0 {
            msg.kind = MessageKind::Link;
            msg.labels = label::aggregate(
                std::iter::repeat((Category::Link, code.to_string())).take(links),
            );
        }
    }
}

impl Dialect for SiaDc09 {
    fn framing(&self) -> Framing {
        Framing::CarriageReturn
    }

    fn classify(&self, frame: &[u8]) -> ClassifiedMessage {
        let text = lossy_text(frame);
        let mut msg = ClassifiedMessage::unknown();
        Self::parse_identity(&text, &mut msg);

        if self.is_ping(frame) {
            msg.kind = MessageKind::Ping;
            return msg;
        }

        if let Some(code) = Self::event_code(&text) {
            msg.kind = MessageKind::Event;
            Self::classify_links(&text, &code, &mut msg);
            msg.code = Some(code);
        }
        msg
    }

    fn is_ping(&self, frame: &[u8]) -> bool {
        lossy_text(frame).contains("\"NULL\"")
    }

    fn ack(&self, msg: &ClassifiedMessage, ctx: &ReplyContext) -> Reply {
        let body = format!(
            "4AA90LLL\"ACK\"{}{}{}{}#{}[]_{}\r",
            msg.sequence, msg.receiver, msg.line, msg.area, msg.account, ctx.timestamp
        );
        Reply::plain(body.into_bytes())
    }

    fn nak(&self, msg: &ClassifiedMessage, ctx: &ReplyContext) -> Reply {
        let body = format!(
            "4B89007B0001\"NAK\"{}{}{}{}#{}[]_{}\r",
            msg.sequence, msg.receiver, msg.line, msg.area, msg.account, ctx.timestamp
        );
        Reply::plain(body.into_bytes())
    }
}
