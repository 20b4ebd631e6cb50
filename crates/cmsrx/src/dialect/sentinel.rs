//! Sentinel dialect.
//!
//! Byte-oriented: the heartbeat is the exact pair `0x06 0x14`, events
//! are single pipe-delimited records (`|Key=Value|...`), and replies
//! are one byte — ACK `0x06`, NAK `0x15`.

use crate::frame::{Framing, SENTINEL_HEARTBEAT};
use crate::message::{ClassifiedMessage, MediaItem, MessageKind};
use crate::redact::lossy_text;

use super::{Dialect, Reply, ReplyContext};

const ACK: u8 = 0x06;
const NAK: u8 = 0x15;

/// Sentinel dialect adapter.
#[derive(Debug, Default)]
pub struct Sentinel;

impl Dialect for Sentinel {
    fn framing(&self) -> Framing {
        Framing::Sentinel
    }

    fn classify(&self, frame: &[u8]) -> ClassifiedMessage {
        if self.is_ping(frame) {
            return ClassifiedMessage::ping();
        }

        let mut msg = ClassifiedMessage::unknown();
        let text = lossy_text(frame);
        let mut has_fields = false;
        for part in text.split('|') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                continue;
            }
            has_fields = true;
            match key.to_ascii_lowercase().as_str() {
                "event" => msg.code = Some(value.to_string()),
                "account" => msg.account = value.to_string(),
                "sequence" => msg.sequence = value.to_string(),
                "mediaurl" => {
                    msg.kind = MessageKind::Photo;
                    msg.media.push(MediaItem::Url(value.to_string()));
                }
                _ => {}
            }
        }

        if msg.kind == MessageKind::Unknown && has_fields {
            msg.kind = MessageKind::Event;
        }
        msg
    }

    fn is_ping(&self, frame: &[u8]) -> bool {
        frame == SENTINEL_HEARTBEAT
    }

    fn ack(&self, _msg: &ClassifiedMessage, _ctx: &ReplyContext) -> Reply {
        Reply::plain(vec![ACK])
    }

    fn nak(&self, _msg: &ClassifiedMessage, _ctx: &ReplyContext) -> Reply {
        Reply::plain(vec![NAK])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat() {
        let dialect = Sentinel;
        assert!(dialect.is_ping(&[0x06, 0x14]));
        assert!(!dialect.is_ping(b"|Event=1130|"));
        assert!(dialect.classify(&[0x06, 0x14]).is_ping());
    }

    #[test]
    fn test_event_record() {
        let msg = Sentinel.classify(b"|Account=1234|Event=1130|Zone=7|");
        assert_eq!(msg.kind, MessageKind::Event);
        assert_eq!(msg.code.as_deref(), Some("1130"));
        assert_eq!(msg.account, "1234");
        assert_eq!(msg.label(), "[EVENT 1130]");
    }

    #[test]
    fn test_media_url_marks_photo() {
        let msg = Sentinel.classify(b"|Event=E130|MediaUrl=https://cdn.example/1.jpg|");
        assert_eq!(msg.kind, MessageKind::Photo);
        assert_eq!(
            msg.media,
            vec![MediaItem::Url("https://cdn.example/1.jpg".into())]
        );
        assert_eq!(msg.label(), "[PHOTO E130]");
    }

    #[test]
    fn test_unstructured_record_is_unknown() {
        let msg = Sentinel.classify(b"garbage");
        assert_eq!(msg.kind, MessageKind::Unknown);
    }

    #[test]
    fn test_single_byte_replies() {
        let msg = ClassifiedMessage::unknown();
        let ctx = ReplyContext::new("");
        assert_eq!(Sentinel.ack(&msg, &ctx).bytes, vec![0x06]);
        assert_eq!(Sentinel.nak(&msg, &ctx).bytes, vec![0x15]);
    }
}
