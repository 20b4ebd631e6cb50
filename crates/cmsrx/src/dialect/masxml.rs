//! MASXML dialect.
//!
//! Text frames terminated by `</XMLMessageClass>`. Acknowledgements
//! echo the `MessageSequenceNo` inside an `AckNakClass` envelope with a
//! result code (0 = accepted). Photos may arrive as a single
//! `<PacketData>` body or as multi-part `<Payload>` blocks that the
//! connection accumulates until `<LastFile>true</LastFile>`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::frame::Framing;
use crate::message::{ClassifiedMessage, MediaItem, MessageKind};
use crate::redact::lossy_text;

use super::{Dialect, Reply, ReplyContext};

/// Default NAK result code when the operator did not pick one.
pub const DEFAULT_NAK_CODE: u32 = 10;

static SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<MessageSequenceNo>(\d+)</MessageSequenceNo>").unwrap());

static PING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<MessageType>\s*HEARTBEAT\s*</MessageType>").unwrap());

static MESSAGE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<MessageType>\s*([A-Za-z0-9_-]+)\s*</MessageType>").unwrap());

static ACCOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Account>([^<]+)</Account>").unwrap());

static PACKET_DATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<PacketData>(.*?)</PacketData>").unwrap());

static PAYLOAD_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Payload>(.*?)</Payload>").unwrap());

static PAYLOAD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<PayloadID>([^<]+)</PayloadID>").unwrap());

static PACKET_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<PacketNumber>(\d+)</PacketNumber>").unwrap());

static FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<FileName>([^<]+)</FileName>").unwrap());

static LAST_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<LastFile>\s*true\s*</LastFile>").unwrap());

/// MASXML dialect adapter.
#[derive(Debug, Default)]
pub struct Masxml;

impl Masxml {
    /// New adapter.
    pub fn new() -> Self {
        Self
    }

    /// Parse one `<Payload>` block into a part, resolving the packet
    /// number from the `FileName` numeric prefix when present.
    fn parse_payload(block: &str) -> Option<MediaItem> {
        let payload_id = PAYLOAD_ID.captures(block)?[1].to_string();
        let data = PACKET_DATA.captures(block)?[1].to_string();
        let last = LAST_FILE.is_match(block);

        let packet_number = PACKET_NUMBER
            .captures(block)
            .and_then(|c| c[1].parse::<u32>().ok());
        let file_prefix = FILE_NAME.captures(block).and_then(|c| {
            let digits: String = c[1].chars().take_while(|ch| ch.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });

        let number = match (file_prefix, packet_number) {
            (Some(prefix), Some(pkt)) if prefix != pkt => {
                warn!(
                    "(MASXML) payload {payload_id}: FileName prefix {prefix} \
                     disagrees with PacketNumber {pkt}, using FileName"
                );
                prefix
            }
            (Some(prefix), _) => prefix,
            (None, Some(pkt)) => pkt,
            (None, None) => 0,
        };

        Some(MediaItem::PayloadPart {
            payload_id,
            packet_number: number,
            last,
            data,
        })
    }
}

impl Dialect for Masxml {
    fn framing(&self) -> Framing {
        Framing::XmlMessageClass
    }

    fn classify(&self, frame: &[u8]) -> ClassifiedMessage {
        let text = lossy_text(frame);
        let mut msg = ClassifiedMessage::unknown();

        if let Some(caps) = SEQUENCE.captures(&text) {
            msg.sequence = caps[1].to_string();
        }
        if let Some(caps) = ACCOUNT.captures(&text) {
            msg.account = caps[1].to_string();
        }

        if self.is_ping(frame) {
            msg.kind = MessageKind::Ping;
            return msg;
        }

        if let Some(caps) = MESSAGE_TYPE.captures(&text) {
            msg.code = Some(caps[1].to_string());
            msg.kind = MessageKind::Event;
        }

        let payload_parts: Vec<MediaItem> = PAYLOAD_BLOCK
            .captures_iter(&text)
            .filter_map(|block| Self::parse_payload(&block[1]))
            .collect();
        if !payload_parts.is_empty() {
            msg.kind = MessageKind::Photo;
            msg.media = payload_parts;
            return msg;
        }

        if let Some(b64) = PACKET_DATA.captures(&text) {
            msg.kind = MessageKind::Photo;
            msg.media.push(MediaItem::Base64 {
                data: b64[1].to_string(),
                raw_no: None,
                frame_no: None,
            });
        }
        msg
    }

    fn is_ping(&self, frame: &[u8]) -> bool {
        PING.is_match(&lossy_text(frame))
    }

    fn ack(&self, msg: &ClassifiedMessage, _ctx: &ReplyContext) -> Reply {
        Reply::plain(ack_nak_class(&msg.sequence, 0, "ok").into_bytes())
    }

    fn nak(&self, msg: &ClassifiedMessage, ctx: &ReplyContext) -> Reply {
        let code = ctx.nak_code.unwrap_or(DEFAULT_NAK_CODE);
        let text = if msg.is_ping() {
            "Ping rejected due to emulation mode"
        } else {
            "Command rejected due to emulation mode"
        };
        Reply::plain(ack_nak_class(&msg.sequence, code, text).into_bytes())
    }
}

fn ack_nak_class(sequence: &str, code: u32, text: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <AckNakClass>\n\
         \x20   <MessageSequenceNo>{sequence}</MessageSequenceNo>\n\
         \x20   <ResultCode>{code}</ResultCode>\n\
         \x20   <ResultText>{text}</ResultText>\n\
         </AckNakClass>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &str) -> Vec<u8> {
        format!("<XMLMessageClass>{body}</XMLMessageClass>").into_bytes()
    }

    #[test]
    fn test_classify_event() {
        let input = frame(
            "<MessageSequenceNo>101</MessageSequenceNo><MessageType>AJAX</MessageType>",
        );
        let msg = Masxml::new().classify(&input);
        assert_eq!(msg.kind, MessageKind::Event);
        assert_eq!(msg.sequence, "101");
        assert_eq!(msg.code.as_deref(), Some("AJAX"));
    }

    #[test]
    fn test_ping_detection() {
        let dialect = Masxml::new();
        let input = frame("<MessageType>HEARTBEAT</MessageType>");
        assert!(dialect.is_ping(&input));
        assert!(!dialect.is_ping(&frame("<MessageType>AJAX</MessageType>")));
    }

    #[test]
    fn test_ack_echoes_sequence() {
        let dialect = Masxml::new();
        let msg = dialect.classify(&frame("<MessageSequenceNo>101</MessageSequenceNo>"));
        let text = String::from_utf8(dialect.ack(&msg, &ReplyContext::new("")).bytes).unwrap();
        assert!(text.contains("<MessageSequenceNo>101</MessageSequenceNo>"));
        assert!(text.contains("<ResultCode>0</ResultCode>"));
        assert!(text.contains("<ResultText>ok</ResultText>"));
    }

    #[test]
    fn test_nak_uses_operator_code() {
        let dialect = Masxml::new();
        let msg = dialect.classify(&frame("<MessageSequenceNo>101</MessageSequenceNo>"));

        let mut ctx = ReplyContext::new("");
        let text = String::from_utf8(dialect.nak(&msg, &ctx).bytes).unwrap();
        assert!(text.contains("<ResultCode>10</ResultCode>"));

        ctx.nak_code = Some(9);
        let text = String::from_utf8(dialect.nak(&msg, &ctx).bytes).unwrap();
        assert!(text.contains("<ResultCode>9</ResultCode>"));
    }

    #[test]
    fn test_single_packet_data_photo() {
        let input = frame("<MessageSequenceNo>7</MessageSequenceNo><PacketData>QUJD</PacketData>");
        let msg = Masxml::new().classify(&input);
        assert_eq!(msg.kind, MessageKind::Photo);
        assert_eq!(
            msg.media,
            vec![MediaItem::Base64 {
                data: "QUJD".into(),
                raw_no: None,
                frame_no: None,
            }]
        );
    }

    #[test]
    fn test_payload_part_with_filename_prefix() {
        let input = frame(
            "<Payload><PayloadID>p9</PayloadID><PacketNumber>5</PacketNumber>\
             <FileName>002_photo.jpg</FileName><LastFile>false</LastFile>\
             <PacketData>QUJD</PacketData></Payload>",
        );
        let msg = Masxml::new().classify(&input);
        // FileName prefix wins over the diverging PacketNumber.
        assert_eq!(
            msg.media,
            vec![MediaItem::PayloadPart {
                payload_id: "p9".into(),
                packet_number: 2,
                last: false,
                data: "QUJD".into(),
            }]
        );
    }

    #[test]
    fn test_payload_last_flag() {
        let input = frame(
            "<Payload><PayloadID>p9</PayloadID><PacketNumber>1</PacketNumber>\
             <LastFile>true</LastFile><PacketData>RA==</PacketData></Payload>",
        );
        let msg = Masxml::new().classify(&input);
        assert_eq!(
            msg.media,
            vec![MediaItem::PayloadPart {
                payload_id: "p9".into(),
                packet_number: 1,
                last: true,
                data: "RA==".into(),
            }]
        );
    }
}
