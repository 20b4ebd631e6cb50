//! Classified message model.
//!
//! The parsers turn a raw frame into a [`ClassifiedMessage`]: the frame
//! kind, the identity fields echoed back in acknowledgements, and any
//! media payloads the frame carried. Parsing never fails; a frame the
//! dialect cannot make sense of classifies as [`MessageKind::Unknown`]
//! and still receives a generic acknowledgement in ACK mode.

use crate::label::CategoryCount;

/// What a frame turned out to be once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Periodic liveness frame carrying no event.
    Ping,
    /// Plain alarm or restore event.
    Event,
    /// Event carrying photo media (base64 body or image URL).
    Photo,
    /// Event carrying non-image URLs.
    Link,
    /// Raw media continuation frame (Manitou `<Binary>`).
    Binary,
    /// Frame the parser could not classify.
    Unknown,
}

/// A media payload embedded in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaItem {
    /// Inline base64 body.
    Base64 {
        /// The base64 text, undecoded.
        data: String,
        /// Manitou correlation token, when the frame carried one.
        raw_no: Option<String>,
        /// Manitou frame number within a multi-frame photo.
        frame_no: Option<String>,
    },
    /// Multi-part base64 block (MASXML `<Payload>`).
    PayloadPart {
        /// Identifier shared by all parts of one photo.
        payload_id: String,
        /// Position of this part.
        packet_number: u32,
        /// True on the final part.
        last: bool,
        /// The base64 text of this part.
        data: String,
    },
    /// A URL to fetch.
    Url(String),
}

/// A frame after parsing and classification.
#[derive(Debug, Clone)]
pub struct ClassifiedMessage {
    /// Frame kind.
    pub kind: MessageKind,
    /// Event identifier when present (`BR`, `E130`, `1130`, ...).
    pub code: Option<String>,
    /// Dialect sequence or id token; `"0000"` when absent.
    pub sequence: String,
    /// Account echo; dialect default when absent.
    pub account: String,
    /// Receiver echo (SIA `R0`).
    pub receiver: String,
    /// Line echo (SIA `L0`).
    pub line: String,
    /// Area echo (SIA `A0`).
    pub area: String,
    /// Media payloads carried by the frame.
    pub media: Vec<MediaItem>,
    /// Per-category label aggregation for multi-signal frames.
    pub labels: Vec<CategoryCount>,
}

impl ClassifiedMessage {
    /// A message with every field at its dialect-neutral default.
    pub fn unknown() -> Self {
        Self {
            kind: MessageKind::Unknown,
            code: None,
            sequence: "0000".into(),
            account: "acct".into(),
            receiver: "R0".into(),
            line: "L0".into(),
            area: "A0".into(),
            media: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// A ping message.
    pub fn ping() -> Self {
        Self {
            kind: MessageKind::Ping,
            ..Self::unknown()
        }
    }

    /// True when the frame is a heartbeat.
    pub fn is_ping(&self) -> bool {
        self.kind == MessageKind::Ping
    }

    /// The outbound log label for a reply to this message,
    /// e.g. `[ACK PHOTO E130 x3]` or `[NAK PING]`.
    pub fn reply_label(&self, word: &str) -> String {
        if self.is_ping() {
            return format!("[{word} PING]");
        }
        match self.labels.as_slice() {
            [] => match self.base_label() {
                Some(inner) => format!("[{word} {inner}]"),
                None => format!("[{word}]"),
            },
            entries => {
                let categories: Vec<_> = entries.iter().map(|e| e.category).collect();
                let uniform = categories.windows(2).all(|w| w[0] == w[1]);
                if !uniform {
                    // Mixed-content frame; keep it short.
                    return format!("[{word} MIXED]");
                }
                if entries.len() == 1 {
                    let e = &entries[0];
                    let suffix = if e.count > 1 {
                        format!(" x{}", e.count)
                    } else {
                        String::new()
                    };
                    format!("[{word} {} {}{suffix}]", e.category.word(), e.code)
                } else {
                    let codes: Vec<&str> = entries.iter().map(|e| e.code.as_str()).collect();
                    format!(
                        "[{word} {} {}]",
                        entries[0].category.word(),
                        codes.join(",")
                    )
                }
            }
        }
    }

    /// The inbound log label for this message, always bracketed:
    /// `[PING]`, `[EVENT BR]`, `[PHOTO E130 x3] [LINK E761]`, `[UNKNOWN]`.
    pub fn label(&self) -> String {
        if self.is_ping() {
            return "[PING]".to_string();
        }
        if !self.labels.is_empty() {
            return crate::label::format_labels(&self.labels);
        }
        match self.base_label() {
            Some(inner) => format!("[{inner}]"),
            None => "[UNKNOWN]".to_string(),
        }
    }

    /// Unbracketed single label, `None` for unknown frames.
    fn base_label(&self) -> Option<String> {
        let word = match self.kind {
            MessageKind::Photo => "PHOTO",
            MessageKind::Link => "LINK",
            MessageKind::Binary => "BINARY",
            MessageKind::Event => "EVENT",
            MessageKind::Unknown => return None,
            MessageKind::Ping => return None,
        };
        match self.code.as_deref() {
            Some(code) if !code.is_empty() => Some(format!("{word} {code}")),
            _ => Some(word.to_string()),
        }
    }
}
