//! Per-connection handling.
//!
//! One handler task per accepted socket: read, reassemble, classify,
//! gate by the receiver's emulation mode, persist media, reply. The
//! handler owns all connection-local state (reassembly buffer, the
//! Manitou `RawNo → event` map, the MASXML payload accumulator); the
//! mode engine is the only shared state and is touched through its
//! handle.
//!
//! No panel frame can take the process down: every failure path logs
//! and closes this connection only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dialect::{Dialect, ReplyContext};
use crate::error::Result;
use crate::frame::FrameAssembler;
use crate::media::{MediaSink, PayloadStore};
use crate::message::{ClassifiedMessage, MediaItem};
use crate::mode::{EmulationMode, ModeHandle};
use crate::receiver::ReceiverKind;
use crate::redact;

/// Idle time between reads before a warning is logged. A timeout does
/// not close the connection; only EOF, close policy, or an error does.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket read chunk size.
const READ_CHUNK: usize = 4096;

/// What to do with the connection after a frame was handled.
enum FrameOutcome {
    Continue,
    Close,
}

/// State and I/O for one panel connection.
pub struct Connection<S> {
    stream: S,
    peer: String,
    kind: ReceiverKind,
    port: u16,
    dialect: Arc<dyn Dialect>,
    mode: ModeHandle,
    media: MediaSink,
    assembler: FrameAssembler,
    /// RawNo issued in Signal acks → event code, so later Binary
    /// frames are attributed to the event that produced them.
    raw_no_events: HashMap<String, String>,
    payloads: PayloadStore,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Handler for a freshly accepted connection.
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        kind: ReceiverKind,
        port: u16,
        dialect: Arc<dyn Dialect>,
        mode: ModeHandle,
        media: MediaSink,
    ) -> Self {
        let assembler = FrameAssembler::new(dialect.framing());
        Self {
            stream,
            peer: peer.into(),
            kind,
            port,
            dialect,
            mode,
            media,
            assembler,
            raw_no_events: HashMap::new(),
            payloads: PayloadStore::new(),
        }
    }

    /// Drive the connection until EOF, close policy, error, or shutdown.
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("({}) ({}) connection opened", self.kind, self.peer);
        let mut buf = vec![0u8; READ_CHUNK];

        'conn: loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break 'conn,
                read = tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut buf)) => read,
            };
            let n = match read {
                Err(_) => {
                    warn!("({}) ({}) timeout waiting for data", self.kind, self.peer);
                    continue;
                }
                Ok(Ok(0)) => break 'conn,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!("({}) ({}) read failed: {e}", self.kind, self.peer);
                    break 'conn;
                }
            };

            let frames = match self.assembler.feed(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!("({}) ({}) {e}; dropping connection", self.kind, self.peer);
                    break 'conn;
                }
            };

            for frame in frames {
                match self.process_frame(&frame).await {
                    Ok(FrameOutcome::Continue) => {}
                    Ok(FrameOutcome::Close) => break 'conn,
                    Err(e) => {
                        warn!("({}) ({}) {e}; closing connection", self.kind, self.peer);
                        break 'conn;
                    }
                }
            }
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!("({}) ({}) shutdown: {e}", self.kind, self.peer);
        }
        info!("({}) ({}) connection closed", self.kind, self.peer);
    }

    /// The per-frame decision procedure, shared across dialects.
    async fn process_frame(&mut self, frame: &[u8]) -> Result<FrameOutcome> {
        let msg = self.dialect.classify(frame);
        self.log_inbound(frame, &msg);

        let mode = self.mode.mode();

        if mode == EmulationMode::NoResponse {
            info!("({}) NO_RESPONSE mode: skipping reply", self.kind);
            return Ok(FrameOutcome::Continue);
        }

        if msg.is_ping() {
            return self.reply_ping(&msg, mode).await;
        }

        if mode == EmulationMode::OnlyPing {
            info!("({}) ONLY_PING mode: skipping event", self.kind);
            return Ok(FrameOutcome::Continue);
        }

        if mode == EmulationMode::DropN && self.mode.with(|s| s.begin_drop()) {
            return Ok(FrameOutcome::Continue);
        }

        if mode == EmulationMode::DelayN {
            let delay = self.mode.with(|s| s.delay_seconds());
            if delay > 0 {
                info!("({}) delaying response by {delay}s", self.kind);
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
        }

        let ctx = self.reply_context();
        if mode == EmulationMode::Nak {
            let reply = self.dialect.nak(&msg, &ctx);
            self.write_reply(&reply.bytes, &msg.reply_label("NAK")).await?;
            self.mode.consume_packet();
            if self.dialect.close_after_nak() {
                info!("({}) ({}) closing connection after NAK", self.kind, self.peer);
                return Ok(FrameOutcome::Close);
            }
            return Ok(FrameOutcome::Continue);
        }

        self.save_media(&msg).await;

        let reply = self.dialect.ack(&msg, &ctx);
        if let Some(token) = &reply.token {
            let event = msg.code.clone().unwrap_or_else(|| "UNKNOWN".to_string());
            self.raw_no_events.insert(token.clone(), event);
        }
        self.write_reply(&reply.bytes, &msg.reply_label("ACK")).await?;
        self.mode.consume_packet();
        Ok(FrameOutcome::Continue)
    }

    /// Heartbeat policy: ACK in every replying mode, except NAK mode on
    /// dialects where NAK applies to pings. Pings never consume budget.
    async fn reply_ping(
        &mut self,
        msg: &ClassifiedMessage,
        mode: EmulationMode,
    ) -> Result<FrameOutcome> {
        let ctx = self.reply_context();
        if mode == EmulationMode::Nak && self.dialect.nak_applies_to_ping() {
            let reply = self.dialect.nak(msg, &ctx);
            self.write_reply(&reply.bytes, &msg.reply_label("NAK")).await?;
        } else {
            let reply = self.dialect.ack(msg, &ctx);
            self.write_reply(&reply.bytes, &msg.reply_label("ACK")).await?;
        }
        Ok(FrameOutcome::Continue)
    }

    fn reply_context(&self) -> ReplyContext {
        self.mode.with(|state| ReplyContext {
            timestamp: state.response_timestamp(),
            nak_code: state.nak_code(),
        })
    }

    /// Persist every media payload the frame carried. Failures are
    /// logged and never block the reply; URL fetches run detached so
    /// the panel is not kept waiting on the network.
    async fn save_media(&mut self, msg: &ClassifiedMessage) {
        let urls: Vec<String> = msg
            .media
            .iter()
            .filter_map(|item| match item {
                MediaItem::Url(url) => Some(url.clone()),
                _ => None,
            })
            .collect();
        if !urls.is_empty() {
            info!(
                "({}) fetching {}",
                self.kind,
                redact::summarize_photo_urls(&urls)
            );
        }

        for item in &msg.media {
            match item {
                MediaItem::Base64 {
                    data,
                    raw_no: Some(raw_no),
                    frame_no,
                } => {
                    // Binary continuation: attribute to the originating
                    // Signal via the RawNo issued in its ack.
                    let event = self
                        .raw_no_events
                        .get(raw_no)
                        .cloned()
                        .unwrap_or_else(|| "UNKNOWN".to_string());
                    let frame_no = frame_no.as_deref().unwrap_or("0");
                    let tag = format!("{event}_{raw_no}_{frame_no}");
                    let path = self
                        .media
                        .save_base64(data, &self.kind.to_string(), self.port, Some(&tag))
                        .await;
                    info!("[{} PHOTO SAVED]: {path}", self.kind);
                }
                MediaItem::Base64 { data, raw_no: None, .. } => {
                    let path = self
                        .media
                        .save_base64(data, &self.kind.to_string(), self.port, Some(&msg.sequence))
                        .await;
                    info!("[{} PHOTO SAVED]: {path}", self.kind);
                }
                MediaItem::PayloadPart { payload_id, .. } => {
                    if let Some(joined) = self.payloads.push(item) {
                        let path = self
                            .media
                            .save_base64(&joined, &self.kind.to_string(), self.port, Some(payload_id))
                            .await;
                        info!("[{} PHOTO SAVED]: {path}", self.kind);
                    }
                }
                MediaItem::Url(url) => {
                    let media = self.media.clone();
                    let kind = self.kind;
                    let port = self.port;
                    let url = url.clone();
                    let sequence = msg.sequence.clone();
                    tokio::spawn(async move {
                        let path = media
                            .save_url(&url, &kind.to_string(), port, Some(&sequence))
                            .await;
                        info!("[{kind} PHOTO SAVED]: {path}");
                    });
                }
            }
        }
    }

    fn log_inbound(&self, frame: &[u8], msg: &ClassifiedMessage) {
        let text = redact::lossy_text(frame);
        let masked = redact::mask_sia_v_blocks(&redact::mask_base64_tags(&text));
        let display_text = redact::shrink_media(&masked, 1, redact::MAX_LOG_CHARS);
        info!(
            "({}) ({}) <<-- {} {}",
            self.kind,
            self.peer,
            msg.label(),
            display_text.trim()
        );
    }

    async fn write_reply(&mut self, bytes: &[u8], label: &str) -> Result<()> {
        info!(
            "({}) ({}) -->> {label} {}",
            self.kind,
            self.peer,
            preview(bytes)
        );
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Loggable preview of reply bytes: text when printable (STX/ETX
/// envelopes tolerated and trimmed), hex otherwise.
fn preview(bytes: &[u8]) -> String {
    let printable = bytes
        .iter()
        .all(|&b| matches!(b, b'\r' | b'\n' | b'\t' | 0x02 | 0x03) || (0x20..0x7f).contains(&b));
    if printable {
        redact::lossy_text(bytes)
            .trim_matches(|c: char| c.is_control() || c.is_whitespace())
            .to_string()
    } else {
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
