//! Frame reassembly.
//!
//! TCP delivers byte streams; every dialect defines its own frame
//! boundary. The [`FrameAssembler`] accumulates reads into a bounded
//! per-connection buffer and yields complete frames, keeping the
//! unparsed tail for the next read. Feeding the same bytes in
//! arbitrary-size chunks yields the same frame sequence.

use std::sync::LazyLock;

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};

/// Default per-connection buffer limit: 1 MiB.
pub const DEFAULT_BUFFER_LIMIT: usize = 1024 * 1024;

const STX: u8 = 0x02;
const ETX: u8 = 0x03;

/// Sentinel heartbeat: the exact two-byte sequence `0x06 0x14`.
pub const SENTINEL_HEARTBEAT: [u8; 2] = [0x06, 0x14];

static MICROKEY_FRAME: LazyLock<regex::bytes::Regex> = LazyLock::new(|| {
    regex::bytes::Regex::new(r"(?s)<Signals\b.*?</Signals>\s*<Checksum>[0-9A-Fa-f]{4}</Checksum>")
        .unwrap()
});

/// Frame boundary rule for one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Frames terminated by `\r` (SIA-DC09 / ADM-CID).
    CarriageReturn,
    /// Text frames ending at the literal `</XMLMessageClass>`.
    XmlMessageClass,
    /// Binary envelope `STX .. ETX`; stray bytes before STX are dropped
    /// and the yielded frame is the inner payload.
    StxEtx,
    /// Text segment ending at `</Signals><Checksum>XXXX</Checksum>`.
    MicrokeyChecksum,
    /// Either the two-byte heartbeat `0x06 0x14` or a newline-terminated
    /// pipe-delimited record.
    Sentinel,
}

/// Accumulating per-connection reassembler.
#[derive(Debug)]
pub struct FrameAssembler {
    framing: Framing,
    buf: BytesMut,
    limit: usize,
}

impl FrameAssembler {
    /// Create an assembler with the default 1 MiB buffer limit.
    pub fn new(framing: Framing) -> Self {
        Self::with_limit(framing, DEFAULT_BUFFER_LIMIT)
    }

    /// Create an assembler with an explicit buffer limit.
    pub fn with_limit(framing: Framing, limit: usize) -> Self {
        Self {
            framing,
            buf: BytesMut::new(),
            limit,
        }
    }

    /// Bytes currently buffered without a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed bytes and extract every complete frame.
    ///
    /// Returns [`Error::FrameTooLarge`] when the retained tail exceeds
    /// the buffer limit; the caller must drop the connection.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            match self.extract_one() {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }

        if self.buf.len() > self.limit {
            return Err(Error::FrameTooLarge {
                size: self.buf.len(),
                limit: self.limit,
            });
        }
        Ok(frames)
    }

    fn extract_one(&mut self) -> Option<Vec<u8>> {
        match self.framing {
            Framing::CarriageReturn => self.extract_delimited(b'\r'),
            Framing::XmlMessageClass => self.extract_end_token(b"</XMLMessageClass>"),
            Framing::StxEtx => self.extract_stx_etx(),
            Framing::MicrokeyChecksum => self.extract_microkey(),
            Framing::Sentinel => self.extract_sentinel(),
        }
    }

    /// Yield bytes up to a delimiter, delimiter consumed but excluded.
    /// Empty segments (e.g. the `\n` of a `\r\n` pair) are skipped.
    fn extract_delimited(&mut self, delim: u8) -> Option<Vec<u8>> {
        loop {
            let pos = self.buf.iter().position(|&b| b == delim)?;
            let mut frame = self.buf.split_to(pos + 1);
            frame.truncate(pos);
            let trimmed: Vec<u8> = frame
                .iter()
                .copied()
                .skip_while(|&b| b == b'\n' || b == b'\r')
                .collect();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
    }

    /// Yield bytes up to and including an end token.
    fn extract_end_token(&mut self, token: &[u8]) -> Option<Vec<u8>> {
        let pos = self
            .buf
            .windows(token.len())
            .position(|window| window == token)?;
        let end = pos + token.len();
        Some(self.buf.split_to(end).to_vec())
    }

    /// Yield the payload between STX and ETX; stray bytes before the
    /// first STX are discarded.
    fn extract_stx_etx(&mut self) -> Option<Vec<u8>> {
        let Some(start) = self.buf.iter().position(|&b| b == STX) else {
            // Everything buffered is stray; a frame can only begin at
            // an STX that has not arrived yet.
            self.buf.clear();
            return None;
        };
        if start > 0 {
            self.buf.advance(start);
        }
        let end = self.buf.iter().position(|&b| b == ETX)?;
        let frame = self.buf.split_to(end + 1);
        Some(frame[1..end].to_vec())
    }

    /// Yield one `<Signals>...</Signals><Checksum>XXXX</Checksum>` frame.
    /// Bytes preceding the match are consumed along with it.
    fn extract_microkey(&mut self) -> Option<Vec<u8>> {
        let m = MICROKEY_FRAME.find(&self.buf)?;
        let (frame_start, frame_end) = (m.start(), m.end());
        let chunk = self.buf.split_to(frame_end);
        Some(chunk[frame_start..].to_vec())
    }

    /// Yield either a heartbeat pair or a newline-terminated record.
    fn extract_sentinel(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.buf.starts_with(&SENTINEL_HEARTBEAT) {
                self.buf.advance(2);
                return Some(SENTINEL_HEARTBEAT.to_vec());
            }
            // A lone 0x06 may be the first half of a heartbeat.
            if self.buf.len() == 1 && self.buf[0] == SENTINEL_HEARTBEAT[0] {
                return None;
            }
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let mut record = self.buf.split_to(pos + 1);
            record.truncate(pos);
            let trimmed: Vec<u8> = record
                .iter()
                .copied()
                .filter(|&b| b != b'\r')
                .collect();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed the same input byte-at-a-time and all-at-once; the frame
    /// sequences must match.
    fn assert_chunking_invariant(framing: Framing, input: &[u8]) -> Vec<Vec<u8>> {
        let mut whole = FrameAssembler::new(framing);
        let frames_whole = whole.feed(input).unwrap();

        let mut trickle = FrameAssembler::new(framing);
        let mut frames_trickle = Vec::new();
        for byte in input {
            frames_trickle.extend(trickle.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(frames_whole, frames_trickle);
        frames_whole
    }

    #[test]
    fn test_sia_cr_framing() {
        let input = b"4AA9003C\"BR\"0000R0L0A0#acct[]\r4AA9003C\"NULL\"0001R0L0A0#acct[]\r";
        let frames = assert_chunking_invariant(Framing::CarriageReturn, input);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], b"4AA9003C\"BR\"0000R0L0A0#acct[]".to_vec());
    }

    #[test]
    fn test_sia_partial_kept() {
        let mut asm = FrameAssembler::new(Framing::CarriageReturn);
        assert!(asm.feed(b"4AA9003C\"BR\"0000").unwrap().is_empty());
        let frames = asm.feed(b"R0L0A0#acct[]\r").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(asm.buffered(), 0);
    }

    #[test]
    fn test_masxml_straddles_reads() {
        let input = b"<XMLMessageClass><MessageSequenceNo>1</MessageSequenceNo></XMLMessageClass>";
        let frames = assert_chunking_invariant(Framing::XmlMessageClass, input);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], input.to_vec());
    }

    #[test]
    fn test_manitou_strips_stray_prefix() {
        let mut input = vec![0x00, 0xff];
        input.push(STX);
        input.extend_from_slice(b"<Signal Event=\"E130\"/>");
        input.push(ETX);
        let frames = assert_chunking_invariant(Framing::StxEtx, &input);
        assert_eq!(frames, vec![b"<Signal Event=\"E130\"/>".to_vec()]);
    }

    #[test]
    fn test_microkey_zero_signal_heartbeat() {
        let input =
            b"<Signals><SignalCount>0</SignalCount></Signals><Checksum>4FE9</Checksum>";
        let frames = assert_chunking_invariant(Framing::MicrokeyChecksum, input);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], input.to_vec());
    }

    #[test]
    fn test_microkey_two_frames_one_read() {
        let one = b"<Signals><SignalCount>0</SignalCount></Signals><Checksum>4FE9</Checksum>";
        let mut input = one.to_vec();
        input.extend_from_slice(one);
        let frames = assert_chunking_invariant(Framing::MicrokeyChecksum, &input);
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_sentinel_heartbeat_and_record() {
        let mut input = SENTINEL_HEARTBEAT.to_vec();
        input.extend_from_slice(b"|Account=1234|Event=1130|\r\n");
        input.extend_from_slice(&SENTINEL_HEARTBEAT);
        let frames = assert_chunking_invariant(Framing::Sentinel, &input);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], SENTINEL_HEARTBEAT.to_vec());
        assert_eq!(frames[1], b"|Account=1234|Event=1130|".to_vec());
        assert_eq!(frames[2], SENTINEL_HEARTBEAT.to_vec());
    }

    #[test]
    fn test_buffer_overflow() {
        let mut asm = FrameAssembler::with_limit(Framing::CarriageReturn, 16);
        let err = asm.feed(&[b'x'; 32]).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { size: 32, limit: 16 }));
    }
}
