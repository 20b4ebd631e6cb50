//! End-to-end tests over real sockets.
//!
//! Each test boots a receiver on an ephemeral port plus the loopback
//! command socket, then plays panel traffic and operator commands
//! against them exactly as a deployment would.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use cmsrx::command::CommandStation;
use cmsrx::logging::LogController;
use cmsrx::media::MediaSink;
use cmsrx::mode::ModeRegistry;
use cmsrx::receiver::ReceiverKind;
use cmsrx::server::ReceiverServer;

struct Harness {
    addr: SocketAddr,
    command_addr: SocketAddr,
    cancel: CancellationToken,
    _media_dir: tempfile::TempDir,
    media_root: std::path::PathBuf,
    port: u16,
}

impl Harness {
    /// Boot one receiver and its command socket on ephemeral ports.
    async fn start(kind: ReceiverKind) -> Harness {
        let media_dir = tempfile::tempdir().unwrap();
        let media_root = media_dir.path().to_path_buf();
        let modes = ModeRegistry::new();
        let cancel = CancellationToken::new();

        let server = ReceiverServer::bind(kind, 0, modes.handle(kind), MediaSink::new(&media_root))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve(cancel.clone()));

        let station = CommandStation::new(vec![(kind, modes.handle(kind))], LogController::noop());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let command_addr = listener.local_addr().unwrap();
        tokio::spawn(station.serve_listener(listener, cancel.clone()));

        Harness {
            addr,
            command_addr,
            cancel,
            _media_dir: media_dir,
            media_root,
            port: addr.port(),
        }
    }

    /// Send one operator command and assert the `OK` answer.
    async fn command(&self, line: &str) {
        let mut socket = TcpStream::connect(self.command_addr).await.unwrap();
        socket
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();

        let mut buf = vec![0u8; 64];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"OK\n", "command {line:?} rejected");
    }

    /// One panel round-trip: connect, send, read one reply.
    async fn roundtrip(&self, frame: &[u8]) -> Vec<u8> {
        let mut panel = TcpStream::connect(self.addr).await.unwrap();
        panel.write_all(frame).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = tokio::time::timeout(Duration::from_secs(3), panel.read(&mut buf))
            .await
            .expect("no response within timeout")
            .unwrap();
        buf.truncate(n);
        buf
    }

    /// Send a frame and assert that nothing comes back.
    async fn expect_silence(&self, frame: &[u8]) {
        let mut panel = TcpStream::connect(self.addr).await.unwrap();
        panel.write_all(frame).await.unwrap();

        let mut buf = vec![0u8; 64];
        let result = tokio::time::timeout(Duration::from_millis(500), panel.read(&mut buf)).await;
        assert!(result.is_err(), "expected silence, got a reply");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

const SIA_EVENT: &[u8] = b"4AA9003C\"BR\"0000R0L0A0#acct[]\r";
const SIA_EVENT2: &[u8] = b"4AA9003C\"BR\"0001R0L0A0#acct[]\r";
const SIA_PING: &[u8] = b"4AA9002B\"NULL\"0005R0L0#acct[]\r";

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn test_sia_ack_response() {
    let harness = Harness::start(ReceiverKind::SiaDcs).await;
    let reply = text(harness.roundtrip(SIA_EVENT).await);
    assert!(reply.starts_with("4AA90LLL\"ACK\"0000R0L0A0#acct[]_"));
    assert!(reply.ends_with('\r'));
}

#[tokio::test]
async fn test_sia_nak_response() {
    let harness = Harness::start(ReceiverKind::SiaDcs).await;
    harness.command("nak").await;

    let reply = text(harness.roundtrip(SIA_EVENT).await);
    assert!(reply.starts_with("4B89007B0001\"NAK\"0000R0L0A0#acct[]_"));
}

#[tokio::test]
async fn test_sia_nak_2_then_ack() {
    let harness = Harness::start(ReceiverKind::SiaDcs).await;
    harness.command("nak 2 then ack").await;

    let r1 = text(harness.roundtrip(SIA_EVENT).await);
    let r2 = text(harness.roundtrip(SIA_EVENT).await);
    let r3 = text(harness.roundtrip(SIA_EVENT2).await);

    assert!(r1.starts_with("4B89") && r1.contains("\"NAK\""));
    assert!(r2.starts_with("4B89") && r2.contains("\"NAK\""));
    assert!(r3.starts_with("4AA9") && r3.contains("\"ACK\""));
}

#[tokio::test]
async fn test_sia_ping_replies_without_consuming() {
    let harness = Harness::start(ReceiverKind::SiaDcs).await;
    harness.command("nak 1").await;

    // Heartbeats do not touch the budget: the NAK survives them.
    let ping_reply = text(harness.roundtrip(SIA_PING).await);
    assert!(ping_reply.contains("\"NAK\""));

    let event_reply = text(harness.roundtrip(SIA_EVENT).await);
    assert!(event_reply.contains("\"NAK\""));

    // Budget spent; back to ACK.
    let after = text(harness.roundtrip(SIA_EVENT2).await);
    assert!(after.contains("\"ACK\""));
}

#[tokio::test]
async fn test_sia_time_override_once() {
    let harness = Harness::start(ReceiverKind::SiaDcs).await;
    harness.command("time 2020-08-26 14:46:14 once").await;

    let first = text(harness.roundtrip(SIA_EVENT).await);
    assert!(first.ends_with("_14:46:14,08-26-2020\r"));

    let second = text(harness.roundtrip(SIA_EVENT2).await);
    assert!(second.contains("\"ACK\""));
    assert!(!second.contains("_14:46:14,08-26-2020"));
}

#[tokio::test]
async fn test_sia_no_response_and_revert() {
    let harness = Harness::start(ReceiverKind::SiaDcs).await;
    harness.command("no-response").await;
    harness.expect_silence(SIA_EVENT).await;

    harness.command("ack").await;
    let reply = text(harness.roundtrip(SIA_EVENT).await);
    assert!(reply.contains("\"ACK\""));
}

#[tokio::test]
async fn test_sia_drop_two() {
    let harness = Harness::start(ReceiverKind::SiaDcs).await;
    harness.command("drop 2").await;

    harness.expect_silence(SIA_EVENT).await;
    harness.expect_silence(SIA_EVENT).await;
    let reply = text(harness.roundtrip(SIA_EVENT2).await);
    assert!(reply.contains("\"ACK\""));
}

#[tokio::test]
async fn test_command_socket_rejects_garbage() {
    let harness = Harness::start(ReceiverKind::SiaDcs).await;

    let mut socket = TcpStream::connect(harness.command_addr).await.unwrap();
    socket.write_all(b"reboot now\n").await.unwrap();
    let mut buf = vec![0u8; 64];
    let n = socket.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ERROR\n");

    // Engine untouched: events still acknowledged.
    let reply = text(harness.roundtrip(SIA_EVENT).await);
    assert!(reply.contains("\"ACK\""));
}

fn masxml_frame(sequence: u32, message_type: &str) -> Vec<u8> {
    format!(
        "<XMLMessageClass><MessageSequenceNo>{sequence}</MessageSequenceNo>\
         <MessageType>{message_type}</MessageType></XMLMessageClass>"
    )
    .into_bytes()
}

#[tokio::test]
async fn test_masxml_nak_with_result_code() {
    let harness = Harness::start(ReceiverKind::Masxml).await;
    harness.command("nak9").await;

    let reply = text(harness.roundtrip(&masxml_frame(101, "AJAX")).await);
    assert!(reply.contains("<MessageSequenceNo>101</MessageSequenceNo>"));
    assert!(reply.contains("<ResultCode>9</ResultCode>"));
}

#[tokio::test]
async fn test_masxml_nak_budget_then_ack() {
    let harness = Harness::start(ReceiverKind::Masxml).await;
    harness.command("nak 2 then ack").await;

    let r1 = text(harness.roundtrip(&masxml_frame(1, "AJAX")).await);
    let r2 = text(harness.roundtrip(&masxml_frame(2, "AJAX")).await);
    let r3 = text(harness.roundtrip(&masxml_frame(3, "AJAX")).await);

    assert!(r1.contains("<ResultCode>10</ResultCode>"));
    assert!(r2.contains("<ResultCode>10</ResultCode>"));
    assert!(r3.contains("<ResultCode>0</ResultCode>"));
}

#[tokio::test]
async fn test_masxml_heartbeat_ack() {
    let harness = Harness::start(ReceiverKind::Masxml).await;
    let reply = text(harness.roundtrip(&masxml_frame(7, "HEARTBEAT")).await);
    assert!(reply.contains("<MessageSequenceNo>7</MessageSequenceNo>"));
    assert!(reply.contains("<ResultCode>0</ResultCode>"));
}

#[tokio::test]
async fn test_masxml_frame_split_across_writes() {
    let harness = Harness::start(ReceiverKind::Masxml).await;

    let frame = masxml_frame(55, "AJAX");
    let (head, tail) = frame.split_at(frame.len() / 2);

    let mut panel = TcpStream::connect(harness.addr).await.unwrap();
    panel.write_all(head).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    panel.write_all(tail).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(3), panel.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let reply = String::from_utf8_lossy(&buf[..n]).into_owned();
    assert!(reply.contains("<MessageSequenceNo>55</MessageSequenceNo>"));
}

#[tokio::test]
async fn test_sentinel_heartbeat_and_record() {
    let harness = Harness::start(ReceiverKind::Sentinel).await;

    let reply = harness.roundtrip(&[0x06, 0x14]).await;
    assert_eq!(reply, vec![0x06]);

    let reply = harness.roundtrip(b"|Account=1234|Event=1130|\n").await;
    assert_eq!(reply, vec![0x06]);

    harness.command("nak").await;
    let reply = harness.roundtrip(b"|Account=1234|Event=1130|\n").await;
    assert_eq!(reply, vec![0x15]);
}

#[tokio::test]
async fn test_microkey_multi_signal_photo_frame() {
    let harness = Harness::start(ReceiverKind::Microkey).await;

    let signals: String = (0..3)
        .map(|i| {
            format!(
                "<Signal><SignalIdentifier>E130</SignalIdentifier>\
                 <Image>https://cdn.example/cam/image_{i}.jpg</Image></Signal>"
            )
        })
        .collect();
    let frame = format!(
        "<Signals><Sequence>88</Sequence><SignalCount>3</SignalCount>{signals}</Signals>\
         <Checksum>4FE9</Checksum>"
    );

    let reply = text(harness.roundtrip(frame.as_bytes()).await);
    assert!(reply.contains("<Sequence>88</Sequence>"));
    assert!(reply.contains("<Status>ACK</Status>"));
    assert!(reply.contains("<Checksum>4FE9</Checksum>"));
}

#[tokio::test]
async fn test_microkey_zero_signal_heartbeat() {
    let harness = Harness::start(ReceiverKind::Microkey).await;
    let frame =
        b"<Signals><Sequence>3</Sequence><SignalCount>0</SignalCount></Signals><Checksum>4FE9</Checksum>";
    let reply = text(harness.roundtrip(frame).await);
    assert!(reply.contains("<Status>ACK</Status>"));
}

#[tokio::test]
async fn test_manitou_signal_then_binary_media() {
    let harness = Harness::start(ReceiverKind::Manitou).await;

    let mut panel = TcpStream::connect(harness.addr).await.unwrap();

    let mut signal = vec![0x02];
    signal.extend_from_slice(br#"<Packet ID="1"><Signal Event="E130"/></Packet>"#);
    signal.push(0x03);
    panel.write_all(&signal).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(3), panel.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let ack = String::from_utf8_lossy(&buf[..n]).into_owned();
    assert!(ack.contains("<Ack><RawNo>"));
    let raw_no = ack
        .split("<RawNo>")
        .nth(1)
        .and_then(|s| s.split("</RawNo>").next())
        .unwrap()
        .to_string();

    let photo = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(b"jpeg bytes")
    };
    let mut binary = vec![0x02];
    binary.extend_from_slice(
        format!(r#"<Binary RawNo="{raw_no}" FrameNo="1"><Data>{photo}</Data></Binary>"#).as_bytes(),
    );
    binary.push(0x03);
    panel.write_all(&binary).await.unwrap();

    let n = tokio::time::timeout(Duration::from_secs(3), panel.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).contains("<Ack>"));

    let media_dir = harness
        .media_root
        .join(format!("MANITOU_{}", harness.port));
    let saved: Vec<String> = std::fs::read_dir(&media_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].contains("E130"));
}

#[tokio::test]
async fn test_manitou_nak_closes_connection() {
    let harness = Harness::start(ReceiverKind::Manitou).await;
    harness.command("nak").await;

    let mut panel = TcpStream::connect(harness.addr).await.unwrap();
    let mut signal = vec![0x02];
    signal.extend_from_slice(br#"<Packet ID="1"><Signal Event="E130"/></Packet>"#);
    signal.push(0x03);
    panel.write_all(&signal).await.unwrap();

    // Exactly one NAK, then EOF: the hard-close policy.
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(3), panel.read(&mut buf))
            .await
            .expect("peer neither replied nor closed")
            .unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    let reply = String::from_utf8_lossy(&out);
    assert_eq!(reply.matches("<Nak").count(), 1);
    assert!(reply.contains("Code=\"10\""));
}

#[tokio::test]
async fn test_manitou_heartbeat_exempt_from_nak() {
    let harness = Harness::start(ReceiverKind::Manitou).await;
    harness.command("nak").await;

    let mut ping = vec![0x02];
    ping.extend_from_slice(br#"<Heartbeat Date="2020-08-26"/>"#);
    ping.push(0x03);
    let reply = text(harness.roundtrip(&ping).await);
    assert!(reply.contains("<Ack>"));
}
