//! Central Monitoring Station receiver emulator.
//!
//! This crate emulates the receiving side of alarm-signalling
//! protocols so panel clients can be exercised against controlled CMS
//! behavior. Each emulated receiver listens on a TCP port, reassembles
//! protocol frames from the byte stream, classifies them (heartbeat,
//! event, photo), persists embedded media, and answers with
//! wire-correct ACK or NAK frames. An operator steers failure
//! behavior at runtime: silent drops, delayed or negative
//! acknowledgements, timestamp spoofing, heartbeat-only operation.
//!
//! Supported dialects: SIA-DC09 (with ADM-CID coding), MASXML, Manitou
//! MASXML, Micro Key, and Sentinel.
//!
//! # Example
//!
//! ```ignore
//! use cmsrx::config::Config;
//! use cmsrx::media::MediaSink;
//! use cmsrx::mode::ModeRegistry;
//! use cmsrx::receiver::ReceiverKind;
//! use cmsrx::server::ReceiverServer;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> cmsrx::Result<()> {
//! let config = Config::load("config.yaml")?;
//! let modes = ModeRegistry::new();
//! let media = MediaSink::new("log_media");
//! let cancel = CancellationToken::new();
//!
//! let kind = ReceiverKind::SiaDcs;
//! let server = ReceiverServer::bind(
//!     kind,
//!     config.port_for(kind)?,
//!     modes.handle(kind),
//!     media.clone(),
//! )
//! .await?;
//! server.serve(cancel).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Runtime control
//!
//! Mode commands (`ack`, `nak 3`, `nak9`, `drop 2`, `delay 5`,
//! `time 2020-08-26 14:46:14 once`, `only-ping`, `no-response`,
//! `loglevel DEBUG`) arrive over stdin or the loopback command socket;
//! see [`command`].

pub mod command;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod frame;
pub mod label;
pub mod logging;
pub mod media;
pub mod message;
pub mod mode;
pub mod receiver;
pub mod redact;
pub mod server;

// Re-export common types at crate root for convenience
pub use command::{Command, CommandStation};
pub use config::Config;
pub use dialect::Dialect;
pub use error::{Error, Result};
pub use frame::{FrameAssembler, Framing};
pub use media::MediaSink;
pub use message::{ClassifiedMessage, MessageKind};
pub use mode::{EmulationMode, ModeHandle, ModeRegistry};
pub use receiver::ReceiverKind;
pub use server::ReceiverServer;
