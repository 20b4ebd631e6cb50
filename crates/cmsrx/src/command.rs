//! Operator command intake.
//!
//! Mode changes arrive as text lines, either typed into stdin or sent
//! to the loopback command socket. The grammar is case-insensitive on
//! the leading verb:
//!
//! ```text
//! ack  [N] [then MODE]
//! nak  [N] [then MODE]
//! nak<code> [N]        e.g. nak9
//! no-response [N] [then MODE]
//! only-ping
//! drop  N
//! delay N
//! time  YYYY-MM-DD HH:MM:SS [once|N|forever]
//! loglevel LEVEL
//! ```
//!
//! Unknown or malformed commands leave the engines untouched; the
//! socket answers `OK\n` or `ERROR\n`, one command per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::logging::LogController;
use crate::mode::{EmulationMode, ModeHandle, OverrideDuration};
use crate::receiver::ReceiverKind;

/// Longest accepted command line on the socket.
pub const MAX_COMMAND_LINE: usize = 1024;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Switch mode, optionally for a bounded number of packets.
    SetMode {
        /// Target mode.
        mode: EmulationMode,
        /// Packets before reverting.
        budget: Option<u32>,
        /// Mode to enter once the budget runs out.
        next: Option<EmulationMode>,
    },
    /// NAK mode with an explicit result code (`nak9`).
    NakWithCode {
        /// The ResultCode to emit.
        code: u32,
        /// Packets before reverting.
        budget: Option<u32>,
    },
    /// Install a timestamp override.
    Time {
        /// The spoofed timestamp.
        timestamp: NaiveDateTime,
        /// How long the override lasts.
        duration: OverrideDuration,
    },
    /// Drop the next N events silently.
    Drop(u32),
    /// Delay every reply by N seconds.
    Delay(u64),
    /// Change the log level at runtime.
    LogLevel(String),
}

impl Command {
    /// Parse one command line.
    pub fn parse(line: &str) -> Result<Command> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [verb, args @ ..] = tokens.as_slice() else {
            return Err(Error::Command("empty command".into()));
        };
        let verb = verb.to_ascii_lowercase();

        // nak9, nak10, ... before the plain verbs.
        if let Some(code_str) = verb.strip_prefix("nak") {
            if !code_str.is_empty() {
                let code: u32 = code_str
                    .parse()
                    .map_err(|_| Error::Command(format!("bad NAK code: {code_str}")))?;
                let budget = parse_optional_count(args)?;
                return Ok(Command::NakWithCode { code, budget });
            }
        }

        match verb.as_str() {
            "ack" | "nak" | "none" | "no-response" => {
                let mode = match verb.as_str() {
                    "ack" => EmulationMode::Ack,
                    "nak" => EmulationMode::Nak,
                    _ => EmulationMode::NoResponse,
                };
                let (budget, next) = parse_budget_then(args)?;
                Ok(Command::SetMode { mode, budget, next })
            }
            "only-ping" => Ok(Command::SetMode {
                mode: EmulationMode::OnlyPing,
                budget: None,
                next: None,
            }),
            "drop" => Ok(Command::Drop(parse_required_count(args, "drop")?)),
            "delay" => Ok(Command::Delay(parse_required_count(args, "delay")? as u64)),
            "time" => parse_time(args),
            "loglevel" => match args {
                [level] => Ok(Command::LogLevel(level.to_string())),
                _ => Err(Error::Command("usage: loglevel LEVEL".into())),
            },
            other => Err(Error::Command(format!("unknown command: {other}"))),
        }
    }
}

fn parse_optional_count(args: &[&str]) -> Result<Option<u32>> {
    match args {
        [] => Ok(None),
        [n, ..] => n
            .parse()
            .map(Some)
            .map_err(|_| Error::Command(format!("bad count: {n}"))),
    }
}

fn parse_required_count(args: &[&str], verb: &str) -> Result<u32> {
    match args {
        [n] => n
            .parse()
            .map_err(|_| Error::Command(format!("bad count for {verb}: {n}"))),
        _ => Err(Error::Command(format!("usage: {verb} N"))),
    }
}

/// Parse `[N] [then MODE]` following a mode verb.
fn parse_budget_then(args: &[&str]) -> Result<(Option<u32>, Option<EmulationMode>)> {
    match args {
        [] => Ok((None, None)),
        [n] => Ok((Some(parse_count(n)?), None)),
        [n, kw, mode] if kw.eq_ignore_ascii_case("then") => {
            Ok((Some(parse_count(n)?), Some(parse_mode(mode)?)))
        }
        // 'then' omitted but a mode name follows the count.
        [n, mode] => Ok((Some(parse_count(n)?), Some(parse_mode(mode)?))),
        _ => Err(Error::Command("usage: MODE [N] [then MODE]".into())),
    }
}

fn parse_count(token: &str) -> Result<u32> {
    token
        .parse()
        .map_err(|_| Error::Command(format!("bad count: {token}")))
}

fn parse_mode(token: &str) -> Result<EmulationMode> {
    EmulationMode::parse(token).ok_or_else(|| Error::Command(format!("unknown mode: {token}")))
}

fn parse_time(args: &[&str]) -> Result<Command> {
    let (date, time, duration_token) = match args {
        [date, time] => (date, time, None),
        [date, time, duration] => (date, time, Some(*duration)),
        _ => Err(Error::Command(
            "usage: time YYYY-MM-DD HH:MM:SS [once|N|forever]".into(),
        ))?,
    };

    let timestamp = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
        .map_err(|e| Error::Command(format!("bad timestamp: {e}")))?;

    let duration = match duration_token {
        None | Some("forever") => OverrideDuration::Forever,
        Some("once") => OverrideDuration::Once,
        Some(n) => {
            let count: u32 = n
                .parse()
                .map_err(|_| Error::Command(format!("bad time duration: {n}")))?;
            OverrideDuration::Times(count)
        }
    };

    Ok(Command::Time {
        timestamp,
        duration,
    })
}

/// Help text printed on unknown commands.
pub const HELP: &str = "\
available commands:
  ack [N] [then MODE]     - respond with ACK (optionally N times)
  nak [N] [then MODE]     - respond with NAK (optionally N times)
  nak<code> [N]           - NAK with explicit ResultCode (e.g. nak9)
  no-response [N]         - skip responses (optionally N times)
  only-ping               - respond only to pings, skip events
  drop N                  - drop next N packets
  delay N                 - delay each response by N seconds
  time YYYY-MM-DD HH:MM:SS [once|N|forever] - override timestamp
  loglevel LEVEL          - change log level (DEBUG, INFO, TRACE...)";

/// Command dispatch target: every mode engine this process runs, plus
/// the log controller.
pub struct CommandStation {
    targets: Vec<(ReceiverKind, ModeHandle)>,
    log: LogController,
}

impl CommandStation {
    /// Station steering the given engines.
    pub fn new(targets: Vec<(ReceiverKind, ModeHandle)>, log: LogController) -> Arc<Self> {
        Arc::new(Self { targets, log })
    }

    /// Parse and apply one command line to every target engine.
    ///
    /// On error the engines are untouched and the help page is logged.
    pub fn dispatch(&self, line: &str) -> Result<()> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("{e}");
                info!("{HELP}");
                return Err(e);
            }
        };
        debug!("applying command: {command:?}");

        if let Command::LogLevel(level) = &command {
            return self.log.set_level(level).inspect_err(|e| warn!("{e}"));
        }

        for (kind, mode) in &self.targets {
            debug!("({kind}) applying {command:?}");
            mode.with(|state| match &command {
                Command::SetMode { mode, budget, next } => {
                    state.set_mode(*mode, *budget, *next);
                }
                Command::NakWithCode { code, budget } => {
                    state.set_nak_code(*code);
                    state.set_mode(EmulationMode::Nak, *budget, None);
                }
                Command::Time {
                    timestamp,
                    duration,
                } => state.set_time(*timestamp, *duration),
                Command::Drop(n) => state.set_drop(*n),
                Command::Delay(s) => state.set_delay(*s),
                Command::LogLevel(_) => unreachable!("handled above"),
            });
        }
        Ok(())
    }

    /// Fire-and-forget stdin intake. Reads lines until EOF or shutdown.
    pub async fn run_stdin(self: Arc<Self>, cancel: CancellationToken) {
        let receivers: Vec<String> = self.targets.iter().map(|(k, _)| k.to_string()).collect();
        info!(
            "[STDIN] type commands to control {} (e.g. 'ack', 'nak 3', 'drop 2', 'loglevel DEBUG')",
            receivers.join(", ")
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                // Errors already logged by dispatch; stdin never answers.
                Ok(Some(line)) => {
                    let _ = self.dispatch(line.trim());
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("[STDIN] read failed: {e}");
                    break;
                }
            }
        }
    }

    /// Serve the TCP command port: one line per connection, answered
    /// with `OK\n` or `ERROR\n`.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, cancel).await
    }

    /// Serve on an already-bound listener (tests bind port 0).
    pub async fn serve_listener(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("[CMD] command server started on {}", listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (mut socket, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("[CMD] accept failed: {e}");
                    continue;
                }
            };

            let station = Arc::clone(&self);
            tokio::spawn(async move {
                let mut buf = vec![0u8; MAX_COMMAND_LINE];
                let n = match socket.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("[CMD] read from {peer} failed: {e}");
                        return;
                    }
                };
                let line = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                info!("[CMD] received command from {peer}: {line}");

                let answer: &[u8] = if line.is_empty() || station.dispatch(&line).is_ok() {
                    b"OK\n"
                } else {
                    b"ERROR\n"
                };
                if let Err(e) = socket.write_all(answer).await {
                    warn!("[CMD] reply to {peer} failed: {e}");
                }
                let _ = socket.shutdown().await;
            });
        }
        Ok(())
    }
}
