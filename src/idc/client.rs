//! Blocking IDC client
//!
//! One request, one reply, no pipelining and no retries. The client is
//! not internally synchronised; share it behind a lock if needed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use super::error::ProtocolError;
use super::message::{WireMessage, open_packet};
use super::report::{ErrorReporter, TracingReporter};
use super::socket::IdcSocket;
use super::types::WireType;
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Default DAE server port
pub const DEFAULT_PORT: u16 = 6789;

/// Status text of a successful reply
pub const REPLY_OK: &str = "OK";

const OPEN_REPLY_LEN: usize = 3;
const FAILURE_STATUS: i32 = -1;

/// Client options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdcConfig {
    /// Port used when the host has none.
    pub port: u16,
    /// Optional connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional read timeout for replies.
    pub read_timeout: Option<Duration>,
    /// Optional write timeout for commands.
    pub write_timeout: Option<Duration>,
    /// User name sent in the open packet.
    pub user: String,
    /// Largest reply payload accepted, in bytes.
    pub max_payload: usize,
}

impl Default for IdcConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: None,
            write_timeout: None,
            user: "daqstream".to_owned(),
            max_payload: 64 * 1024 * 1024,
        }
    }
}

impl IdcConfig {
    /// Check the options before connecting
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::config("port must be non-zero"));
        }
        if self.max_payload == 0 {
            return Err(Error::config("max payload must be non-zero"));
        }
        if self.user.is_empty() {
            return Err(Error::config("user name must not be empty"));
        }
        Ok(())
    }
}

/// Connection to a DAE server.
pub struct IdcClient {
    socket: Option<IdcSocket>,
    peer: String,
    max_payload: usize,
    reporter: Arc<dyn ErrorReporter>,
}

impl std::fmt::Debug for IdcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdcClient")
            .field("peer", &self.peer)
            .field("open", &self.socket.is_some())
            .finish_non_exhaustive()
    }
}

fn report(reporter: &dyn ErrorReporter, err: Error) -> Error {
    let code = match &err {
        Error::Protocol(protocol) => protocol.code(),
        _ => 0,
    };
    Metrics::record_wire_error();
    reporter.report(FAILURE_STATUS, code, &err.to_string());
    err
}

impl IdcClient {
    /// Connect, send the open packet and wait for `OK`.
    ///
    /// `host` may carry its own `:port`.
    #[instrument(level = "debug", skip(config, reporter))]
    pub fn open(host: &str, config: &IdcConfig, reporter: Arc<dyn ErrorReporter>) -> Result<Self> {
        let fail = |err: ProtocolError| report(reporter.as_ref(), err.into());
        config.validate().map_err(|e| report(reporter.as_ref(), e))?;

        let peer = if host.contains(':') {
            host.to_owned()
        } else {
            format!("{host}:{}", config.port)
        };
        let connect = |source| ProtocolError::Connect {
            peer: peer.clone(),
            source,
        };
        let mut socket = IdcSocket::connect(peer.as_str(), config.connect_timeout)
            .map_err(|e| fail(connect(e)))?;
        socket
            .set_read_timeout(config.read_timeout)
            .and_then(|()| socket.set_write_timeout(config.write_timeout))
            .map_err(|e| fail(connect(e)))?;

        let pid = i32::try_from(std::process::id()).unwrap_or(0);
        let packet = open_packet(&config.user, "localhost", pid)
            .map_err(|e| report(reporter.as_ref(), e))?;
        socket.send_all(&packet).map_err(|source| {
            fail(ProtocolError::Send {
                command: "OPEN".to_owned(),
                source,
            })
        })?;

        let mut reply = [0u8; OPEN_REPLY_LEN];
        socket.recv_exact(&mut reply).map_err(|source| {
            fail(ProtocolError::Receive {
                command: "OPEN".to_owned(),
                source,
            })
        })?;
        if !reply.starts_with(REPLY_OK.as_bytes()) {
            socket.shutdown();
            return Err(fail(ProtocolError::Rejected {
                command: "OPEN".to_owned(),
                reply: String::from_utf8_lossy(&reply)
                    .trim_end_matches('\0')
                    .to_owned(),
            }));
        }

        Metrics::record_connection_open();
        debug!(peer = %socket.peer_addr(), "connected to DAE");
        Ok(Self {
            socket: Some(socket),
            peer,
            max_payload: config.max_payload,
            reporter,
        })
    }

    /// [`open`](Self::open) with default options, logging failures
    pub fn connect(host: &str) -> Result<Self> {
        Self::open(host, &IdcConfig::default(), Arc::new(TracingReporter))
    }

    /// Server address as dialled
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether [`close`](Self::close) has not run yet
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn fail(&self, err: impl Into<Error>) -> Error {
        report(self.reporter.as_ref(), err.into())
    }

    fn exchange(
        &mut self,
        request: &WireMessage,
        raw: &[u8],
        expected: WireType,
    ) -> std::result::Result<WireMessage, ProtocolError> {
        let socket = self.socket.as_mut().ok_or(ProtocolError::Closed)?;
        socket.send_all(raw).map_err(|source| ProtocolError::Send {
            command: request.command.clone(),
            source,
        })?;
        let reply = WireMessage::read_from(socket, &request.command, self.max_payload)?;
        trace!(command = %request.command, status = %reply.command, bytes = reply.payload.len(), "reply");
        if reply.command != REPLY_OK {
            return Err(ProtocolError::Rejected {
                command: request.command.clone(),
                reply: reply.command,
            });
        }
        if reply.wire_type != expected {
            return Err(ProtocolError::TypeMismatch {
                command: request.command.clone(),
                expected,
                found: reply.wire_type,
            });
        }
        Ok(reply)
    }

    /// Drop the connection without `CLOSE` once its framing is lost
    fn abandon(&mut self, err: &ProtocolError) {
        if let Some(socket) = self.socket.take() {
            socket.shutdown();
            Metrics::record_connection_close();
            warn!(peer = %self.peer, error = %err, "connection out of sync, dropped");
        }
    }

    /// Send one command and validate the reply type.
    ///
    /// A failed send or an unreadable reply leaves unknown bytes on the
    /// wire, so the connection is dropped and later calls fail with
    /// [`ProtocolError::Closed`].
    pub fn request(&mut self, request: &WireMessage, expected: WireType) -> Result<WireMessage> {
        let started = Instant::now();
        let raw = request.encode().map_err(|e| self.fail(e))?;
        let reply = self.exchange(request, &raw, expected).map_err(|e| {
            if matches!(
                e,
                ProtocolError::Send { .. }
                    | ProtocolError::Receive { .. }
                    | ProtocolError::Malformed { .. }
            ) {
                self.abandon(&e);
            }
            self.fail(e)
        })?;
        Metrics::record_request(started.elapsed());
        Ok(reply)
    }

    /// Fetch a named parameter of the given type
    pub fn get_par(&mut self, name: &str, wire_type: WireType) -> Result<WireMessage> {
        let request = WireMessage::text(format!("GETPAR{}", wire_type.code()), name);
        self.request(&request, wire_type)
    }

    /// Integer parameter array
    pub fn get_par_i32s(&mut self, name: &str) -> Result<Vec<i32>> {
        let reply = self.get_par(name, WireType::Int32)?;
        reply.as_i32s().map_err(|e| self.fail(e))
    }

    /// First element of an integer parameter
    pub fn get_par_i32(&mut self, name: &str) -> Result<i32> {
        let values = self.get_par_i32s(name)?;
        values.first().copied().ok_or_else(|| {
            self.fail(ProtocolError::ShortRead {
                command: format!("GETPARI32 {name}"),
                expected: 1,
                received: 0,
            })
        })
    }

    /// Single-precision parameter array
    pub fn get_par_f32s(&mut self, name: &str) -> Result<Vec<f32>> {
        let reply = self.get_par(name, WireType::Real32)?;
        reply.as_f32s().map_err(|e| self.fail(e))
    }

    /// Double-precision parameter array
    pub fn get_par_f64s(&mut self, name: &str) -> Result<Vec<f64>> {
        let reply = self.get_par(name, WireType::Real64)?;
        reply.as_f64s().map_err(|e| self.fail(e))
    }

    /// Text parameter
    pub fn get_par_string(&mut self, name: &str) -> Result<String> {
        Ok(self.get_par(name, WireType::Char)?.as_text())
    }

    /// Raw counts for `nos` spectra starting at `ifsn`, time channel 0
    /// included
    pub fn get_spectrum(&mut self, ifsn: i32, nos: i32) -> Result<Vec<i32>> {
        let request = WireMessage::int32("GETDAT", &[ifsn, nos], vec![2]);
        let reply = self.request(&request, WireType::Int32)?;
        reply.as_i32s().map_err(|e| self.fail(e))
    }

    fn shutdown(&mut self) -> std::result::Result<(), ProtocolError> {
        let Some(mut socket) = self.socket.take() else {
            return Ok(());
        };
        let sent = WireMessage::empty("CLOSE")
            .encode()
            .map_err(|e| ProtocolError::Malformed {
                command: "CLOSE".to_owned(),
                reason: e.to_string(),
            })
            .and_then(|raw| {
                socket.send_all(&raw).map_err(|source| ProtocolError::Send {
                    command: "CLOSE".to_owned(),
                    source,
                })
            });
        socket.shutdown();
        Metrics::record_connection_close();
        debug!(peer = %self.peer, "disconnected from DAE");
        sent
    }

    /// Send `CLOSE` and release the connection
    pub fn close(mut self) -> Result<()> {
        self.shutdown().map_err(|e| self.fail(e))
    }
}

impl Drop for IdcClient {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!(error = %err, "close on drop failed");
        }
    }
}
