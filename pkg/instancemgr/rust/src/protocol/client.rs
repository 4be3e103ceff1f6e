// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Minimal protocol client. The manager uses it to probe whether a database
//! server is reachable; the test suites use it to talk to the manager.

use super::net::Net;
use super::packets::{Greeting, HandshakeResponse, Response, ResultSet, parse_ok_or_err};
use super::scramble::scramble_password;
use super::vio::Vio;
use super::{COM_PING, COM_QUERY, COM_QUIT, ProtocolError, SERVER_CAPABILITIES};
use crate::errors::ErrorCode;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

/// Where a server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

impl Endpoint {
    pub fn connect(&self, timeout: Duration) -> io::Result<Vio> {
        let vio = match self {
            Endpoint::Tcp { host, port } => {
                let addrs: Vec<SocketAddr> = (host.as_str(), *port).to_socket_addrs()?.collect();
                let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no address");
                let mut stream = None;
                for addr in addrs {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(s) => {
                            stream = Some(s);
                            break;
                        }
                        Err(e) => last_err = e,
                    }
                }
                Vio::Tcp(stream.ok_or(last_err)?)
            }
            Endpoint::Unix(path) => Vio::Unix(UnixStream::connect(path)?),
        };
        vio.set_read_timeout(Some(timeout))?;
        vio.set_write_timeout(Some(timeout))?;
        Ok(vio)
    }
}

pub struct Client {
    net: Net<Vio>,
    greeting: Option<Greeting>,
}

impl Client {
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> io::Result<Self> {
        Ok(Self::from_vio(endpoint.connect(timeout)?))
    }

    pub fn from_vio(vio: Vio) -> Self {
        Self {
            net: Net::new(vio),
            greeting: None,
        }
    }

    pub fn greeting(&self) -> Option<&Greeting> {
        self.greeting.as_ref()
    }

    /// Reads the greeting and authenticates. A refusal surfaces as
    /// `ProtocolError::Server`.
    pub fn handshake(&mut self, user: &str, password: &str) -> Result<(), ProtocolError> {
        let greeting = Greeting::parse(&self.net.read_packet()?)?;
        let auth = if password.is_empty() {
            Vec::new()
        } else {
            scramble_password(&greeting.scramble, password).to_vec()
        };
        let response = HandshakeResponse {
            capabilities: SERVER_CAPABILITIES,
            user: user.to_string(),
            auth,
        };
        self.greeting = Some(greeting);
        self.net.write_packet(response.encode()?.as_slice())?;
        match self.read_response()? {
            Response::Ok { .. } => Ok(()),
            Response::Err { code, message } => Err(ProtocolError::Server { code, message }),
            Response::ResultSet(_) => Err(ProtocolError::Malformed("result set during handshake")),
        }
    }

    pub fn query(&mut self, sql: &str) -> Result<Response, ProtocolError> {
        self.command(COM_QUERY, sql.as_bytes())
    }

    pub fn ping(&mut self) -> Result<Response, ProtocolError> {
        self.command(COM_PING, &[])
    }

    /// Sends an arbitrary command byte.
    pub fn command(&mut self, command: u8, arg: &[u8]) -> Result<Response, ProtocolError> {
        let mut payload = Vec::with_capacity(arg.len() + 1);
        payload.push(command);
        payload.extend_from_slice(arg);
        self.net.reset_seq();
        self.net.write_packet(&payload)?;
        self.read_response()
    }

    pub fn quit(mut self) -> Result<(), ProtocolError> {
        self.net.reset_seq();
        self.net.write_packet(&[COM_QUIT])
    }

    fn read_response(&mut self) -> Result<Response, ProtocolError> {
        let packet = self.net.read_packet()?;
        if let Some(response) = parse_ok_or_err(&packet)? {
            return Ok(response);
        }
        let mut r = super::packets::Reader::new(&packet);
        let column_count = r.lenenc_int()?;
        Ok(Response::ResultSet(ResultSet::read(&mut self.net, column_count)?))
    }
}

/// Credentials the manager presents when probing a server. The account is not
/// expected to exist.
pub const PROBE_USER: &str = "MySQL_Instance_Manager";
pub const PROBE_PASSWORD: &str = "check_connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The server let the probe account in.
    Accepted,
    /// The server answered and refused the probe account.
    AccessDenied,
    /// Nothing usable answered.
    Unreachable,
}

/// Connects to `endpoint` and attempts to authenticate as the probe account.
pub fn probe(endpoint: &Endpoint, timeout: Duration) -> ProbeOutcome {
    let mut client = match Client::connect(endpoint, timeout) {
        Ok(client) => client,
        Err(_) => return ProbeOutcome::Unreachable,
    };
    match client.handshake(PROBE_USER, PROBE_PASSWORD) {
        Ok(()) => {
            let _ = client.quit();
            ProbeOutcome::Accepted
        }
        Err(ProtocolError::Server { code, .. }) if code == ErrorCode::AccessDenied.code() => {
            ProbeOutcome::AccessDenied
        }
        Err(_) => ProbeOutcome::Unreachable,
    }
}
