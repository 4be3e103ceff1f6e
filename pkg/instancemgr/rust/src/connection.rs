// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! One client session: handshake, authentication, then a command loop until
//! the client quits, the socket fails or the manager shuts down.

use crate::commands::{self, Reply};
use crate::context::{Context, SERVER_VERSION};
use crate::errors::ErrorCode;
use crate::protocol::packets::{
    Greeting, HandshakeReject, HandshakeResponse, error_packet, error_packet_323, ok_packet,
};
use crate::protocol::scramble::random_scramble;
use crate::protocol::{
    COM_PING, COM_QUERY, COM_QUIT, DEFAULT_CHARSET, Net, ProtocolError, SCRAMBLE_LENGTH,
    SERVER_CAPABILITIES, SERVER_STATUS_AUTOCOMMIT, Vio,
};
use crate::thread_registry::ThreadInfo;
use log::{debug, info, warn};
use std::sync::Arc;

pub struct Connection<'a> {
    ctx: &'a Context,
    net: Net<Vio>,
    id: u32,
}

/// Thread body for an accepted client. The registry interrupt shuts the
/// socket down, which fails any blocked read.
pub fn serve(ctx: Arc<Context>, vio: Vio, info: ThreadInfo) {
    let id = ctx.next_connection_id();
    match vio.try_clone() {
        Ok(handle) => ctx.registry.set_interrupt(&info, move || {
            let _ = handle.shutdown();
        }),
        Err(e) => warn!("[conn-{id}] cannot install the interrupt hook: {e}"),
    }
    if let Err(e) = vio.set_read_timeout(Some(ctx.wait_timeout)) {
        warn!("[conn-{id}] cannot set the idle timeout: {e}");
    }
    info!("[conn-{id}] accepted ({vio})");
    Connection::new(&ctx, vio, id).run();
    info!("[conn-{id}] closed");
    info.unregister();
}

impl<'a> Connection<'a> {
    pub fn new(ctx: &'a Context, vio: Vio, id: u32) -> Self {
        Self {
            ctx,
            net: Net::new(vio),
            id,
        }
    }

    pub fn run(mut self) {
        match self.handshake() {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                debug!("[conn-{}] handshake failed: {e}", self.id);
                return;
            }
        }
        if let Err(e) = self.dispatch_loop() {
            debug!("[conn-{}] {e}", self.id);
        }
    }

    /// Returns whether the client was authenticated. A refused client has
    /// already been sent its error packet.
    fn handshake(&mut self) -> Result<bool, ProtocolError> {
        let scramble = random_scramble();
        let greeting = Greeting {
            server_version: SERVER_VERSION.to_string(),
            connection_id: self.id,
            scramble,
            capabilities: SERVER_CAPABILITIES as u16,
            charset: DEFAULT_CHARSET,
            status: SERVER_STATUS_AUTOCOMMIT,
        };
        self.net.write_packet(greeting.encode()?.as_slice())?;

        let payload = self.net.read_packet()?;
        let response = match HandshakeResponse::parse(&payload) {
            Ok(response) => response,
            Err(HandshakeReject::Pre41Client) => {
                let code = ErrorCode::NotSupportedAuthMode;
                let packet = error_packet_323(code.code(), &code.to_string())?;
                self.net.write_packet(packet.as_slice())?;
                info!("[conn-{}] refused a pre-4.1 client", self.id);
                return Ok(false);
            }
            Err(HandshakeReject::Malformed) => {
                self.send_error(ErrorCode::HandshakeError)?;
                return Ok(false);
            }
        };

        if response.auth.len() != SCRAMBLE_LENGTH
            || !self
                .ctx
                .users
                .authenticate(&response.user, &response.auth, &scramble)
        {
            warn!("[conn-{}] access denied for user '{}'", self.id, response.user);
            self.send_error(ErrorCode::AccessDenied)?;
            return Ok(false);
        }

        debug!("[conn-{}] user '{}' authenticated", self.id, response.user);
        self.send_ok()?;
        Ok(true)
    }

    fn dispatch_loop(&mut self) -> Result<(), ProtocolError> {
        while !self.ctx.registry.is_shutdown() {
            self.net.reset_seq();
            let packet = self.net.read_packet()?;
            let Some((&command, arg)) = packet.split_first() else {
                self.send_error(ErrorCode::UnknownCommand)?;
                continue;
            };
            match command {
                COM_QUIT => {
                    debug!("[conn-{}] quit", self.id);
                    break;
                }
                COM_PING => self.send_ok()?,
                COM_QUERY => self.query(&String::from_utf8_lossy(arg))?,
                other => {
                    debug!("[conn-{}] unknown command 0x{other:02x}", self.id);
                    self.send_error(ErrorCode::UnknownCommand)?;
                }
            }
        }
        Ok(())
    }

    fn query(&mut self, query: &str) -> Result<(), ProtocolError> {
        debug!("[conn-{}] query: {query}", self.id);
        match commands::parse(query).and_then(|command| command.execute(self.ctx)) {
            Ok(Reply::Ok) => self.send_ok(),
            Ok(Reply::ResultSet(rs)) => rs.send(&mut self.net, SERVER_STATUS_AUTOCOMMIT),
            Err(code) => {
                debug!("[conn-{}] error {}: {code}", self.id, code.code());
                self.send_error(code)
            }
        }
    }

    fn send_ok(&mut self) -> Result<(), ProtocolError> {
        let packet = ok_packet(0, u64::from(self.id), SERVER_STATUS_AUTOCOMMIT)?;
        self.net.write_packet(packet.as_slice())
    }

    fn send_error(&mut self, code: ErrorCode) -> Result<(), ProtocolError> {
        let packet = error_packet(code.code(), code.sqlstate(), &code.to_string())?;
        self.net.write_packet(packet.as_slice())
    }
}
