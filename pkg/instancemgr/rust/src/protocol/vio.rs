// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// A connected stream socket, TCP or Unix domain.
#[derive(Debug)]
pub enum Vio {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Vio {
    pub fn try_clone(&self) -> io::Result<Vio> {
        match self {
            Vio::Tcp(s) => s.try_clone().map(Vio::Tcp),
            Vio::Unix(s) => s.try_clone().map(Vio::Unix),
        }
    }

    /// Shuts down both directions. A thread blocked reading from any clone of
    /// this stream returns immediately.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Vio::Tcp(s) => s.shutdown(Shutdown::Both),
            Vio::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Vio::Tcp(s) => s.set_read_timeout(timeout),
            Vio::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Vio::Tcp(s) => s.set_write_timeout(timeout),
            Vio::Unix(s) => s.set_write_timeout(timeout),
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Vio::Tcp(s) => s.set_nonblocking(nonblocking),
            Vio::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }
}

impl fmt::Display for Vio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vio::Tcp(s) => match s.peer_addr() {
                Ok(addr) => write!(f, "tcp {addr}"),
                Err(_) => f.write_str("tcp"),
            },
            Vio::Unix(_) => f.write_str("socket"),
        }
    }
}

impl Read for Vio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Vio::Tcp(s) => s.read(buf),
            Vio::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Vio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Vio::Tcp(s) => s.write(buf),
            Vio::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Vio::Tcp(s) => s.flush(),
            Vio::Unix(s) => s.flush(),
        }
    }
}
