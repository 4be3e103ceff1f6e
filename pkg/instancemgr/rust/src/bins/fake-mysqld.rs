// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Minimal stand-in for `mysqld`. It answers `--version` and `--verbose
//! --help`, and otherwise writes its pid file, listens where it was told to
//! and refuses every login with "access denied", which is all the manager's
//! connect probe looks for. SIGTERM makes it remove the pid file and exit.

use anyhow::{Context, Result};
use instance_manager::errors::ErrorCode;
use instance_manager::protocol::packets::{Greeting, error_packet};
use instance_manager::protocol::scramble::random_scramble;
use instance_manager::protocol::{
    DEFAULT_CHARSET, Net, SERVER_CAPABILITIES, SERVER_STATUS_AUTOCOMMIT, Vio,
};
use nix::sys::signal::{SigSet, Signal};
use std::fs;
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::process::ExitCode;

/// Data directory reported by `--verbose --help`.
const DATADIR_ENV: &str = "FAKE_MYSQLD_DATADIR";
const VERSION: &str = "fake-mysqld  Ver 5.1.99 for test";

#[derive(Debug, Default)]
struct ServerArgs {
    pid_file: Option<PathBuf>,
    port: Option<u16>,
    socket: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<ServerArgs> {
    let mut parsed = ServerArgs::default();
    for arg in args {
        let Some((name, value)) = arg.strip_prefix("--").and_then(|a| a.split_once('=')) else {
            continue;
        };
        match name {
            "pid-file" => parsed.pid_file = Some(PathBuf::from(value)),
            "port" => parsed.port = Some(value.parse().context("bad --port")?),
            "socket" => parsed.socket = Some(PathBuf::from(value)),
            _ => {}
        }
    }
    Ok(parsed)
}

fn refuse(vio: Vio, connection_id: u32) -> Result<()> {
    let mut net = Net::new(vio);
    let greeting = Greeting {
        server_version: "5.1.99-fake".to_string(),
        connection_id,
        scramble: random_scramble(),
        capabilities: SERVER_CAPABILITIES as u16,
        charset: DEFAULT_CHARSET,
        status: SERVER_STATUS_AUTOCOMMIT,
    };
    net.write_packet(greeting.encode()?.as_slice())?;
    net.read_packet()?;
    let code = ErrorCode::AccessDenied;
    net.write_packet(error_packet(code.code(), code.sqlstate(), &code.to_string())?.as_slice())?;
    Ok(())
}

fn serve(args: &ServerArgs) -> Result<()> {
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGTERM);
    signals.add(Signal::SIGINT);
    signals.thread_block()?;

    if let Some(path) = &args.socket {
        let _ = fs::remove_file(path);
        let listener = UnixListener::bind(path)
            .with_context(|| format!("cannot bind {}", path.display()))?;
        std::thread::spawn(move || {
            for (n, stream) in listener.incoming().enumerate() {
                if let Ok(stream) = stream {
                    let _ = refuse(Vio::Unix(stream), n as u32 + 1);
                }
            }
        });
    }
    if let Some(port) = args.port {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .with_context(|| format!("cannot bind port {port}"))?;
        std::thread::spawn(move || {
            for (n, stream) in listener.incoming().enumerate() {
                if let Ok(stream) = stream {
                    let _ = refuse(Vio::Tcp(stream), n as u32 + 1);
                }
            }
        });
    }
    if let Some(path) = &args.pid_file {
        fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("cannot write {}", path.display()))?;
    }

    signals.wait()?;
    if let Some(path) = &args.pid_file {
        let _ = fs::remove_file(path);
    }
    if let Some(path) = &args.socket {
        let _ = fs::remove_file(path);
    }
    Ok(())
}

#[allow(clippy::print_stdout, clippy::print_stderr)]
fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version") {
        println!("{VERSION}");
        return ExitCode::SUCCESS;
    }
    if args.iter().any(|a| a == "--help") {
        let datadir = std::env::var(DATADIR_ENV).unwrap_or_else(|_| "/tmp".to_string());
        println!("Variables (--variable-name=value)");
        println!("and boolean options {{FALSE|TRUE}}  Value (after reading options)");
        println!("--------------------------------- -----------------------------");
        println!("basedir                           /usr/");
        println!("datadir                           {datadir}");
        return ExitCode::SUCCESS;
    }

    match parse_args(&args).and_then(|a| serve(&a)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fake-mysqld: {e:#}");
            ExitCode::FAILURE
        }
    }
}
