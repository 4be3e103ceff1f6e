// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Client-facing error codes.
//!
//! Every failure a client can observe is one of these variants. The numeric
//! values are part of the wire contract and never change; the 1xxx range is
//! shared with the database server, the 3xxx range belongs to the manager.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorCode {
    #[error("Out of memory or other resources")]
    OutOfResources,
    #[error("Bad handshake")]
    HandshakeError,
    #[error("Access denied. Bad username/password pair")]
    AccessDenied,
    #[error("Unknown command")]
    UnknownCommand,
    #[error("You have an error in your command syntax")]
    SyntaxError,
    #[error("Client does not support authentication protocol requested by server; consider upgrading MySQL client")]
    NotSupportedAuthMode,
    #[error("Bad instance name. Check that the instance with such a name exists")]
    BadInstanceName,
    #[error("Cannot stop instance. Perhaps the instance is not started, or was started manually, so IM cannot find the pidfile")]
    InstanceIsNotStarted,
    #[error("The instance is already started")]
    InstanceAlreadyStarted,
    #[error("Cannot start instance. Possible reasons are wrong instance options or resources shortage")]
    CannotStartInstance,
    #[error("Cannot stop instance")]
    StopInstance,
    #[error("The instance has no such log enabled")]
    NoSuchLog,
    #[error("Cannot open log file")]
    OpenLogfile,
    #[error("Cannot figure out the log file name")]
    GuessLogfile,
    #[error("Cannot open the option file")]
    AccessOptionFile,
    #[error("The offset is beyond the end of the log file")]
    OffsetError,
    #[error("Failed to read the file")]
    ReadFile,
    #[error("The instance is active. Stop the instance first")]
    DropActiveInstance,
    #[error("Instance already exists")]
    CreateExistingInstance,
    #[error("The instance is misconfigured")]
    InstanceMisconfigured,
    #[error("Malformed instance name")]
    MalformedInstanceName,
    #[error("The instance is active. Stop the instance first")]
    InstanceIsActive,
    #[error("At least one instance is active. Stop all instances first")]
    ThereIsActiveInstance,
    #[error("Option cannot be used with a mysqld-compatible instance")]
    IncompatibleOption,
    #[error("The option file does not exist")]
    ConfFileDoesNotExist,
}

impl ErrorCode {
    /// Numeric code sent in error packets.
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::OutOfResources => 1041,
            ErrorCode::HandshakeError => 1043,
            ErrorCode::AccessDenied => 1045,
            ErrorCode::UnknownCommand => 1047,
            ErrorCode::SyntaxError => 1149,
            ErrorCode::NotSupportedAuthMode => 1251,
            ErrorCode::BadInstanceName => 3000,
            ErrorCode::InstanceIsNotStarted => 3001,
            ErrorCode::InstanceAlreadyStarted => 3002,
            ErrorCode::CannotStartInstance => 3003,
            ErrorCode::StopInstance => 3004,
            ErrorCode::NoSuchLog => 3005,
            ErrorCode::OpenLogfile => 3006,
            ErrorCode::GuessLogfile => 3007,
            ErrorCode::AccessOptionFile => 3008,
            ErrorCode::OffsetError => 3009,
            ErrorCode::ReadFile => 3010,
            ErrorCode::DropActiveInstance => 3011,
            ErrorCode::CreateExistingInstance => 3012,
            ErrorCode::InstanceMisconfigured => 3013,
            ErrorCode::MalformedInstanceName => 3014,
            ErrorCode::InstanceIsActive => 3015,
            ErrorCode::ThereIsActiveInstance => 3016,
            ErrorCode::IncompatibleOption => 3017,
            ErrorCode::ConfFileDoesNotExist => 3018,
        }
    }

    /// SQLSTATE reported next to the code in 4.1-style error packets.
    pub fn sqlstate(self) -> &'static str {
        match self {
            ErrorCode::OutOfResources => "HY001",
            ErrorCode::HandshakeError | ErrorCode::NotSupportedAuthMode => "08S01",
            ErrorCode::AccessDenied => "28000",
            ErrorCode::SyntaxError => "42000",
            _ => "HY000",
        }
    }
}
