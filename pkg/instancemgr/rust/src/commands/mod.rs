// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Client commands: the parsed form of a query and its execution against
//! the instance map.

mod exec;
mod parse;

pub use parse::parse;

use crate::context::Context;
use crate::errors::ErrorCode;
use crate::instance_options::LogKind;
use crate::option_file::NamedOption;
use crate::protocol::packets::ResultSet;

/// One `instance.option[=value]` item of SET or UNSET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionChange {
    pub instance: String,
    pub option: NamedOption,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ShowInstances,
    ShowInstanceStatus(String),
    ShowInstanceOptions(String),
    StartInstance(String),
    StopInstance(String),
    FlushInstances,
    CreateInstance {
        name: String,
        options: Vec<NamedOption>,
    },
    DropInstance(String),
    SetOptions(Vec<OptionChange>),
    UnsetOptions(Vec<OptionChange>),
    ShowLog {
        name: String,
        kind: LogKind,
        size: u64,
        offset: u64,
    },
    ShowLogFiles(String),
}

/// What a successful command sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    ResultSet(ResultSet),
}

impl Command {
    pub fn execute(&self, ctx: &Context) -> Result<Reply, ErrorCode> {
        match self {
            Command::ShowInstances => exec::show_instances(ctx),
            Command::ShowInstanceStatus(name) => exec::show_instance_status(ctx, name),
            Command::ShowInstanceOptions(name) => exec::show_instance_options(ctx, name),
            Command::StartInstance(name) => exec::start_instance(ctx, name),
            Command::StopInstance(name) => exec::stop_instance(ctx, name),
            Command::FlushInstances => exec::flush_instances(ctx),
            Command::CreateInstance { name, options } => exec::create_instance(ctx, name, options),
            Command::DropInstance(name) => exec::drop_instance(ctx, name),
            Command::SetOptions(changes) => exec::change_options(ctx, changes, true),
            Command::UnsetOptions(changes) => exec::change_options(ctx, changes, false),
            Command::ShowLog {
                name,
                kind,
                size,
                offset,
            } => exec::show_log(ctx, name, *kind, *size, *offset),
            Command::ShowLogFiles(name) => exec::show_log_files(ctx, name),
        }
    }
}
