// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::{OptionChange, Reply};
use crate::context::Context;
use crate::errors::ErrorCode;
use crate::instance::{InstanceError, InstanceGuard, is_mysqld_compatible_name, is_name_valid};
use crate::instance_options::{LogKind, LogLocation, is_manager_option};
use crate::option_file::{self, NamedOption, OptionFileError};
use crate::protocol::packets::ResultSet;
use crate::state::InstanceState;
use log::{info, warn};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Largest log chunk a single SHOW ... LOG may return; it has to fit in one
/// row packet.
const MAX_LOG_CHUNK: u64 = 8 * 1024 * 1024;

/// Runs `body` with the named instance locked. The map lock is held only
/// until the instance lock is taken.
fn with_instance<T, F>(ctx: &Context, name: &str, body: F) -> Result<T, ErrorCode>
where
    F: FnOnce(&mut InstanceGuard<'_>) -> Result<T, ErrorCode>,
{
    let map = ctx.instance_map.lock();
    let instance = map.find(name).ok_or(ErrorCode::BadInstanceName)?;
    let mut guard = instance.lock();
    drop(map);
    body(&mut guard)
}

/// Name reported for the instance state. Non-guarded instances have no
/// supervision state, only whether their server answers.
fn state_name(guard: &InstanceGuard<'_>) -> String {
    if guard.is_guarded() {
        guard.state().to_string()
    } else if guard.is_mysqld_running() {
        InstanceState::Started.to_string()
    } else {
        InstanceState::Stopped.to_string()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn option_file_error(e: &OptionFileError) -> ErrorCode {
    warn!("{e}");
    match e {
        OptionFileError::NotFound(_) => ErrorCode::ConfFileDoesNotExist,
        OptionFileError::Io { .. } => ErrorCode::AccessOptionFile,
    }
}

fn instance_error(e: InstanceError) -> ErrorCode {
    match e {
        InstanceError::MalformedName(_) => ErrorCode::MalformedInstanceName,
        InstanceError::AlreadyExists(_) => ErrorCode::CreateExistingInstance,
        InstanceError::IncompatibleOption(_) => ErrorCode::IncompatibleOption,
        _ => ErrorCode::OutOfResources,
    }
}

pub(super) fn show_instances(ctx: &Context) -> Result<Reply, ErrorCode> {
    let map = ctx.instance_map.lock();
    let mut rs = ResultSet::new(["instance_name", "state"]);
    for instance in map.instances() {
        let guard = instance.lock();
        rs.push_row([guard.name().to_string(), state_name(&guard)]);
    }
    Ok(Reply::ResultSet(rs))
}

pub(super) fn show_instance_status(ctx: &Context, name: &str) -> Result<Reply, ErrorCode> {
    with_instance(ctx, name, |guard| {
        let options = guard.options();
        let mut rs = ResultSet::new([
            "instance_name",
            "state",
            "version_number",
            "version",
            "mysqld_compatible",
        ]);
        rs.push_row([
            guard.name().to_string(),
            state_name(guard),
            options.version_number().unwrap_or_else(|| "unknown".to_string()),
            options.mysqld_version().unwrap_or("unknown").to_string(),
            yes_no(guard.is_mysqld_compatible()).to_string(),
        ]);
        Ok(Reply::ResultSet(rs))
    })
}

pub(super) fn show_instance_options(ctx: &Context, name: &str) -> Result<Reply, ErrorCode> {
    with_instance(ctx, name, |guard| {
        let mut rs = ResultSet::new(["option_name", "value"]);
        rs.push_row(["instance_name", guard.name()]);
        for option in guard.options().options() {
            rs.push_row([option.name.as_str(), option.value.as_deref().unwrap_or("")]);
        }
        Ok(Reply::ResultSet(rs))
    })
}

pub(super) fn start_instance(ctx: &Context, name: &str) -> Result<Reply, ErrorCode> {
    with_instance(ctx, name, |guard| {
        if !guard.is_configured() {
            return Err(ErrorCode::InstanceMisconfigured);
        }
        if guard.is_active() {
            return Err(ErrorCode::InstanceAlreadyStarted);
        }
        if guard.is_guarded() {
            guard.reset_stat();
            guard.set_state(InstanceState::NotStarted);
            ctx.guardian.ping();
        } else {
            guard.start_mysqld(ctx.guardian.pinger()).map_err(|e| {
                warn!("[{name}] {e}");
                ErrorCode::CannotStartInstance
            })?;
        }
        info!("[{name}] start requested");
        Ok(Reply::Ok)
    })
}

pub(super) fn stop_instance(ctx: &Context, name: &str) -> Result<Reply, ErrorCode> {
    with_instance(ctx, name, |guard| {
        if !guard.is_active() {
            return Err(ErrorCode::InstanceIsNotStarted);
        }
        if guard.is_guarded() {
            guard.set_state(InstanceState::Stopping);
        }
        guard.stop_mysqld().map_err(|e| {
            warn!("[{name}] {e}");
            ErrorCode::StopInstance
        })?;
        guard.set_state(InstanceState::Stopped);
        Ok(Reply::Ok)
    })
}

pub(super) fn flush_instances(ctx: &Context) -> Result<Reply, ErrorCode> {
    {
        let mut map = ctx.instance_map.lock();
        if map.is_there_active_instance() {
            return Err(ErrorCode::ThereIsActiveInstance);
        }
        map.reset().map_err(|e| {
            warn!("cannot reload instances: {e}");
            ErrorCode::AccessOptionFile
        })?;
    }
    ctx.guardian.ping();
    Ok(Reply::Ok)
}

pub(super) fn create_instance(
    ctx: &Context,
    name: &str,
    options: &[NamedOption],
) -> Result<Reply, ErrorCode> {
    if !is_name_valid(name) {
        return Err(ErrorCode::MalformedInstanceName);
    }
    let mut map = ctx.instance_map.lock();
    if map.find(name).is_some() {
        return Err(ErrorCode::CreateExistingInstance);
    }
    if is_mysqld_compatible_name(name) && options.iter().any(|o| is_manager_option(&o.name)) {
        return Err(ErrorCode::IncompatibleOption);
    }
    let path = map.defaults_file().to_path_buf();
    if !path.exists() {
        return Err(ErrorCode::ConfFileDoesNotExist);
    }
    let instance = map
        .create_instance(name, options.to_vec(), InstanceState::Stopped)
        .map_err(instance_error)?;
    option_file::add_section(&path, name, options).map_err(|e| option_file_error(&e))?;
    map.insert(instance).map_err(instance_error)?;
    info!("[{name}] created");
    Ok(Reply::Ok)
}

pub(super) fn drop_instance(ctx: &Context, name: &str) -> Result<Reply, ErrorCode> {
    let mut map = ctx.instance_map.lock();
    let instance = map.find(name).ok_or(ErrorCode::BadInstanceName)?;
    if instance.lock().is_active() {
        return Err(ErrorCode::DropActiveInstance);
    }
    let path = map.defaults_file().to_path_buf();
    option_file::remove_section(&path, name).map_err(|e| option_file_error(&e))?;
    map.remove_instance(name);
    info!("[{name}] dropped");
    Ok(Reply::Ok)
}

/// SET (`set == true`) or UNSET. Every target is validated before anything
/// is written; each change goes to the file first and to memory only once
/// the file write succeeded.
pub(super) fn change_options(
    ctx: &Context,
    changes: &[OptionChange],
    set: bool,
) -> Result<Reply, ErrorCode> {
    let map = ctx.instance_map.lock();
    let mut targets = Vec::with_capacity(changes.len());
    for change in changes {
        let instance = map
            .find(&change.instance)
            .ok_or(ErrorCode::BadInstanceName)?;
        targets.push((instance, change));
    }
    for (instance, change) in &targets {
        let guard = instance.lock();
        if guard.is_active() {
            return Err(ErrorCode::InstanceIsActive);
        }
        if guard.is_mysqld_compatible() && is_manager_option(&change.option.name) {
            return Err(ErrorCode::IncompatibleOption);
        }
    }

    let path = map.defaults_file().to_path_buf();
    for (instance, change) in targets {
        let mut guard = instance.lock();
        let option = &change.option;
        if set {
            option_file::set_option(&path, &change.instance, option)
                .map_err(|e| option_file_error(&e))?;
            guard.update_options(|o| o.set_option(option.clone()));
        } else {
            option_file::unset_option(&path, &change.instance, &option.name)
                .map_err(|e| option_file_error(&e))?;
            guard.update_options(|o| o.unset_option(&option.name));
        }
    }
    Ok(Reply::Ok)
}

pub(super) fn show_log(
    ctx: &Context,
    name: &str,
    kind: LogKind,
    size: u64,
    offset: u64,
) -> Result<Reply, ErrorCode> {
    if size > MAX_LOG_CHUNK {
        return Err(ErrorCode::OutOfResources);
    }
    with_instance(ctx, name, |guard| {
        let path = match guard.options().log_location(kind) {
            LogLocation::Disabled => return Err(ErrorCode::NoSuchLog),
            LogLocation::Unresolved => return Err(ErrorCode::GuessLogfile),
            LogLocation::Path(path) => path,
        };
        let chunk = read_log_tail(&path, size, offset)?;
        let mut rs = ResultSet::new(["Log"]);
        rs.push_row([String::from_utf8_lossy(&chunk).into_owned()]);
        Ok(Reply::ResultSet(rs))
    })
}

/// Reads up to `size` bytes ending `offset` bytes before the end of the file.
fn read_log_tail(path: &Path, size: u64, offset: u64) -> Result<Vec<u8>, ErrorCode> {
    let mut file = File::open(path).map_err(|e| {
        warn!("cannot open {}: {e}", path.display());
        ErrorCode::OpenLogfile
    })?;
    let len = file.metadata().map_err(|_| ErrorCode::ReadFile)?.len();
    if offset > len {
        return Err(ErrorCode::OffsetError);
    }
    let end = len - offset;
    let start = end.saturating_sub(size);
    file.seek(SeekFrom::Start(start))
        .map_err(|_| ErrorCode::ReadFile)?;
    let mut chunk = Vec::new();
    file.take(end - start)
        .read_to_end(&mut chunk)
        .map_err(|_| ErrorCode::ReadFile)?;
    Ok(chunk)
}

pub(super) fn show_log_files(ctx: &Context, name: &str) -> Result<Reply, ErrorCode> {
    with_instance(ctx, name, |guard| {
        let mut rs = ResultSet::new(["Logfile", "Path", "File size"]);
        for kind in LogKind::ALL {
            if let LogLocation::Path(path) = guard.options().log_location(kind) {
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                rs.push_row([
                    kind.label().to_string(),
                    path.display().to_string(),
                    size.to_string(),
                ]);
            }
        }
        Ok(Reply::ResultSet(rs))
    })
}
