// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use instance_manager::Options;
use instance_manager::angel;
use instance_manager::manager::Manager;
use log::{error, info};
use simple_logger::SimpleLogger;
use std::process::ExitCode;

#[allow(clippy::print_stderr)]
fn main() -> ExitCode {
    let options = match Options::load(std::env::args_os()) {
        Ok(options) => options,
        Err(e) => match e.downcast::<clap::Error>() {
            Ok(e) => e.exit(),
            Err(e) => {
                eprintln!("mysqlmanager: {e:#}");
                return ExitCode::FAILURE;
            }
        },
    };

    if let Err(e) = SimpleLogger::new().with_level(options.log_level).init() {
        eprintln!("mysqlmanager: cannot initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    if options.run_as_service && !angel::is_angel_child() {
        return match angel::run(&options) {
            Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
            Err(e) => {
                error!("angel: {e:#}");
                ExitCode::FAILURE
            }
        };
    }

    info!("mysqlmanager starting (version {})", env!("CARGO_PKG_VERSION"));
    match Manager::init(&options).and_then(Manager::run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
