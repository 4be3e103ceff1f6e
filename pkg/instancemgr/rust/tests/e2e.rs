// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! End-to-end tests: the real `mysqlmanager` binary supervising `fake-mysqld`
//! servers, driven over the wire protocol.

mod helpers;

use helpers::*;
use instance_manager::protocol::ProtocolError;
use nix::sys::signal::Signal;
use std::time::Duration;

// -- lifecycle tests --

#[test]
fn test_guarded_instance_is_started_and_stopped_with_the_manager() {
    let ws = Workspace::new("");
    ws.write_config(&ws.instance_section("mysqld1"));
    let mut daemon = DaemonHandle::start(&ws);

    assert!(daemon.wait_for_log_default("[mysqld1] online"));
    assert!(wait_for_file(&ws.pid_file(), DEFAULT_TIMEOUT));
    let pids = daemon.spawned_pids("mysqld1");
    assert_eq!(pids.len(), 1);
    let server_pid = pids[0];
    assert!(pid_is_alive(server_pid));

    let mut client = ws.connect();
    assert_eq!(instance_state(&mut client, "mysqld1").as_deref(), Some("online"));

    let status = daemon.stop();
    assert!(status.success(), "manager exited with {status}");
    assert!(wait_for_pid_gone(server_pid, DEFAULT_TIMEOUT));
    assert!(!ws.pid_file().exists());
    assert!(!ws.manager_socket().exists());

    // instances are stopped before client connections are closed
    let stopped = daemon.log_position("[mysqld1] stopped").unwrap();
    let closing = daemon.log_position("closing connections").unwrap();
    assert!(stopped < closing);
}

#[test]
fn test_crashed_instance_is_restarted() {
    let ws = Workspace::new("");
    ws.write_config(&ws.instance_section("mysqld1"));
    let daemon = DaemonHandle::start(&ws);
    assert!(daemon.wait_for_log_default("[mysqld1] online"));

    let first = daemon.spawned_pids("mysqld1")[0];
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(first as i32), Signal::SIGKILL).unwrap();

    assert!(daemon.wait_for_log_default("[mysqld1] crashed"));
    assert!(daemon.wait_for_log_count("[mysqld1] spawned (pid=", 2, DEFAULT_TIMEOUT));
    assert!(daemon.wait_for_log_count("[mysqld1] online", 2, DEFAULT_TIMEOUT));
    let pids = daemon.spawned_pids("mysqld1");
    assert_ne!(pids[0], pids[1]);
}

#[test]
fn test_missing_password_file_is_fatal() {
    let ws = Workspace::new("");
    std::fs::remove_file(ws.path("passwd")).unwrap();
    let mut daemon = DaemonHandle::start(&ws);
    let status = daemon.wait_with_timeout(DEFAULT_TIMEOUT);
    assert_eq!(status.code(), Some(1));
    assert!(daemon.wait_for_log_default("cannot read password file"));
    assert!(!ws.pid_file().exists());
}

#[test]
fn test_sighup_is_ignored() {
    let ws = Workspace::new("");
    let mut daemon = DaemonHandle::start(&ws);
    assert!(daemon.wait_for_log_default("listener started"));
    daemon.send_signal(Signal::SIGHUP);
    assert!(daemon.wait_for_log_default("received SIGHUP"));
    ws.connect();
    assert!(daemon.stop().success());
}

// -- client tests --

#[test]
fn test_authentication_over_tcp() {
    let ws = Workspace::new("");
    let daemon = DaemonHandle::start(&ws);
    assert!(daemon.wait_for_log_default("listener started"));

    let mut client = ws.connect_tcp();
    match client.handshake(USER, "wrong") {
        Err(ProtocolError::Server { code, .. }) => assert_eq!(code, 1045),
        other => panic!("unexpected {other:?}"),
    }

    let mut client = ws.connect_tcp();
    client.handshake(USER, PASSWORD).unwrap();
    assert!(rows(&mut client, "SHOW INSTANCES").is_empty());
}

#[test]
fn test_create_start_and_stop_instance() {
    let ws = Workspace::new("[client]\nuser=root\n");
    let daemon = DaemonHandle::start(&ws);
    assert!(daemon.wait_for_log_default("listener started"));
    let mut client = ws.connect();

    std::fs::create_dir_all(ws.datadir("mysqld2")).unwrap();
    exec_ok(
        &mut client,
        &format!(
            "CREATE INSTANCE mysqld2 socket='{}', datadir='{}'",
            ws.instance_socket("mysqld2").display(),
            ws.datadir("mysqld2").display()
        ),
    );
    assert!(ws.read_config().contains("[mysqld2]"));
    assert_eq!(instance_state(&mut client, "mysqld2").as_deref(), Some("offline"));
    assert_eq!(exec_err(&mut client, "CREATE INSTANCE mysqld2"), 3012);

    exec_ok(&mut client, "START INSTANCE mysqld2");
    assert!(daemon.wait_for_log_default("[mysqld2] online"));
    assert_eq!(exec_err(&mut client, "START INSTANCE mysqld2"), 3002);
    assert_eq!(exec_err(&mut client, "DROP INSTANCE mysqld2"), 3011);
    assert_eq!(exec_err(&mut client, "SET mysqld2.port=3999"), 3015);

    let status = rows(&mut client, "SHOW INSTANCE STATUS mysqld2");
    assert_eq!(status[0][1], "online");
    assert_eq!(status[0][2], "5.1.99");

    let server_pid = daemon.spawned_pids("mysqld2")[0];
    exec_ok(&mut client, "STOP INSTANCE mysqld2");
    assert!(wait_for_pid_gone(server_pid, DEFAULT_TIMEOUT));
    assert_eq!(instance_state(&mut client, "mysqld2").as_deref(), Some("offline"));

    // stopped instances stay down
    std::thread::sleep(Duration::from_secs(2));
    assert_eq!(daemon.count_log_matches("[mysqld2] spawned (pid="), 1);

    exec_ok(&mut client, "SET mysqld2.port=3999");
    assert!(ws.read_config().contains("port=3999"));
    exec_ok(&mut client, "DROP INSTANCE mysqld2");
    assert!(!ws.read_config().contains("[mysqld2]"));
    assert!(ws.read_config().contains("[client]"));
}

#[test]
fn test_mysqld_safe_compatible_adds_default_instance() {
    let ws = Workspace::new("[client]\nuser=root\n");
    let daemon = DaemonHandle::start_with(&ws, &["--mysqld-safe-compatible"]);
    assert!(daemon.wait_for_log_default("listener started"));

    let mut client = ws.connect();
    assert!(instance_state(&mut client, "mysqld").is_some());
    assert!(ws.read_config().contains("[mysqld]"));
}
