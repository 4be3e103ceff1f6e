// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use instance_manager::protocol::client::{Client, Endpoint};
use instance_manager::protocol::packets::Response;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// PASSWORD('secret')
const ROOT_HASH: &str = "*14E65567ABDB5135D0CFD9A70B3032C179A49EE7";
pub const USER: &str = "root";
pub const PASSWORD: &str = "secret";

/// Scratch layout for one manager run: option file, password file, sockets
/// and one data directory per instance.
pub struct Workspace {
    pub dir: TempDir,
    pub port: u16,
}

impl Workspace {
    pub fn new(config: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        std::fs::write(dir.path().join("passwd"), format!("{USER}:{ROOT_HASH}\n"))
            .expect("failed to write password file");
        let ws = Self {
            dir,
            port: free_port(),
        };
        ws.write_config(config);
        ws
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path("my.cnf")
    }

    pub fn write_config(&self, config: &str) {
        std::fs::write(self.config_path(), config).expect("failed to write option file");
    }

    pub fn read_config(&self) -> String {
        std::fs::read_to_string(self.config_path()).expect("failed to read option file")
    }

    /// Option file section for a guarded instance served by fake-mysqld.
    pub fn instance_section(&self, name: &str) -> String {
        let datadir = self.datadir(name);
        std::fs::create_dir_all(&datadir).expect("failed to create datadir");
        format!(
            "[{name}]\nsocket={}\ndatadir={}\nshutdown-delay=5\n",
            self.instance_socket(name).display(),
            datadir.display()
        )
    }

    pub fn datadir(&self, name: &str) -> PathBuf {
        self.path(&format!("data-{name}"))
    }

    pub fn instance_socket(&self, name: &str) -> PathBuf {
        self.path(&format!("{name}.sock"))
    }

    pub fn manager_socket(&self) -> PathBuf {
        self.path("manager.sock")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.path("manager.pid")
    }

    pub fn args(&self) -> Vec<String> {
        let path = |p: PathBuf| p.display().to_string();
        vec![
            format!("--defaults-file={}", path(self.config_path())),
            format!("--password-file={}", path(self.path("passwd"))),
            format!("--socket={}", path(self.manager_socket())),
            format!("--pid-file={}", path(self.pid_file())),
            format!("--angel-pid-file={}", path(self.path("angel.pid"))),
            "--bind-address=127.0.0.1".to_string(),
            format!("--port={}", self.port),
            format!("--default-mysqld-path={}", env!("CARGO_BIN_EXE_fake-mysqld")),
            "--monitoring-interval=1".to_string(),
            "--log-level=debug".to_string(),
        ]
    }

    /// Logs in to the running manager over its Unix socket.
    pub fn connect(&self) -> Client {
        let mut client = Client::connect(&Endpoint::Unix(self.manager_socket()), DEFAULT_TIMEOUT)
            .expect("failed to connect to the manager");
        client
            .handshake(USER, PASSWORD)
            .expect("handshake failed");
        client
    }

    pub fn connect_tcp(&self) -> Client {
        let endpoint = Endpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port: self.port,
        };
        Client::connect(&endpoint, DEFAULT_TIMEOUT).expect("failed to connect over TCP")
    }
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind an ephemeral port");
    listener.local_addr().expect("no local address").port()
}

/// Handle to a running mysqlmanager process.
pub struct DaemonHandle {
    child: Child,
    log_lines: Arc<Mutex<Vec<String>>>,
    _reader_thread: std::thread::JoinHandle<()>,
    _stderr_thread: std::thread::JoinHandle<()>,
}

impl DaemonHandle {
    pub fn start(ws: &Workspace) -> Self {
        Self::start_with(ws, &[])
    }

    pub fn start_with(ws: &Workspace, extra: &[&str]) -> Self {
        let bin = env!("CARGO_BIN_EXE_mysqlmanager");
        let mut child = Command::new(bin)
            .args(ws.args())
            .args(extra)
            .env_remove("MYSQLMANAGER_DEFAULTS_FILE")
            .env_remove("MYSQLMANAGER_ANGEL_CHILD")
            .env("FAKE_MYSQLD_DATADIR", ws.dir.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start mysqlmanager");

        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));

        // capture both streams; the test only cares about the merged log
        let reader_thread = spawn_reader(stdout, "[manager]", Arc::clone(&log_lines));
        let stderr_thread = spawn_reader(stderr, "[manager:err]", Arc::clone(&log_lines));

        Self {
            child,
            log_lines,
            _reader_thread: reader_thread,
            _stderr_thread: stderr_thread,
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        self.wait_for_log_count(pattern, 1, timeout)
    }

    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, DEFAULT_TIMEOUT)
    }

    pub fn count_log_matches(&self, pattern: &str) -> usize {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().filter(|l| l.contains(pattern)).count()
    }

    pub fn wait_for_log_count(&self, pattern: &str, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count_log_matches(pattern) >= n {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Index of the first line containing `pattern`.
    pub fn log_position(&self, pattern: &str) -> Option<usize> {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().position(|l| l.contains(pattern))
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to mysqlmanager");
    }

    /// Send SIGTERM and wait for the manager to exit.
    pub fn stop(&mut self) -> ExitStatus {
        self.send_signal(Signal::SIGTERM);
        self.wait_with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn wait_with_timeout(&mut self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait().expect("failed to check manager status") {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed manager");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// PIDs from "spawned (pid=NNN" log lines of instance `name`.
    pub fn spawned_pids(&self, name: &str) -> Vec<u32> {
        let marker = format!("[{name}] spawned (pid=");
        let lines = self.log_lines.lock().unwrap();
        lines
            .iter()
            .filter_map(|l| {
                let start = l.find(&marker)? + marker.len();
                let digits: String = l[start..].chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .collect()
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        // a polite stop first, so the fake servers it supervises go away too
        if matches!(self.child.try_wait(), Ok(None)) {
            self.send_signal(Signal::SIGTERM);
            let _ = self.wait_with_timeout(DEFAULT_TIMEOUT);
        }
    }
}

fn spawn_reader<R>(stream: R, tag: &'static str, sink: Arc<Mutex<Vec<String>>>) -> std::thread::JoinHandle<()>
where
    R: std::io::Read + Send + 'static,
{
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(l) => {
                    eprintln!("{tag} {l}");
                    sink.lock().unwrap().push(l);
                }
                Err(_) => break,
            }
        }
    })
}

pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    wait_until(timeout, || !pid_is_alive(pid))
}

pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

pub fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    wait_until(timeout, || path.exists())
}

/// Runs a query and expects a plain OK.
pub fn exec_ok(client: &mut Client, sql: &str) {
    match client.query(sql).expect("query failed") {
        Response::Ok { .. } => {}
        other => panic!("{sql}: expected OK, got {other:?}"),
    }
}

/// Runs a query and returns the server's error code.
pub fn exec_err(client: &mut Client, sql: &str) -> u16 {
    match client.query(sql).expect("query failed") {
        Response::Err { code, .. } => code,
        other => panic!("{sql}: expected an error, got {other:?}"),
    }
}

/// Runs a query and returns the rows of its result set.
pub fn rows(client: &mut Client, sql: &str) -> Vec<Vec<String>> {
    match client.query(sql).expect("query failed") {
        Response::ResultSet(rs) => rs.rows,
        other => panic!("{sql}: expected a result set, got {other:?}"),
    }
}

/// State column of SHOW INSTANCES for `name`.
pub fn instance_state(client: &mut Client, name: &str) -> Option<String> {
    rows(client, "SHOW INSTANCES")
        .into_iter()
        .find(|row| row.first().is_some_and(|n| n == name))
        .and_then(|row| row.get(1).cloned())
}
