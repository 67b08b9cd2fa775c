//! End-to-end tests running the real `server` and `match-worker` binaries

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

const PATIENCE: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(150);

struct ServerProcess {
    child: Child,
    port: u16,
}

impl ServerProcess {
    /// Starts the server on a free loopback port and waits until it listens.
    fn start(extra: &[&str]) -> Self {
        let port = free_port();
        let mut child = Command::new(env!("CARGO_BIN_EXE_server"))
            .args(["--host", "127.0.0.1", "--port", &port.to_string()])
            .args(["--timeout-ms", "20"])
            .args(["--worker", env!("CARGO_BIN_EXE_match-worker")])
            .args(extra)
            .env("RUST_LOG", "info")
            .stderr(Stdio::piped())
            // Leader of its own group, like a shell job.
            .process_group(0)
            .spawn()
            .expect("spawn server");

        let logs = forward_lines(child.stderr.take().expect("server stderr"));
        let deadline = Instant::now() + PATIENCE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match logs.recv_timeout(remaining) {
                Ok(line) if line.contains("Listening on") => break,
                Ok(_) => continue,
                Err(_) => {
                    let _ = child.kill();
                    panic!("server did not start listening");
                }
            }
        }

        Self { child, port }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connect");
        stream.set_read_timeout(Some(PATIENCE)).unwrap();
        thread::sleep(SETTLE);
        stream
    }

    fn interrupt(&self) {
        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGINT).expect("send SIGINT");
    }

    /// Signals the server's whole process group, as Ctrl-C at a terminal does.
    fn interrupt_group(&self) {
        kill(Pid::from_raw(-(self.child.id() as i32)), Signal::SIGINT).expect("send SIGINT");
    }

    fn wait(&mut self) -> ExitStatus {
        let deadline = Instant::now() + PATIENCE;
        loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                return status;
            }
            assert!(Instant::now() < deadline, "server did not exit");
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Drains a child's output on a thread so the pipe never fills.
fn forward_lines<R: Read + Send + 'static>(output: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(output).lines().map_while(Result::ok) {
            eprintln!("{}", line);
            let _ = tx.send(line);
        }
    });
    rx
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read line");
    line
}

fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected close, got {:?}", &buf[..n]),
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        Err(e) => panic!("expected close, got {}", e),
    }
}

#[test]
fn four_clients_pair_in_arrival_order() {
    let mut server = ServerProcess::start(&[]);

    let mut a = BufReader::new(server.connect());
    let mut b = BufReader::new(server.connect());
    let c = server.connect();

    assert_eq!(read_line(&mut a), "MATCH 1 SEAT 1/2\n");
    assert_eq!(read_line(&mut b), "MATCH 1 SEAT 2/2\n");

    // The worker relays between the two seats.
    a.get_mut().write_all(b"e2e4\n").unwrap();
    assert_eq!(read_line(&mut b), "e2e4\n");

    // C waits alone until D arrives.
    c.set_read_timeout(Some(SETTLE * 2)).unwrap();
    let mut c = BufReader::new(c);
    let mut line = String::new();
    let err = c.read_line(&mut line).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut));
    c.get_ref().set_read_timeout(Some(PATIENCE)).unwrap();

    let mut d = BufReader::new(server.connect());
    assert_eq!(read_line(&mut c), "MATCH 2 SEAT 1/2\n");
    assert_eq!(read_line(&mut d), "MATCH 2 SEAT 2/2\n");

    drop((a, b, c, d));
    server.interrupt();
    assert_eq!(server.wait().code(), Some(0));
}

#[test]
fn client_past_capacity_is_closed() {
    let mut server = ServerProcess::start(&["--max-matches", "1"]);

    let mut a = BufReader::new(server.connect());
    let mut b = BufReader::new(server.connect());
    assert_eq!(read_line(&mut a), "MATCH 1 SEAT 1/2\n");
    assert_eq!(read_line(&mut b), "MATCH 1 SEAT 2/2\n");

    let mut late = server.connect();
    assert_closed(&mut late);

    drop((a, b));
    server.interrupt();
    assert_eq!(server.wait().code(), Some(0));
}

#[test]
fn sigint_closes_waiting_client_and_exits_cleanly() {
    let mut server = ServerProcess::start(&[]);
    let mut waiting = server.connect();

    server.interrupt();
    assert_eq!(server.wait().code(), Some(0));

    assert_closed(&mut waiting);
    assert!(TcpStream::connect(("127.0.0.1", server.port)).is_err());
}

#[test]
fn sigterm_is_handled_like_sigint() {
    let mut server = ServerProcess::start(&[]);

    kill(Pid::from_raw(server.child.id() as i32), Signal::SIGTERM).unwrap();
    assert_eq!(server.wait().code(), Some(0));
}

#[test]
fn task_isolation_serves_matches_too() {
    let mut server = ServerProcess::start(&["--isolation", "task"]);

    let mut a = BufReader::new(server.connect());
    let mut b = BufReader::new(server.connect());
    assert_eq!(read_line(&mut a), "MATCH 1 SEAT 1/2\n");
    assert_eq!(read_line(&mut b), "MATCH 1 SEAT 2/2\n");

    b.get_mut().write_all(b"hello\n").unwrap();
    assert_eq!(read_line(&mut a), "hello\n");

    drop((a, b));
    server.interrupt();
    assert_eq!(server.wait().code(), Some(0));
}

#[test]
fn port_in_use_exits_with_bind_error() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port().to_string();

    let output = Command::new(env!("CARGO_BIN_EXE_server"))
        .args(["--host", "127.0.0.1", "--port", &port])
        .output()
        .expect("run server");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bind error"), "{}", stderr);
}

#[test]
fn invalid_configuration_exits_with_code_2() {
    let output = Command::new(env!("CARGO_BIN_EXE_server"))
        .args(["--port", "0", "--players-per-match", "1"])
        .output()
        .expect("run server");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn running_match_survives_interrupt_of_server_group() {
    let mut server = ServerProcess::start(&[]);

    let mut a = BufReader::new(server.connect());
    let mut b = BufReader::new(server.connect());
    assert_eq!(read_line(&mut a), "MATCH 1 SEAT 1/2\n");
    assert_eq!(read_line(&mut b), "MATCH 1 SEAT 2/2\n");

    server.interrupt_group();
    assert_eq!(server.wait().code(), Some(0));

    // The worker still relays in both directions.
    a.get_mut().write_all(b"e2e4\n").unwrap();
    assert_eq!(read_line(&mut b), "e2e4\n");
    b.get_mut().write_all(b"e7e5\n").unwrap();
    assert_eq!(read_line(&mut a), "e7e5\n");
}

#[test]
fn oversized_limits_exit_with_code_2() {
    let cases: [&[&str]; 3] = [
        &["--max-matches", "10000000000000000000"],
        &["--max-matches", "1000000000000"],
        &["--max-pending-bytes", "1048576"],
    ];

    for args in cases {
        let output = Command::new(env!("CARGO_BIN_EXE_server"))
            .args(["--host", "127.0.0.1", "--port", "0"])
            .args(args)
            .output()
            .expect("run server");

        assert_eq!(output.status.code(), Some(2), "{:?}", args);
    }
}
