//! Egress proxy enforcing [`NetworkRules`] per destination host
//!
//! The sandboxed child can only open TCP connections to this proxy. Every
//! CONNECT tunnel or plain HTTP request is checked against the rules; denied
//! destinations get a 403 and are recorded as violations for the supervisor.
//!
//! Request lines and headers are size-capped and read under a timeout.
//! [`NetworkProxy::stop`] waits for connections still in their request phase,
//! so a refusal is never recorded after the violations have been read.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::network::NetworkRules;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest accepted request or header line, terminator included
const MAX_LINE: usize = 8192;
const MAX_HEADERS: usize = 100;

/// How long a client may take to send its request head
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// A destination the child tried to reach and was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressViolation {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for EgressViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A local proxy that filters outbound connections
pub struct NetworkProxy {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    violations: Arc<Mutex<Vec<EgressViolation>>>,
    in_flight: Arc<InFlight>,
    worker: Option<JoinHandle<()>>,
}

/// Connections that have not yet decided whether their destination is allowed
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> RequestPhase {
        if let Ok(mut count) = self.count.lock() {
            *count += 1;
        }
        RequestPhase(Arc::clone(self))
    }

    /// Block until every request phase has finished or `timeout` elapses
    fn wait_idle(&self, timeout: Duration) {
        let Ok(count) = self.count.lock() else {
            return;
        };
        if let Ok((count, result)) = self.idle.wait_timeout_while(count, timeout, |c| *c > 0) {
            if result.timed_out() {
                tracing::warn!(pending = *count, "network proxy: gave up waiting for open requests");
            }
        }
    }
}

struct RequestPhase(Arc<InFlight>);

impl Drop for RequestPhase {
    fn drop(&mut self) {
        if let Ok(mut count) = self.0.count.lock() {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.0.idle.notify_all();
            }
        }
    }
}

impl NetworkProxy {
    /// Bind to a random loopback port and start serving
    pub fn start(rules: NetworkRules) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| Error::ProxyError(format!("failed to bind: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::ProxyError(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::ProxyError(e.to_string()))?;

        let running = Arc::new(AtomicBool::new(true));
        let violations = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(InFlight::default());
        let rules = Arc::new(rules);

        let worker = {
            let running = Arc::clone(&running);
            let violations = Arc::clone(&violations);
            let in_flight = Arc::clone(&in_flight);
            thread::spawn(move || accept_loop(listener, rules, running, violations, in_flight))
        };

        tracing::debug!(addr = %addr, "network proxy: started");

        Ok(Self {
            addr,
            running,
            violations,
            in_flight,
            worker: Some(worker),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Proxy URL for the `HTTP_PROXY` family of variables
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Destinations refused so far
    pub fn violations(&self) -> Vec<EgressViolation> {
        self.violations
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Stop accepting connections
    ///
    /// Connections already queued are still served, and the call returns once
    /// each of them has been allowed or refused. Established tunnels keep
    /// relaying until their peers close.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            self.in_flight.wait_idle(REQUEST_TIMEOUT);
        }
    }
}

impl Drop for NetworkProxy {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    rules: Arc<NetworkRules>,
    running: Arc<AtomicBool>,
    violations: Arc<Mutex<Vec<EgressViolation>>>,
    in_flight: Arc<InFlight>,
) {
    let serve = |stream: TcpStream, peer: SocketAddr| {
        let rules = Arc::clone(&rules);
        let violations = Arc::clone(&violations);
        let phase = in_flight.enter();
        thread::spawn(move || {
            if let Err(e) = handle_connection(stream, peer, &rules, &violations, phase) {
                tracing::debug!(error = %e, "network proxy: connection error");
            }
        });
    };

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => serve(stream, peer),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::error!(error = %e, "network proxy: accept error");
                return;
            }
        }
    }

    // Connections the child opened before it exited
    while let Ok((stream, peer)) = listener.accept() {
        serve(stream, peer);
    }
    tracing::debug!("network proxy: stopped");
}

fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    rules: &NetworkRules,
    violations: &Mutex<Vec<EgressViolation>>,
    phase: RequestPhase,
) -> io::Result<()> {
    client.set_nonblocking(false)?;
    client.set_read_timeout(Some(REQUEST_TIMEOUT))?;

    let mut reader = BufReader::new(client.try_clone()?);
    let (request_line, headers) = match read_request_head(&mut reader) {
        Ok(head) => head,
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            tracing::debug!(peer = %peer, error = %e, "network proxy: malformed request");
            client.write_all(BAD_REQUEST)?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        client.write_all(BAD_REQUEST)?;
        return Ok(());
    };
    let version = parts.next().unwrap_or("HTTP/1.1");

    let (host, port, path) = if method.eq_ignore_ascii_case("CONNECT") {
        let (host, port) = parse_host_port(target, 443);
        (host, port, None)
    } else {
        let (host, port, path) = parse_http_url(target);
        (host, port, Some(path))
    };

    tracing::debug!(method = %method, host = %host, port = port, peer = %peer, "network proxy: request");

    if !rules.permits(&host) {
        tracing::warn!(
            target: "muzzle::security",
            host = %host,
            port = port,
            "network proxy: egress denied by policy"
        );
        if let Ok(mut list) = violations.lock() {
            list.push(EgressViolation {
                host: host.clone(),
                port,
            });
        }
        drop(phase);
        client.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\nBlocked by sandbox policy\r\n")?;
        return Ok(());
    }
    drop(phase);
    client.set_read_timeout(None)?;

    let mut upstream = match TcpStream::connect((host.as_str(), port)) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(host = %host, port = port, error = %e, "network proxy: upstream connect failed");
            client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")?;
            return Ok(());
        }
    };

    match path {
        None => client.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")?,
        Some(path) => {
            // Origin-form request line; hop-by-hop proxy headers are dropped
            write!(upstream, "{method} {path} {version}\r\n")?;
            for header in headers
                .iter()
                .filter(|h| !h.to_ascii_lowercase().starts_with("proxy-"))
            {
                upstream.write_all(header.as_bytes())?;
            }
            upstream.write_all(b"\r\n")?;
        }
    }

    // Bytes the client pipelined behind the header block
    let pending = reader.buffer().to_vec();
    if !pending.is_empty() {
        upstream.write_all(&pending)?;
    }

    tunnel(client, upstream)
}

/// Read the request line and header block
///
/// Oversized lines, too many headers and non-UTF-8 input are `InvalidData`.
fn read_request_head(reader: &mut impl BufRead) -> io::Result<(String, Vec<String>)> {
    let request_line = read_line_limited(reader)?;
    if request_line.is_empty() {
        return Ok((request_line, Vec::new()));
    }

    let mut headers = Vec::new();
    loop {
        let line = read_line_limited(reader)?;
        if line.trim().is_empty() {
            return Ok((request_line, headers));
        }
        if headers.len() == MAX_HEADERS {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "too many headers"));
        }
        headers.push(line);
    }
}

fn read_line_limited(reader: &mut impl BufRead) -> io::Result<String> {
    let mut line = Vec::new();
    reader
        .by_ref()
        .take(MAX_LINE as u64 + 1)
        .read_until(b'\n', &mut line)?;
    if line.len() > MAX_LINE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
    }
    String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Copy bytes both ways until each side closes
fn tunnel(client: TcpStream, upstream: TcpStream) -> io::Result<()> {
    let mut client_read = client.try_clone()?;
    let mut upstream_write = upstream.try_clone()?;

    let outbound = thread::spawn(move || {
        let _ = copy_stream(&mut client_read, &mut upstream_write);
        let _ = upstream_write.shutdown(Shutdown::Write);
    });

    let mut upstream_read = upstream;
    let mut client_write = client;
    let _ = copy_stream(&mut upstream_read, &mut client_write);
    let _ = client_write.shutdown(Shutdown::Write);

    let _ = outbound.join();
    Ok(())
}

fn copy_stream(from: &mut impl Read, to: &mut impl Write) -> io::Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0;
    loop {
        let n = from.read(&mut buf)?;
        if n == 0 {
            return Ok(total);
        }
        to.write_all(&buf[..n])?;
        total += n as u64;
    }
}

/// Parse `host:port`, including bracketed IPv6 literals
fn parse_host_port(target: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = target.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    match target.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (target.to_string(), default_port),
        },
        None => (target.to_string(), default_port),
    }
}

/// Parse an absolute-form HTTP URL into host, port and path
fn parse_http_url(url: &str) -> (String, u16, String) {
    let (rest, default_port) = if let Some(stripped) = url.strip_prefix("http://") {
        (stripped, 80)
    } else if let Some(stripped) = url.strip_prefix("https://") {
        (stripped, 443)
    } else {
        (url, 80)
    };

    let (authority, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };

    let (host, port) = parse_host_port(authority, default_port);
    (host, port, path.to_string())
}
