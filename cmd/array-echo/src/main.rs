//! Array Echo
//!
//! Single-threaded TCP server on the reactwire reactor. Each connection
//! receives a list of arrays (terminated by an empty array) and sends the
//! same list back, compressed if `REACTWIRE_COMPRESS=1`. Connections may
//! repeat this any number of times.
//!
//! Usage:
//!     cargo build --release -p array-echo
//!     ./target/release/array-echo server [port]
//!     ./target/release/array-echo client [port] [count] [size]
//!
//! Logging goes through `RUST_LOG` (default `info`):
//!     RUST_LOG=reactwire_runtime=debug ./target/release/array-echo server

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use reactwire::stream::serialize_all;
use reactwire::{
    ArrayDeserializer, ArraySerializer, Client, Context, Events, ExpiryConfig, Flow, HandlerResult, Reactor,
    ReactorConfig, ReactorError, StreamConfig, TransmitPolicy,
};

const DEFAULT_PORT: u16 = 9977;
const IO_BUF: usize = 16 * 1024;
const DEFAULT_IDLE: Duration = Duration::from_secs(30);

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigint(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

// ── Listener ──

struct Listener {
    socket: TcpListener,
    stream_config: StreamConfig,
    accepted: u64,
}

impl Client for Listener {
    fn descriptor(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn interest(&self) -> Events {
        Events::READ
    }

    fn handle(&mut self, _events: Events, ctx: &mut Context<'_>) -> HandlerResult {
        loop {
            match self.socket.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    let token = ctx.register(Box::new(Connection::new(stream, self.stream_config.clone())));
                    self.accepted += 1;
                    info!(%peer, %token, "connection accepted");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Flow::Continue),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn expiry(&self) -> Option<ExpiryConfig> {
        Some(ExpiryConfig::disabled())
    }

    fn finalize(&mut self) {
        info!(accepted = self.accepted, "listener closed");
    }
}

// ── Connection ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Receiving,
    Sending,
}

struct Connection {
    stream: TcpStream,
    de: ArrayDeserializer,
    ser: ArraySerializer,
    phase: Phase,
    /// Arrays of the current list, in order, terminator included
    echo: VecDeque<Vec<u8>>,
    /// Bytes read past the end of the last received list
    carry: Vec<u8>,
    rbuf: Vec<u8>,
    wbuf: Vec<u8>,
    staged: usize,
    flushed: usize,
    lists: u64,
}

impl Connection {
    fn new(stream: TcpStream, config: StreamConfig) -> Self {
        Self {
            stream,
            de: ArrayDeserializer::new(TransmitPolicy::List, config.clone()),
            ser: ArraySerializer::new(TransmitPolicy::List, config),
            phase: Phase::Receiving,
            echo: VecDeque::new(),
            carry: Vec::new(),
            rbuf: vec![0u8; IO_BUF],
            wbuf: vec![0u8; IO_BUF],
            staged: 0,
            flushed: 0,
            lists: 0,
        }
    }

    /// Feed `input` to the deserializer. Returns the unconsumed tail if a
    /// list completed.
    fn absorb(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>, reactwire::StreamError> {
        let echo = &mut self.echo;
        let step = self.de.deserialize(input, |arr| echo.push_back(arr))?;
        if step.done {
            Ok(Some(input[step.bytes..].to_vec()))
        } else {
            Ok(None)
        }
    }

    fn start_echo(&mut self, carry: Vec<u8>, ctx: &mut Context<'_>) {
        debug!(arrays = self.echo.len(), "list received");
        self.carry = carry;
        self.ser.reset();
        self.staged = 0;
        self.flushed = 0;
        self.phase = Phase::Sending;
        ctx.set_interest(Events::WRITE);
    }

    fn receive(&mut self, ctx: &mut Context<'_>) -> HandlerResult {
        if !self.carry.is_empty() {
            let carry = std::mem::take(&mut self.carry);
            if let Some(rest) = self.absorb(&carry)? {
                self.start_echo(rest, ctx);
                return Ok(Flow::Continue);
            }
        }
        loop {
            let n = match self.stream.read(&mut self.rbuf) {
                Ok(0) if self.echo.is_empty() && !self.de.is_done() => return Ok(Flow::Stop),
                Ok(0) => return Err("peer closed in the middle of a list".into()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Flow::Continue),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let input = self.rbuf[..n].to_vec();
            if let Some(rest) = self.absorb(&input)? {
                self.start_echo(rest, ctx);
                return Ok(Flow::Continue);
            }
        }
    }

    fn send(&mut self, ctx: &mut Context<'_>) -> HandlerResult {
        loop {
            if self.flushed < self.staged {
                match self.stream.write(&self.wbuf[self.flushed..self.staged]) {
                    Ok(n) => self.flushed += n,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Flow::Continue),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
                continue;
            }
            if self.ser.is_done() {
                self.lists += 1;
                self.de.reset();
                self.phase = Phase::Receiving;
                ctx.set_interest(Events::READ);
                // a pipelined list may already be waiting
                return self.receive(ctx);
            }
            let echo = &mut self.echo;
            let step = self.ser.serialize(&mut self.wbuf, || echo.pop_front().unwrap_or_default())?;
            self.staged = step.bytes;
            self.flushed = 0;
        }
    }
}

impl Client for Connection {
    fn descriptor(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn interest(&self) -> Events {
        Events::READ
    }

    fn handle(&mut self, _events: Events, ctx: &mut Context<'_>) -> HandlerResult {
        match self.phase {
            Phase::Receiving => self.receive(ctx),
            Phase::Sending => self.send(ctx),
        }
    }

    fn on_error(&mut self, err: &ReactorError, events: Events) {
        warn!(error = %err, ?events, "connection dropped");
    }

    fn on_expired(&mut self) {
        info!(lists = self.lists, "idle connection evicted");
    }

    fn finalize(&mut self) {
        debug!(lists = self.lists, "connection closed");
    }
}

// ── Modes ──

fn server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_sigint as libc::sighandler_t);
    }

    let mut config = ReactorConfig::from_env();
    if config.client_timeout.is_none() {
        config = config.client_timeout(Some(DEFAULT_IDLE));
    }
    // bounded waits so SIGINT is noticed even without traffic
    let wait = config.max_wait.unwrap_or(Duration::from_millis(500));
    config = config.max_wait(Some(wait));
    let stream_config = StreamConfig::from_env();

    let socket = TcpListener::bind(("0.0.0.0", port))?;
    socket.set_nonblocking(true)?;
    info!(
        port,
        compress = stream_config.compress,
        chunk_size = stream_config.chunk_size,
        idle = ?config.client_timeout,
        "array-echo listening"
    );

    let mut reactor = Reactor::new(config)?;
    reactor.register(Box::new(Listener {
        socket,
        stream_config,
        accepted: 0,
    }))?;

    while RUNNING.load(Ordering::Relaxed) && !reactor.is_empty() {
        reactor.run_once(None)?;
    }

    info!(stats = ?reactor.stats(), "array-echo shutting down");
    Ok(())
}

fn client(port: u16, count: usize, size: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = StreamConfig::from_env();
    let mut arrays: Vec<Vec<u8>> = (0..count)
        .map(|i| {
            let seed = i as u8;
            (0..size.max(1)).map(|j| seed.wrapping_add((j % 97) as u8)).collect()
        })
        .collect();
    arrays.push(Vec::new());

    let mut stream = TcpStream::connect(("127.0.0.1", port))?;
    stream.set_nodelay(true)?;
    let started = Instant::now();

    let mut ser = ArraySerializer::new(TransmitPolicy::List, config.clone());
    let wire = serialize_all(&mut ser, arrays.clone())?;
    stream.write_all(&wire)?;
    info!(arrays = count, bytes = wire.len(), "list sent");

    let mut de = ArrayDeserializer::new(TransmitPolicy::List, config);
    let mut echoed = Vec::new();
    let mut buf = vec![0u8; IO_BUF];
    while !de.is_done() {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err("server closed before the echo completed".into());
        }
        de.deserialize(&buf[..n], |arr| echoed.push(arr))?;
    }

    let elapsed = started.elapsed();
    if echoed != arrays {
        return Err(format!("echo mismatch: sent {} arrays, got {}", arrays.len(), echoed.len()).into());
    }
    info!(arrays = count, size, wire_bytes = wire.len(), ?elapsed, "echo verified");
    Ok(())
}

fn usage() {
    eprintln!("usage: array-echo server [port]");
    eprintln!("       array-echo client [port] [count] [size]");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_PORT);

    let result = match args.get(1).map(String::as_str) {
        Some("server") => server(port),
        Some("client") => {
            let count: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(16);
            let size: usize = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(64 * 1024);
            client(port, count, size)
        }
        _ => {
            usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!(error = %e, "array-echo failed");
        std::process::exit(1);
    }
}
