//! Arrays streamed between reactor clients over real sockets
//!
//! Payloads are large enough that the socket buffer fills, so both sides
//! go through many partial writes and reads.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use reactwire::{
    ArrayDeserializer, ArraySerializer, Client, Context, Events, ExpiryConfig, Flow, HandlerResult, Reactor,
    ReactorConfig, ReactorError, StreamConfig, TransmitPolicy,
};

struct Sender {
    sock: UnixStream,
    ser: ArraySerializer,
    queue: VecDeque<Vec<u8>>,
    window: Vec<u8>,
    staged: Vec<u8>,
    staged_pos: usize,
}

impl Sender {
    fn new(sock: UnixStream, policy: TransmitPolicy, config: StreamConfig, arrays: Vec<Vec<u8>>) -> Box<Self> {
        sock.set_nonblocking(true).unwrap();
        Box::new(Self {
            sock,
            ser: ArraySerializer::new(policy, config),
            queue: arrays.into(),
            window: vec![0u8; 1500],
            staged: Vec::new(),
            staged_pos: 0,
        })
    }
}

impl Client for Sender {
    fn descriptor(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    fn interest(&self) -> Events {
        Events::WRITE
    }

    fn handle(&mut self, _events: Events, _ctx: &mut Context<'_>) -> HandlerResult {
        loop {
            if self.staged_pos < self.staged.len() {
                match self.sock.write(&self.staged[self.staged_pos..]) {
                    Ok(n) => self.staged_pos += n,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Flow::Continue),
                    Err(e) => return Err(e.into()),
                }
                continue;
            }
            if self.ser.is_done() {
                return Ok(Flow::Stop);
            }
            let queue = &mut self.queue;
            let step = self
                .ser
                .serialize(&mut self.window, || queue.pop_front().unwrap_or_default())?;
            self.staged.clear();
            self.staged.extend_from_slice(&self.window[..step.bytes]);
            self.staged_pos = 0;
        }
    }
}

#[derive(Default)]
struct Received {
    arrays: Vec<Vec<u8>>,
    done: bool,
    errors: Vec<String>,
    expired: bool,
    finalized: bool,
}

struct Receiver {
    sock: UnixStream,
    de: ArrayDeserializer,
    buf: Vec<u8>,
    expiry: Option<ExpiryConfig>,
    out: Rc<RefCell<Received>>,
}

impl Receiver {
    fn new(sock: UnixStream, policy: TransmitPolicy, config: StreamConfig, out: &Rc<RefCell<Received>>) -> Box<Self> {
        sock.set_nonblocking(true).unwrap();
        Box::new(Self {
            sock,
            de: ArrayDeserializer::new(policy, config),
            buf: vec![0u8; 777],
            expiry: None,
            out: out.clone(),
        })
    }
}

impl Client for Receiver {
    fn descriptor(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    fn interest(&self) -> Events {
        Events::READ
    }

    fn handle(&mut self, _events: Events, _ctx: &mut Context<'_>) -> HandlerResult {
        loop {
            let n = match self.sock.read(&mut self.buf) {
                Ok(0) => return Err("peer closed mid-operation".into()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Flow::Continue),
                Err(e) => return Err(e.into()),
            };
            let out = &self.out;
            let step = self
                .de
                .deserialize(&self.buf[..n], |arr| out.borrow_mut().arrays.push(arr))?;
            if step.done {
                self.out.borrow_mut().done = true;
                return Ok(Flow::Stop);
            }
        }
    }

    fn on_error(&mut self, err: &ReactorError, _events: Events) {
        self.out.borrow_mut().errors.push(err.to_string());
    }

    fn finalize(&mut self) {
        self.out.borrow_mut().finalized = true;
    }

    fn expiry(&self) -> Option<ExpiryConfig> {
        self.expiry
    }

    fn on_expired(&mut self) {
        self.out.borrow_mut().expired = true;
    }
}

fn payload(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    // sprinkle noise so not everything compresses away
    for _ in 0..len / 64 {
        let i = rng.gen_range(0..len);
        data[i] = rng.gen();
    }
    data
}

fn transfer(policy: TransmitPolicy, config: StreamConfig, arrays: Vec<Vec<u8>>) -> Received {
    let (a, b) = UnixStream::pair().unwrap();
    let received = Rc::new(RefCell::new(Received::default()));

    let mut reactor = Reactor::new(ReactorConfig::new()).unwrap();
    reactor.register(Sender::new(a, policy, config.clone(), arrays)).unwrap();
    reactor.register(Receiver::new(b, policy, config, &received)).unwrap();
    reactor.run().unwrap();
    assert!(reactor.is_empty());

    Rc::try_unwrap(received).ok().unwrap().into_inner()
}

#[test]
fn test_plain_list_over_socket() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut arrays: Vec<Vec<u8>> = [300_000, 1, 70_000, 4096].iter().map(|&n| payload(&mut rng, n)).collect();
    arrays.push(Vec::new());

    let got = transfer(TransmitPolicy::List, StreamConfig::default(), arrays.clone());
    assert!(got.done);
    assert!(got.errors.is_empty(), "{:?}", got.errors);
    assert!(got.finalized);
    assert_eq!(got.arrays, arrays);
}

#[test]
fn test_compressed_pair_list_over_socket() {
    let mut rng = StdRng::seed_from_u64(12);
    let arrays = vec![
        b"alpha".to_vec(),
        payload(&mut rng, 500_000),
        b"beta".to_vec(),
        payload(&mut rng, 2049),
        Vec::new(),
        Vec::new(),
    ];
    let config = StreamConfig::default().compress(true).chunk_size(1024);

    let got = transfer(TransmitPolicy::PairList, config, arrays.clone());
    assert!(got.done);
    assert!(got.errors.is_empty(), "{:?}", got.errors);
    assert_eq!(got.arrays, arrays);
}

#[test]
fn test_stalled_sender_expires_receiver() {
    let (peer, b) = UnixStream::pair().unwrap();
    let received = Rc::new(RefCell::new(Received::default()));

    let mut reactor = Reactor::new(ReactorConfig::new()).unwrap();
    let mut receiver = Receiver::new(b, TransmitPolicy::Single, StreamConfig::default(), &received);
    receiver.expiry = Some(ExpiryConfig::after(Duration::from_millis(50)));
    reactor.register(receiver).unwrap();

    // half an array prefix, then nothing
    (&peer).write_all(&[9, 0]).unwrap();

    let started = Instant::now();
    reactor.run().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));

    let got = received.borrow();
    assert!(got.expired);
    assert!(got.finalized);
    assert!(!got.done);
    assert!(got.arrays.is_empty());
    assert_eq!(reactor.stats().expired, 1);
    drop(peer);
}

#[test]
fn test_corrupt_stream_fails_only_that_client() {
    let (peer, b) = UnixStream::pair().unwrap();
    let (good_peer, good) = UnixStream::pair().unwrap();
    let bad_out = Rc::new(RefCell::new(Received::default()));
    let good_out = Rc::new(RefCell::new(Received::default()));

    let mut reactor = Reactor::new(ReactorConfig::new()).unwrap();
    let config = StreamConfig::default().max_array_len(16);
    reactor
        .register(Receiver::new(b, TransmitPolicy::Single, config.clone(), &bad_out))
        .unwrap();
    reactor
        .register(Receiver::new(good, TransmitPolicy::Single, config, &good_out))
        .unwrap();

    // declares a 1000-element array against a 16-element limit
    (&peer).write_all(&[0xE8, 0x03, 0, 0]).unwrap();
    (&good_peer).write_all(&[2, 0, 0, 0, b'o', b'k']).unwrap();
    reactor.run().unwrap();

    let bad = bad_out.borrow();
    assert_eq!(bad.errors.len(), 1);
    assert!(bad.errors[0].starts_with("handler failed"), "{}", bad.errors[0]);
    assert!(bad.finalized);

    let good = good_out.borrow();
    assert!(good.done);
    assert_eq!(good.arrays, vec![b"ok".to_vec()]);
}
