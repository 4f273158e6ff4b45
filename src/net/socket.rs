// The MIT License (MIT)

// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Socket façade with yield-based asynchronous operations
//!
//! An armed operation stores a continuation (the pending parameters plus the
//! waiting coroutine), suspends the caller and raises its interest with the
//! notifier. The notifier runs the continuation on readiness: one OS call,
//! then a resume or a throw into the waiting coroutine.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};

use crate::coroutine::{Fault, Handle, Input, Resumable, Step, Value, Yielded};
use crate::notifier::{Event, Notifier};
use crate::scheduler::Scheduler;

use super::sys;

/// Framing header: uid and payload length, both big-endian u32.
const MSG_HEADER_LEN: usize = 8;

/// Socket construction options.
#[derive(Clone, Debug)]
pub struct SockOpts {
    /// Byte string prefixed to every framed write unless suppressed.
    pub auth_code: Option<Vec<u8>>,
    /// Use the blocking variants; the socket never touches the notifier.
    pub blocking: bool,
    /// Track activity for the global inactivity sweep (non-blocking mode).
    pub track_timeout: bool,
    /// Socket-level I/O timeout (blocking mode only).
    pub io_timeout: Option<Duration>,
}

impl Default for SockOpts {
    fn default() -> SockOpts {
        SockOpts {
            auth_code: None,
            blocking: false,
            track_timeout: true,
            io_timeout: None,
        }
    }
}

/// Last-activity tracking of a registered descriptor.
#[derive(Clone, Copy)]
enum Activity {
    /// Not tracked; the sweep never touches this socket.
    Untracked,
    /// Tracked but between operations; never times out.
    Idle,
    Active(Instant),
}

/// Continuation for the next readiness event: the armed operation with its
/// pending parameters.
enum IoTask {
    Recv { cap: usize },
    RecvFrom { cap: usize },
    Read { cap: usize, buf: Vec<u8> },
    Send { data: Vec<u8> },
    SendTo { data: Vec<u8>, addr: SocketAddr },
    Write { data: Vec<u8>, pos: usize },
    Accept,
    Connect,
}

struct Ctl {
    task: Option<IoTask>,
    waiter: Option<Handle>,
    stamp: Activity,
}

struct Inner {
    fd: RawFd,
    kind: libc::c_int,
    blocking: bool,
    auth_code: Option<Vec<u8>>,
    notifier: Option<Notifier>,
    ctl: Mutex<Ctl>,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            sys::close(self.fd);
        }
    }
}

/// A socket owned by the runtime, in blocking or non-blocking mode.
///
/// Non-blocking operations take the calling coroutine's handle, arm the
/// socket and suspend the caller; the result arrives at the yield site.
/// Blocking variants (`sync_*`) delegate straight to the OS socket.
#[derive(Clone)]
pub struct AsyncSock {
    inner: Arc<Inner>,
}

impl AsyncSock {
    /// Take ownership of an OS socket. Non-blocking sockets register with
    /// the scheduler's notifier immediately.
    pub fn new<S: IntoRawFd>(sock: S, opts: SockOpts, sched: &Scheduler) -> io::Result<AsyncSock> {
        AsyncSock::from_fd(sock.into_raw_fd(), opts, sched)
    }

    /// Wrap a raw descriptor, e.g. one delivered by `accept`.
    pub fn from_fd(fd: RawFd, opts: SockOpts, sched: &Scheduler) -> io::Result<AsyncSock> {
        let kind = sys::sock_type(fd)?;

        if opts.blocking {
            sys::set_nonblocking(fd, false)?;
            if let Some(timeout) = opts.io_timeout {
                sys::set_io_timeout(fd, timeout)?;
            }
            return Ok(AsyncSock {
                inner: Arc::new(Inner {
                    fd,
                    kind,
                    blocking: true,
                    auth_code: opts.auth_code,
                    notifier: None,
                    ctl: Mutex::new(Ctl {
                        task: None,
                        waiter: None,
                        stamp: Activity::Untracked,
                    }),
                    closed: AtomicBool::new(false),
                }),
            });
        }

        sys::set_nonblocking(fd, true)?;
        let stamp = if opts.track_timeout {
            Activity::Idle
        } else {
            Activity::Untracked
        };
        let sock = AsyncSock {
            inner: Arc::new(Inner {
                fd,
                kind,
                blocking: false,
                auth_code: opts.auth_code,
                notifier: Some(sched.notifier().clone()),
                ctl: Mutex::new(Ctl {
                    task: None,
                    waiter: None,
                    stamp,
                }),
                closed: AtomicBool::new(false),
            }),
        };
        sock.notifier().add_fd(&sock);
        Ok(sock)
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.inner.fd
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.inner.blocking
    }

    #[inline]
    pub fn auth_code(&self) -> Option<&[u8]> {
        self.inner.auth_code.as_deref()
    }

    fn notifier(&self) -> &Notifier {
        self.inner
            .notifier
            .as_ref()
            .expect("async operation on a blocking socket")
    }

    /// Unregister from the notifier, then close the descriptor. A second
    /// close is a no-op.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(notifier) = &self.inner.notifier {
            notifier.del_fd(self);
        }
        sys::close(self.inner.fd);
    }

    // ---- non-blocking operations ----

    /// Receive at most `cap` bytes in one OS call; the caller is resumed
    /// with `Vec<u8>`.
    pub fn recv(&self, cap: usize, co: &Handle) {
        self.arm(IoTask::Recv { cap }, co, Event::Readable);
    }

    /// Receive one datagram; the caller is resumed with
    /// `(Vec<u8>, SocketAddr)`.
    pub fn recv_from(&self, cap: usize, co: &Handle) {
        self.arm(IoTask::RecvFrom { cap }, co, Event::Readable);
    }

    /// Send what the OS accepts in one call, no retry; the caller is
    /// resumed with the byte count actually sent as `usize`.
    pub fn send(&self, data: &[u8], co: &Handle) {
        self.arm(IoTask::Send { data: data.to_vec() }, co, Event::Writable);
    }

    pub fn send_to(&self, data: &[u8], addr: SocketAddr, co: &Handle) {
        self.arm(
            IoTask::SendTo {
                data: data.to_vec(),
                addr,
            },
            co,
            Event::Writable,
        );
    }

    /// Accumulate exactly `cap` bytes (or one datagram); the caller is
    /// resumed with `Vec<u8>`. A zero-byte return with no progress throws a
    /// disconnect.
    pub fn read(&self, cap: usize, co: &Handle) {
        self.arm(
            IoTask::Read {
                cap,
                buf: Vec::with_capacity(cap),
            },
            co,
            Event::Readable,
        );
    }

    /// Write the whole buffer, advancing a cursor across readiness events;
    /// the caller is resumed with `0usize` once the cursor reaches the end.
    pub fn write(&self, data: &[u8], co: &Handle) {
        self.arm(
            IoTask::Write {
                data: data.to_vec(),
                pos: 0,
            },
            co,
            Event::Writable,
        );
    }

    /// Accept one connection; the caller is resumed with
    /// `(RawFd, SocketAddr)`, the raw descriptor to be wrapped via
    /// [`AsyncSock::from_fd`]. Disables inactivity tracking on this socket.
    pub fn accept(&self, co: &Handle) {
        self.inner.ctl.lock().unwrap().stamp = Activity::Untracked;
        self.arm(IoTask::Accept, co, Event::Readable);
    }

    /// Arm for writability, then start a non-blocking connect, which is
    /// expected to fail with in-progress. The caller is resumed with
    /// `0usize` once the socket-level error option reads zero.
    pub fn connect(&self, addr: SocketAddr, co: &Handle) {
        self.arm(IoTask::Connect, co, Event::Writable);
        if let Err(err) = sys::connect(self.inner.fd, &addr) {
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                debug!("connect error on fd {}: {}", self.inner.fd, err);
            }
        }
    }

    fn arm(&self, task: IoTask, co: &Handle, interest: Event) {
        let notifier = self.notifier().clone();
        {
            let mut ctl = self.inner.ctl.lock().unwrap();
            ctl.task = Some(task);
            ctl.waiter = Some(co.clone());
            if !matches!(ctl.stamp, Activity::Untracked) {
                ctl.stamp = Activity::Active(Instant::now());
            }
        }
        // suspend before raising interest so a readiness event racing the
        // yield still lands on a suspended coroutine
        co.suspend();
        notifier.modify(self, interest);
    }

    /// Run the armed continuation. Returns false when nothing is armed,
    /// which the notifier reports as a logic error.
    pub(crate) fn run_task(&self) -> bool {
        let (task, waiter) = {
            let mut ctl = self.inner.ctl.lock().unwrap();
            (ctl.task.take(), ctl.waiter.clone())
        };
        let task = match task {
            Some(task) => task,
            None => return false,
        };
        let waiter = match waiter {
            Some(waiter) => waiter,
            None => {
                error!("fd {}: armed without a waiting coroutine", self.inner.fd);
                return true;
            }
        };

        match task {
            IoTask::Recv { cap } => {
                let mut buf = vec![0u8; cap];
                match sys::recv(self.inner.fd, &mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        self.complete(&waiter, Box::new(buf));
                    }
                    Err(ref err) if would_block(err) => self.rearm(IoTask::Recv { cap }),
                    Err(err) => self.fail(&waiter, Fault::io(err)),
                }
            }
            IoTask::RecvFrom { cap } => {
                let mut buf = vec![0u8; cap];
                match sys::recv_from(self.inner.fd, &mut buf) {
                    Ok((n, addr)) => {
                        buf.truncate(n);
                        self.complete(&waiter, Box::new((buf, addr)));
                    }
                    Err(ref err) if would_block(err) => self.rearm(IoTask::RecvFrom { cap }),
                    Err(err) => self.fail(&waiter, Fault::io(err)),
                }
            }
            IoTask::Read { cap, mut buf } => {
                let start = buf.len();
                let mut chunk = vec![0u8; cap - start];
                match sys::recv(self.inner.fd, &mut chunk) {
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        if buf.len() == cap || self.inner.kind == libc::SOCK_DGRAM {
                            self.complete(&waiter, Box::new(buf));
                        } else if buf.len() == start {
                            self.drop_interest();
                            waiter.throw(Fault::disconnected(format!(
                                "fd {}: peer closed after {} of {} bytes",
                                self.inner.fd, start, cap
                            )));
                        } else {
                            self.rearm(IoTask::Read { cap, buf });
                        }
                    }
                    Err(ref err) if would_block(err) => self.rearm(IoTask::Read { cap, buf }),
                    Err(err) => self.fail(&waiter, Fault::io(err)),
                }
            }
            IoTask::Send { data } => match sys::send(self.inner.fd, &data) {
                Ok(n) => self.complete(&waiter, Box::new(n)),
                Err(ref err) if would_block(err) => self.rearm(IoTask::Send { data }),
                Err(err) => {
                    debug!("fd {}: send failed: {}", self.inner.fd, err);
                    self.fail(&waiter, Fault::io(err));
                }
            },
            IoTask::SendTo { data, addr } => match sys::send_to(self.inner.fd, &data, &addr) {
                Ok(n) => self.complete(&waiter, Box::new(n)),
                Err(ref err) if would_block(err) => self.rearm(IoTask::SendTo { data, addr }),
                Err(err) => self.fail(&waiter, Fault::io(err)),
            },
            IoTask::Write { data, mut pos } => match sys::send(self.inner.fd, &data[pos..]) {
                Ok(n) => {
                    pos += n;
                    if pos == data.len() {
                        self.complete(&waiter, Box::new(0usize));
                    } else {
                        self.rearm(IoTask::Write { data, pos });
                    }
                }
                Err(ref err) if would_block(err) => self.rearm(IoTask::Write { data, pos }),
                Err(err) => {
                    error!("fd {}: writing failed: {}", self.inner.fd, err);
                    self.fail(&waiter, Fault::io(err));
                }
            },
            IoTask::Accept => match sys::accept(self.inner.fd) {
                Ok((fd, addr)) => self.complete(&waiter, Box::new((fd, addr))),
                Err(ref err) if would_block(err) => self.rearm(IoTask::Accept),
                Err(err) => self.fail(&waiter, Fault::io(err)),
            },
            IoTask::Connect => match sys::take_sock_error(self.inner.fd) {
                Ok(()) => self.complete(&waiter, Box::new(0usize)),
                Err(err) => {
                    debug!("connect error on fd {}: {}", self.inner.fd, err);
                    self.fail(&waiter, Fault::io(err));
                }
            },
        }
        true
    }

    /// Deliver a result: drop interest, clear the waiting link, resume.
    fn complete(&self, waiter: &Handle, value: Value) {
        self.drop_interest();
        waiter.resume(Some(value));
    }

    fn drop_interest(&self) {
        self.inner.ctl.lock().unwrap().waiter = None;
        self.notifier().modify(self, Event::None);
    }

    /// Error path: the descriptor comes off the poller entirely.
    fn fail(&self, waiter: &Handle, fault: Fault) {
        self.inner.ctl.lock().unwrap().waiter = None;
        self.notifier().unregister(self);
        waiter.throw(fault);
    }

    /// Keep the interest armed for the next readiness event.
    fn rearm(&self, task: IoTask) {
        self.inner.ctl.lock().unwrap().task = Some(task);
    }

    // ---- inactivity tracking, driven by the notifier ----

    pub(crate) fn refresh_stamp(&self, now: Instant) {
        let mut ctl = self.inner.ctl.lock().unwrap();
        if !matches!(ctl.stamp, Activity::Untracked) {
            ctl.stamp = Activity::Active(now);
        }
    }

    pub(crate) fn set_idle(&self) {
        let mut ctl = self.inner.ctl.lock().unwrap();
        if !matches!(ctl.stamp, Activity::Untracked) {
            ctl.stamp = Activity::Idle;
        }
    }

    pub(crate) fn clear_stamp(&self) {
        self.inner.ctl.lock().unwrap().stamp = Activity::Untracked;
    }

    pub(crate) fn staleness(&self, now: Instant, limit: Duration) -> Option<Duration> {
        let ctl = self.inner.ctl.lock().unwrap();
        if let Activity::Active(stamp) = ctl.stamp {
            let idle = now.duration_since(stamp);
            if idle >= limit {
                return Some(idle);
            }
        }
        None
    }

    /// Inactivity timeout: stop tracking and throw into the waiting
    /// coroutine. The descriptor stays registered.
    pub(crate) fn expire(&self, idle: Duration) {
        let waiter = {
            let mut ctl = self.inner.ctl.lock().unwrap();
            ctl.stamp = Activity::Untracked;
            ctl.waiter.clone()
        };
        if let Some(waiter) = waiter {
            waiter.throw(Fault::timeout(idle));
        }
    }

    // ---- framed messages ----

    /// Framed read as a sub-procedure; delegate into it with
    /// [`Yielded::Delegate`]. Finishes with `(Option<u32>, Option<Vec<u8>>)`;
    /// a short read on either section produces `(None, None)`.
    pub fn read_msg(&self) -> ReadMsg {
        ReadMsg {
            sock: self.clone(),
            state: ReadMsgState::Start,
        }
    }

    /// Framed write as a sub-procedure. The authentication prefix is
    /// emitted only if the socket carries one and `with_auth` is true.
    pub fn write_msg(&self, uid: u32, data: Vec<u8>, with_auth: bool) -> WriteMsg {
        WriteMsg {
            sock: self.clone(),
            uid,
            data: Some(data),
            with_auth,
            state: WriteMsgState::Start,
        }
    }

    // ---- blocking variants ----

    pub fn sync_recv(&self, cap: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; cap];
        let n = sys::recv(self.inner.fd, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn sync_send(&self, data: &[u8]) -> io::Result<usize> {
        sys::send(self.inner.fd, data)
    }

    pub fn sync_recv_from(&self, cap: usize) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; cap];
        let (n, addr) = sys::recv_from(self.inner.fd, &mut buf)?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    pub fn sync_send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        sys::send_to(self.inner.fd, data, &addr)
    }

    pub fn sync_accept(&self) -> io::Result<(RawFd, SocketAddr)> {
        sys::accept(self.inner.fd)
    }

    pub fn sync_connect(&self, addr: SocketAddr) -> io::Result<()> {
        sys::connect(self.inner.fd, &addr)
    }

    /// Blocking read of exactly `cap` bytes; short on end of stream.
    pub fn sync_read(&self, cap: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(cap);
        while buf.len() < cap {
            let mut chunk = vec![0u8; cap - buf.len()];
            let n = sys::recv(self.inner.fd, &mut chunk)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Ok(buf)
    }

    pub fn sync_write(&self, data: &[u8]) -> io::Result<()> {
        let mut pos = 0;
        while pos < data.len() {
            pos += sys::send(self.inner.fd, &data[pos..])?;
        }
        Ok(())
    }

    pub fn sync_read_msg(&self) -> io::Result<(Option<u32>, Option<Vec<u8>>)> {
        let info = self.sync_read(MSG_HEADER_LEN)?;
        if info.len() < MSG_HEADER_LEN {
            error!("socket disconnected? ({}/{})", info.len(), MSG_HEADER_LEN);
            return Ok((None, None));
        }
        let uid = BigEndian::read_u32(&info[..4]);
        let len = BigEndian::read_u32(&info[4..8]) as usize;
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "framed message with zero length",
            ));
        }
        let msg = self.sync_read(len)?;
        if msg.len() < len {
            error!("socket disconnected? ({}/{})", msg.len(), len);
            return Ok((None, None));
        }
        Ok((Some(uid), Some(msg)))
    }

    pub fn sync_write_msg(&self, uid: u32, data: &[u8], with_auth: bool) -> io::Result<()> {
        if with_auth {
            if let Some(auth) = self.inner.auth_code.clone() {
                self.sync_write(&auth)?;
            }
        }
        self.sync_write(&pack_frame(uid, data))
    }
}

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

fn pack_frame(uid: u32, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; MSG_HEADER_LEN];
    BigEndian::write_u32(&mut frame[..4], uid);
    BigEndian::write_u32(&mut frame[4..8], data.len() as u32);
    frame.extend_from_slice(data);
    frame
}

#[derive(Clone, Copy)]
enum ReadMsgState {
    Start,
    Header,
    Payload { uid: u32, len: usize },
    Finished,
}

/// Sub-procedure reading one framed message: exactly eight header bytes,
/// then exactly `len` payload bytes.
pub struct ReadMsg {
    sock: AsyncSock,
    state: ReadMsgState,
}

impl Resumable for ReadMsg {
    fn step(&mut self, co: &Handle, input: Input) -> Step {
        if let Input::Fault(fault) = input {
            return Step::Failed(fault);
        }

        match self.state {
            ReadMsgState::Start => {
                self.sock.read(MSG_HEADER_LEN, co);
                self.state = ReadMsgState::Header;
                Step::Yield(Yielded::Nil)
            }
            ReadMsgState::Header => {
                let info = match input.downcast::<Vec<u8>>() {
                    Some(info) => info,
                    None => return Step::Failed(Fault::app("framed read expected bytes")),
                };
                if info.len() < MSG_HEADER_LEN {
                    error!("socket disconnected? ({}/{})", info.len(), MSG_HEADER_LEN);
                    self.state = ReadMsgState::Finished;
                    return disconnected_frame();
                }
                let uid = BigEndian::read_u32(&info[..4]);
                let len = BigEndian::read_u32(&info[4..8]) as usize;
                if len == 0 {
                    return Step::Failed(Fault::app("framed message with zero length"));
                }
                self.sock.read(len, co);
                self.state = ReadMsgState::Payload { uid, len };
                Step::Yield(Yielded::Nil)
            }
            ReadMsgState::Payload { uid, len } => {
                self.state = ReadMsgState::Finished;
                let msg = match input.downcast::<Vec<u8>>() {
                    Some(msg) => msg,
                    None => return Step::Failed(Fault::app("framed read expected bytes")),
                };
                if msg.len() < len {
                    error!("socket disconnected? ({}/{})", msg.len(), len);
                    return disconnected_frame();
                }
                Step::Yield(Yielded::Value(Box::new((Some(uid), Some(msg)))))
            }
            ReadMsgState::Finished => Step::Done(input),
        }
    }
}

fn disconnected_frame() -> Step {
    Step::Yield(Yielded::Value(Box::new((None::<u32>, None::<Vec<u8>>))))
}

#[derive(Clone, Copy)]
enum WriteMsgState {
    Start,
    Auth,
    Body,
}

/// Sub-procedure writing one framed message, auth prefix first when the
/// socket carries one.
pub struct WriteMsg {
    sock: AsyncSock,
    uid: u32,
    data: Option<Vec<u8>>,
    with_auth: bool,
    state: WriteMsgState,
}

impl WriteMsg {
    fn send_frame(&mut self, co: &Handle) -> Step {
        let data = self.data.take().unwrap_or_default();
        let frame = pack_frame(self.uid, &data);
        self.sock.write(&frame, co);
        self.state = WriteMsgState::Body;
        Step::Yield(Yielded::Nil)
    }
}

impl Resumable for WriteMsg {
    fn step(&mut self, co: &Handle, input: Input) -> Step {
        if let Input::Fault(fault) = input {
            return Step::Failed(fault);
        }

        match self.state {
            WriteMsgState::Start => {
                if self.with_auth {
                    if let Some(auth) = self.sock.auth_code().map(|a| a.to_vec()) {
                        self.sock.write(&auth, co);
                        self.state = WriteMsgState::Auth;
                        return Step::Yield(Yielded::Nil);
                    }
                }
                self.send_frame(co)
            }
            WriteMsgState::Auth => self.send_frame(co),
            // the final write resumed with zero; finish with it
            WriteMsgState::Body => Step::Done(input),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream, UdpSocket};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::coroutine::FaultKind;
    use crate::net::sys;
    use crate::scheduler::Config;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn quick() -> Scheduler {
        let _ = env_logger::builder().is_test(true).try_init();
        Scheduler::with_config(Config {
            poll_interval: ms(50),
            fd_timeout: ms(250),
        })
        .unwrap()
    }

    fn untracked() -> SockOpts {
        SockOpts {
            track_timeout: false,
            ..SockOpts::default()
        }
    }

    #[test]
    fn frame_layout() {
        let frame = pack_frame(7, b"hi");
        assert_eq!(frame, b"\x00\x00\x00\x07\x00\x00\x00\x02hi");
    }

    #[test]
    fn framed_auth_bytes() {
        let sched = quick();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let opts = SockOpts {
            auth_code: Some(b"S3CR".to_vec()),
            blocking: true,
            ..SockOpts::default()
        };
        let sock = AsyncSock::new(client, opts, &sched).unwrap();
        sock.sync_write_msg(7, b"hi", true).unwrap();

        let mut wire = [0u8; 14];
        server.read_exact(&mut wire).unwrap();
        assert_eq!(&wire[..], &b"S3CR\x00\x00\x00\x07\x00\x00\x00\x02hi"[..]);

        // with the prefix stripped, the frame parses
        sock.sync_write_msg(7, b"hi", true).unwrap();
        let reader = AsyncSock::new(
            server,
            SockOpts {
                blocking: true,
                ..SockOpts::default()
            },
            &sched,
        )
        .unwrap();
        assert_eq!(reader.sync_read(4).unwrap(), b"S3CR");
        let (uid, msg) = reader.sync_read_msg().unwrap();
        assert_eq!(uid, Some(7));
        assert_eq!(msg.as_deref(), Some(&b"hi"[..]));

        sock.close();
        reader.close();
        sched.terminate();
    }

    #[test]
    fn zero_length_frame_rejected() {
        let sched = quick();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        client
            .write_all(b"\x00\x00\x00\x07\x00\x00\x00\x00")
            .unwrap();

        let reader = AsyncSock::new(
            server,
            SockOpts {
                blocking: true,
                ..SockOpts::default()
            },
            &sched,
        )
        .unwrap();
        let err = reader.sync_read_msg().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        reader.close();
        sched.terminate();
    }

    enum ServerState {
        Start,
        Accepting,
        Reading,
        Writing,
    }

    struct EchoServer {
        sched: Scheduler,
        listener: AsyncSock,
        conn: Option<AsyncSock>,
        state: ServerState,
    }

    impl Resumable for EchoServer {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            match self.state {
                ServerState::Start => {
                    self.listener.accept(co);
                    self.state = ServerState::Accepting;
                    Step::Yield(Yielded::Nil)
                }
                ServerState::Accepting => {
                    let (fd, _peer) = input.downcast::<(RawFd, SocketAddr)>().unwrap();
                    let conn = AsyncSock::from_fd(fd, SockOpts::default(), &self.sched).unwrap();
                    conn.read(4, co);
                    self.conn = Some(conn);
                    self.state = ServerState::Reading;
                    Step::Yield(Yielded::Nil)
                }
                ServerState::Reading => {
                    let data = input.downcast::<Vec<u8>>().unwrap();
                    self.conn.as_ref().unwrap().write(&data, co);
                    self.state = ServerState::Writing;
                    Step::Yield(Yielded::Nil)
                }
                ServerState::Writing => {
                    self.conn.as_ref().unwrap().close();
                    self.listener.close();
                    Step::Done(Input::Nil)
                }
            }
        }
    }

    enum ClientState {
        Start,
        Connecting,
        Writing,
        Reading,
    }

    struct EchoClient {
        sock: AsyncSock,
        addr: SocketAddr,
        got: Arc<Mutex<Option<Vec<u8>>>>,
        state: ClientState,
    }

    impl Resumable for EchoClient {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            match self.state {
                ClientState::Start => {
                    self.sock.connect(self.addr, co);
                    self.state = ClientState::Connecting;
                    Step::Yield(Yielded::Nil)
                }
                ClientState::Connecting => {
                    self.sock.write(b"PING", co);
                    self.state = ClientState::Writing;
                    Step::Yield(Yielded::Nil)
                }
                ClientState::Writing => {
                    self.sock.read(4, co);
                    self.state = ClientState::Reading;
                    Step::Yield(Yielded::Nil)
                }
                ClientState::Reading => {
                    *self.got.lock().unwrap() = input.downcast::<Vec<u8>>();
                    self.sock.close();
                    Step::Done(Input::Nil)
                }
            }
        }
    }

    #[test]
    fn echo_round_trip() {
        let sched = quick();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let listener = AsyncSock::new(listener, untracked(), &sched).unwrap();

        let got = Arc::new(Mutex::new(None));
        sched.spawn(
            "echo-server",
            EchoServer {
                sched: sched.clone(),
                listener,
                conn: None,
                state: ServerState::Start,
            },
        );

        let client = AsyncSock::from_fd(sys::tcp_socket().unwrap(), untracked(), &sched).unwrap();
        sched.spawn(
            "echo-client",
            EchoClient {
                sock: client,
                addr,
                got: got.clone(),
                state: ClientState::Start,
            },
        );

        sched.join();
        assert_eq!(got.lock().unwrap().as_deref(), Some(&b"PING"[..]));
        sched.terminate();
    }

    enum FramedServerState {
        Start,
        Accepting,
        Auth,
        Msg,
    }

    struct FramedServer {
        sched: Scheduler,
        listener: AsyncSock,
        conn: Option<AsyncSock>,
        got_auth: Arc<Mutex<Option<Vec<u8>>>>,
        got_msg: Arc<Mutex<Option<(Option<u32>, Option<Vec<u8>>)>>>,
        state: FramedServerState,
    }

    impl Resumable for FramedServer {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            match self.state {
                FramedServerState::Start => {
                    self.listener.accept(co);
                    self.state = FramedServerState::Accepting;
                    Step::Yield(Yielded::Nil)
                }
                FramedServerState::Accepting => {
                    let (fd, _peer) = input.downcast::<(RawFd, SocketAddr)>().unwrap();
                    let conn = AsyncSock::from_fd(fd, SockOpts::default(), &self.sched).unwrap();
                    // the auth prefix is not part of the frame; strip it
                    conn.read(4, co);
                    self.conn = Some(conn);
                    self.state = FramedServerState::Auth;
                    Step::Yield(Yielded::Nil)
                }
                FramedServerState::Auth => {
                    *self.got_auth.lock().unwrap() = input.downcast::<Vec<u8>>();
                    let msg = self.conn.as_ref().unwrap().read_msg();
                    self.state = FramedServerState::Msg;
                    Step::Yield(Yielded::Delegate(Box::new(msg)))
                }
                FramedServerState::Msg => {
                    *self.got_msg.lock().unwrap() =
                        input.downcast::<(Option<u32>, Option<Vec<u8>>)>();
                    self.conn.as_ref().unwrap().close();
                    self.listener.close();
                    Step::Done(Input::Nil)
                }
            }
        }
    }

    enum FramedClientState {
        Start,
        Connecting,
        Sent,
    }

    struct FramedClient {
        sock: AsyncSock,
        addr: SocketAddr,
        state: FramedClientState,
    }

    impl Resumable for FramedClient {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            match self.state {
                FramedClientState::Start => {
                    self.sock.connect(self.addr, co);
                    self.state = FramedClientState::Connecting;
                    Step::Yield(Yielded::Nil)
                }
                FramedClientState::Connecting => {
                    let msg = self.sock.write_msg(7, b"hi".to_vec(), true);
                    self.state = FramedClientState::Sent;
                    Step::Yield(Yielded::Delegate(Box::new(msg)))
                }
                FramedClientState::Sent => {
                    self.sock.close();
                    Step::Done(input)
                }
            }
        }
    }

    #[test]
    fn framed_exchange_with_auth() {
        let sched = quick();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let listener = AsyncSock::new(listener, untracked(), &sched).unwrap();

        let got_auth = Arc::new(Mutex::new(None));
        let got_msg = Arc::new(Mutex::new(None));
        sched.spawn(
            "framed-server",
            FramedServer {
                sched: sched.clone(),
                listener,
                conn: None,
                got_auth: got_auth.clone(),
                got_msg: got_msg.clone(),
                state: FramedServerState::Start,
            },
        );

        let mut opts = untracked();
        opts.auth_code = Some(b"S3CR".to_vec());
        let client = AsyncSock::from_fd(sys::tcp_socket().unwrap(), opts, &sched).unwrap();
        sched.spawn(
            "framed-client",
            FramedClient {
                sock: client,
                addr,
                state: FramedClientState::Start,
            },
        );

        sched.join();
        assert_eq!(got_auth.lock().unwrap().as_deref(), Some(&b"S3CR"[..]));
        let (uid, msg) = got_msg.lock().unwrap().take().unwrap();
        assert_eq!(uid, Some(7));
        assert_eq!(msg.as_deref(), Some(&b"hi"[..]));
        sched.terminate();
    }

    struct DgramSender {
        sock: AsyncSock,
        addr: SocketAddr,
        sent: bool,
    }

    impl Resumable for DgramSender {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            if !self.sent {
                self.sent = true;
                self.sock.send_to(b"DGRAM", self.addr, co);
                return Step::Yield(Yielded::Nil);
            }
            self.sock.close();
            Step::Done(input)
        }
    }

    struct DgramReceiver {
        sock: AsyncSock,
        got: Arc<Mutex<Option<Vec<u8>>>>,
        armed: bool,
    }

    impl Resumable for DgramReceiver {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            if !self.armed {
                self.armed = true;
                self.sock.recv_from(64, co);
                return Step::Yield(Yielded::Nil);
            }
            if let Some((data, _peer)) = input.downcast::<(Vec<u8>, SocketAddr)>() {
                *self.got.lock().unwrap() = Some(data);
            }
            self.sock.close();
            Step::Done(Input::Nil)
        }
    }

    #[test]
    fn datagram_send_recv() {
        let sched = quick();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        let got = Arc::new(Mutex::new(None));
        sched.spawn(
            "dgram-receiver",
            DgramReceiver {
                sock: AsyncSock::new(receiver, untracked(), &sched).unwrap(),
                got: got.clone(),
                armed: false,
            },
        );
        sched.spawn(
            "dgram-sender",
            DgramSender {
                sock: AsyncSock::new(sender, untracked(), &sched).unwrap(),
                addr,
                sent: false,
            },
        );

        sched.join();
        assert_eq!(got.lock().unwrap().as_deref(), Some(&b"DGRAM"[..]));
        sched.terminate();
    }

    struct FaultReader {
        sock: AsyncSock,
        got: Arc<Mutex<Option<FaultKind>>>,
        armed: bool,
    }

    impl Resumable for FaultReader {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            if !self.armed {
                self.armed = true;
                self.sock.read(4, co);
                return Step::Yield(Yielded::Nil);
            }
            if let Input::Fault(fault) = input {
                *self.got.lock().unwrap() = Some(fault.kind);
            }
            self.sock.close();
            Step::Done(Input::Nil)
        }
    }

    #[test]
    fn disconnect_throws() {
        let sched = quick();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        let got = Arc::new(Mutex::new(None));
        sched.spawn(
            "fault-reader",
            FaultReader {
                sock: AsyncSock::new(server, untracked(), &sched).unwrap(),
                got: got.clone(),
                armed: false,
            },
        );

        thread::sleep(ms(100));
        drop(client);
        sched.join();

        assert_eq!(*got.lock().unwrap(), Some(FaultKind::Disconnected));
        sched.terminate();
    }

    struct StarvedReader {
        sock: AsyncSock,
        got: Arc<Mutex<Option<FaultKind>>>,
        armed: bool,
    }

    impl Resumable for StarvedReader {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            if !self.armed {
                self.armed = true;
                self.sock.recv(64, co);
                return Step::Yield(Yielded::Nil);
            }
            if let Input::Fault(fault) = input {
                *self.got.lock().unwrap() = Some(fault.kind);
            }
            self.sock.close();
            Step::Done(Input::Nil)
        }
    }

    #[test]
    fn inactivity_timeout() {
        let sched = quick();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        let got = Arc::new(Mutex::new(None));
        sched.spawn(
            "starved-reader",
            StarvedReader {
                sock: AsyncSock::new(server, SockOpts::default(), &sched).unwrap(),
                got: got.clone(),
                armed: false,
            },
        );

        // the peer stays silent; the sweep throws within two fd_timeouts
        sched.join();
        assert_eq!(*got.lock().unwrap(), Some(FaultKind::Timeout));
        sched.terminate();
    }
}
