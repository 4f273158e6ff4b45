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

//! Readiness notifier driving socket continuations
//!
//! Inactivity is handled coarsely for efficiency: instead of a timeout per
//! socket there is one global `fd_timeout`, and every registered descriptor
//! is checked against it once per sweep.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::net::AsyncSock;
use crate::poller::{self, Poller};

/// Readiness interest for a descriptor; also the event class a poll reports
/// back. The backends translate it to their native flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    None,
    Readable,
    Writable,
    Error,
}

struct Shared {
    socks: Mutex<HashMap<RawFd, AsyncSock>>,
    poller: Box<dyn Poller>,
    poll_interval: Duration,
    fd_timeout: Duration,
    terminate: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Asynchronous I/O notifier. Owns the descriptor-to-socket map and a
/// dedicated thread polling the best available OS backend; on readiness it
/// runs the continuation the socket recorded when it armed itself.
#[derive(Clone)]
pub struct Notifier {
    shared: Arc<Shared>,
}

impl Notifier {
    pub(crate) fn new(poll_interval: Duration, fd_timeout: Duration) -> io::Result<Notifier> {
        let poller = poller::default_poller()?;
        let notifier = Notifier {
            shared: Arc::new(Shared {
                socks: Mutex::new(HashMap::new()),
                poller,
                poll_interval,
                fd_timeout,
                terminate: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        };

        let worker = {
            let notifier = notifier.clone();
            thread::Builder::new()
                .name("notifier".to_owned())
                .spawn(move || notifier.run())?
        };
        *notifier.shared.worker.lock().unwrap() = Some(worker);

        Ok(notifier)
    }

    fn run(&self) {
        trace!("notifier: starts");
        let mut last_sweep = Instant::now();

        while !self.shared.terminate.load(Ordering::Relaxed) {
            let events = match self.shared.poller.poll(self.shared.poll_interval) {
                Ok(events) => events,
                Err(err) => {
                    warn!("notifier: poll failed: {}", err);
                    thread::sleep(self.shared.poll_interval);
                    continue;
                }
            };

            let now = Instant::now();
            for (fd, event) in events {
                let sock = {
                    let socks = self.shared.socks.lock().unwrap();
                    socks.get(&fd).cloned()
                };
                let sock = match sock {
                    Some(sock) => sock,
                    None => {
                        debug!("notifier: event for unknown fd {}", fd);
                        continue;
                    }
                };

                match event {
                    Event::Readable | Event::Writable => {
                        sock.refresh_stamp(now);
                        if !sock.run_task() {
                            error!("notifier: fd {} has no pending operation", fd);
                        }
                    }
                    // error conditions are left alone for now
                    Event::Error => debug!("notifier: error condition on fd {}", fd),
                    Event::None => {}
                }
            }

            // measured from the last sweep, not from each poll
            if now.duration_since(last_sweep) >= self.shared.fd_timeout {
                last_sweep = now;
                let stale: Vec<(AsyncSock, Duration)> = {
                    let socks = self.shared.socks.lock().unwrap();
                    socks
                        .values()
                        .filter_map(|sock| {
                            sock.staleness(now, self.shared.fd_timeout)
                                .map(|idle| (sock.clone(), idle))
                        })
                        .collect()
                };
                for (sock, idle) in stale {
                    debug!("notifier: fd {} idle for {:?}", sock.fd(), idle);
                    sock.expire(idle);
                }
            }
        }

        debug!("notifier terminated");
    }

    /// Start tracking a socket; registered with zero interest until it arms
    /// itself.
    pub(crate) fn add_fd(&self, sock: &AsyncSock) {
        self.shared
            .socks
            .lock()
            .unwrap()
            .insert(sock.fd(), sock.clone());
        self.register(sock, Event::None);
    }

    /// Forget a socket. A second call for the same socket is a no-op.
    pub(crate) fn del_fd(&self, sock: &AsyncSock) {
        let known = self.shared.socks.lock().unwrap().remove(&sock.fd());
        if known.is_some() {
            self.unregister(sock);
        }
    }

    pub(crate) fn register(&self, sock: &AsyncSock, event: Event) {
        if let Err(err) = self.shared.poller.register(sock.fd(), event) {
            warn!("register of {} for {:?} failed: {}", sock.fd(), event, err);
        }
    }

    pub(crate) fn modify(&self, sock: &AsyncSock, event: Event) {
        if event == Event::None {
            sock.set_idle();
        }
        if let Err(err) = self.shared.poller.modify(sock.fd(), event) {
            warn!("modify of {} for {:?} failed: {}", sock.fd(), event, err);
        }
    }

    pub(crate) fn unregister(&self, sock: &AsyncSock) {
        match self.shared.poller.unregister(sock.fd()) {
            Ok(()) => sock.clear_stamp(),
            Err(err) => warn!("unregister of {} failed: {}", sock.fd(), err),
        }
    }

    /// Stop the polling thread. The current poll runs to its interval end
    /// unless the backend supports interruption.
    pub(crate) fn terminate(&self) {
        self.shared.terminate.store(true, Ordering::Relaxed);
        self.shared.poller.terminate();
        if let Some(worker) = self.shared.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}
