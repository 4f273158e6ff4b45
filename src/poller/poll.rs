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

//! Level-triggered poll(2) backend

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use super::{timeout_ms, Poller};
use crate::notifier::Event;

/// Level-triggered poller; the interest enumeration maps directly onto the
/// native flags. Interest changes made while another thread is blocked take
/// effect on the next iteration, bounded by the poll interval.
pub struct Poll {
    interests: Mutex<HashMap<RawFd, Event>>,
}

impl Poll {
    pub fn new() -> Poll {
        Poll {
            interests: Mutex::new(HashMap::new()),
        }
    }

    fn mask(event: Event) -> libc::c_short {
        match event {
            Event::Readable => libc::POLLIN,
            Event::Writable => libc::POLLOUT,
            // hang-ups and errors are reported regardless of the mask
            _ => 0,
        }
    }
}

impl Default for Poll {
    fn default() -> Poll {
        Poll::new()
    }
}

impl Poller for Poll {
    fn register(&self, fd: RawFd, event: Event) -> io::Result<()> {
        self.interests.lock().unwrap().insert(fd, event);
        Ok(())
    }

    fn modify(&self, fd: RawFd, event: Event) -> io::Result<()> {
        self.interests.lock().unwrap().insert(fd, event);
        Ok(())
    }

    fn unregister(&self, fd: RawFd) -> io::Result<()> {
        self.interests.lock().unwrap().remove(&fd);
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> io::Result<Vec<(RawFd, Event)>> {
        let mut fds: Vec<libc::pollfd> = {
            let interests = self.interests.lock().unwrap();
            interests
                .iter()
                .map(|(&fd, &event)| libc::pollfd {
                    fd,
                    events: Poll::mask(event),
                    revents: 0,
                })
                .collect()
        };
        if fds.is_empty() {
            thread::sleep(timeout);
            return Ok(Vec::new());
        }

        let rc = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut events = Vec::new();
        for pfd in &fds {
            if pfd.revents == 0 {
                continue;
            }
            let kind = if pfd.revents & libc::POLLIN != 0 {
                Event::Readable
            } else if pfd.revents & libc::POLLOUT != 0 {
                Event::Writable
            } else {
                Event::Error
            };
            events.push((pfd.fd, kind));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod test {
    use std::net::UdpSocket;
    use std::os::unix::io::AsRawFd;
    use std::time::Duration;

    use super::*;

    #[test]
    fn readable_datagram() {
        let poller = Poll::new();
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();

        poller.register(a.as_raw_fd(), Event::Readable).unwrap();
        poller.modify(a.as_raw_fd(), Event::Readable).unwrap();

        b.send_to(b"ping", a.local_addr().unwrap()).unwrap();
        let events = poller.poll(Duration::from_secs(2)).unwrap();
        assert!(events.contains(&(a.as_raw_fd(), Event::Readable)));

        poller.unregister(a.as_raw_fd()).unwrap();
        poller.unregister(a.as_raw_fd()).unwrap();
    }

    #[test]
    fn empty_poll_times_out() {
        let poller = Poll::new();
        let events = poller.poll(Duration::from_millis(10)).unwrap();
        assert!(events.is_empty());
    }
}
