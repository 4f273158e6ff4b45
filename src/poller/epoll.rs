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

//! Edge-triggered epoll backend

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{timeout_ms, Poller};
use crate::notifier::Event;

const MAX_EVENTS: usize = 256;

/// Edge-triggered kernel poller, preferred where available.
pub struct Epoll {
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Epoll { epfd })
    }

    fn flags(event: Event) -> u32 {
        match event {
            Event::None => 0,
            Event::Readable => (libc::EPOLLIN | libc::EPOLLET) as u32,
            Event::Writable => (libc::EPOLLOUT | libc::EPOLLET) as u32,
            Event::Error => (libc::EPOLLHUP | libc::EPOLLERR) as u32,
        }
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, flags: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: flags,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Poller for Epoll {
    fn register(&self, fd: RawFd, event: Event) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_ADD, fd, Epoll::flags(event)) {
            Err(ref err) if err.raw_os_error() == Some(libc::EEXIST) => {
                self.ctl(libc::EPOLL_CTL_MOD, fd, Epoll::flags(event))
            }
            other => other,
        }
    }

    fn modify(&self, fd: RawFd, event: Event) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_MOD, fd, Epoll::flags(event)) {
            Err(ref err) if err.raw_os_error() == Some(libc::ENOENT) => {
                self.ctl(libc::EPOLL_CTL_ADD, fd, Epoll::flags(event))
            }
            other => other,
        }
    }

    fn unregister(&self, fd: RawFd) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_DEL, fd, 0) {
            Err(ref err)
                if err.raw_os_error() == Some(libc::ENOENT)
                    || err.raw_os_error() == Some(libc::EBADF) =>
            {
                Ok(())
            }
            other => other,
        }
    }

    fn poll(&self, timeout: Duration) -> io::Result<Vec<(RawFd, Event)>> {
        let mut buf: [libc::epoll_event; MAX_EVENTS] = unsafe { mem::zeroed() };
        let rc = unsafe {
            libc::epoll_wait(
                self.epfd,
                buf.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
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

        let mut events = Vec::with_capacity(rc as usize);
        for ev in buf.iter().take(rc as usize) {
            let fd = ev.u64 as RawFd;
            // readable/writable win over the error class so a closing peer
            // still delivers its final bytes
            let kind = if ev.events & libc::EPOLLIN as u32 != 0 {
                Event::Readable
            } else if ev.events & libc::EPOLLOUT as u32 != 0 {
                Event::Writable
            } else {
                Event::Error
            };
            events.push((fd, kind));
        }
        Ok(events)
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
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
        let poller = Epoll::new().unwrap();
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();

        poller.register(a.as_raw_fd(), Event::Readable).unwrap();
        // register followed by modify with the same interest is equivalent
        // to register
        poller.modify(a.as_raw_fd(), Event::Readable).unwrap();

        b.send_to(b"ping", a.local_addr().unwrap()).unwrap();
        let events = poller.poll(Duration::from_secs(2)).unwrap();
        assert!(events.contains(&(a.as_raw_fd(), Event::Readable)));

        poller.unregister(a.as_raw_fd()).unwrap();
        // double unregister is a silent no-op
        poller.unregister(a.as_raw_fd()).unwrap();
    }
}
