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

//! Kernel event queue backend

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Mutex;
use std::time::Duration;

use super::Poller;
use crate::notifier::Event;

const MAX_EVENTS: usize = 256;

/// kqueue poller for the BSD family. Interests are kept in a map so they can
/// be translated into add/delete filter records.
pub struct Kqueue {
    kq: RawFd,
    filters: Mutex<HashMap<RawFd, Event>>,
}

impl Kqueue {
    pub fn new() -> io::Result<Kqueue> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Kqueue {
            kq,
            filters: Mutex::new(HashMap::new()),
        })
    }

    fn update(&self, fd: RawFd, event: Event, flags: u16) -> io::Result<()> {
        let filter = match event {
            Event::Readable => libc::EVFILT_READ,
            Event::Writable => libc::EVFILT_WRITE,
            _ => return Ok(()),
        };

        let change = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        let rc = unsafe { libc::kevent(self.kq, &change, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}

impl Poller for Kqueue {
    fn register(&self, fd: RawFd, event: Event) -> io::Result<()> {
        self.filters.lock().unwrap().insert(fd, event);
        self.update(fd, event, libc::EV_ADD)
    }

    fn modify(&self, fd: RawFd, event: Event) -> io::Result<()> {
        self.unregister(fd)?;
        self.register(fd, event)
    }

    fn unregister(&self, fd: RawFd) -> io::Result<()> {
        match self.filters.lock().unwrap().remove(&fd) {
            Some(event) => self.update(fd, event, libc::EV_DELETE),
            None => Ok(()),
        }
    }

    fn poll(&self, timeout: Duration) -> io::Result<Vec<(RawFd, Event)>> {
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: libc::c_long::from(timeout.subsec_nanos() as i32),
        };
        let mut buf: [libc::kevent; MAX_EVENTS] = unsafe { mem::zeroed() };
        let rc = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                buf.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                &ts,
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
            let kind = if ev.flags & libc::EV_ERROR != 0 {
                Event::Error
            } else if ev.filter == libc::EVFILT_READ {
                Event::Readable
            } else if ev.filter == libc::EVFILT_WRITE {
                Event::Writable
            } else {
                continue;
            };
            events.push((ev.ident as RawFd, kind));
        }
        Ok(events)
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
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
        let poller = Kqueue::new().unwrap();
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
}
