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

//! select(2) fallback backend with a datagram self-pipe

use std::collections::HashSet;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::Poller;
use crate::notifier::Event;

struct Sets {
    read: HashSet<RawFd>,
    write: HashSet<RawFd>,
    error: HashSet<RawFd>,
}

/// Readiness multiplexer fallback. Maintains three descriptor sets and a
/// self-pipe built from a bound localhost datagram pair; every interest
/// change sends one byte to the command descriptor so the blocked call
/// returns and re-reads the sets on its next iteration.
pub struct Select {
    sets: Mutex<Sets>,
    /// Receives wake bytes; a permanent member of the read set.
    cmd_fd: RawFd,
    wake_fd: RawFd,
    wake_addr: libc::sockaddr_in,
    closed: AtomicBool,
}

fn udp_socket() -> io::Result<RawFd> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
    Ok(fd)
}

impl Select {
    pub fn new() -> io::Result<Select> {
        let cmd_fd = udp_socket()?;

        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr = libc::in_addr {
            s_addr: u32::from_ne_bytes([127, 0, 0, 1]),
        };
        addr.sin_port = 0;

        let len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let rc = unsafe {
            libc::bind(cmd_fd, &addr as *const _ as *const libc::sockaddr, len)
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(cmd_fd) };
            return Err(err);
        }

        let mut bound: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut bound_len = len;
        let rc = unsafe {
            libc::getsockname(
                cmd_fd,
                &mut bound as *mut _ as *mut libc::sockaddr,
                &mut bound_len,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(cmd_fd) };
            return Err(err);
        }

        let wake_fd = match udp_socket() {
            Ok(fd) => fd,
            Err(err) => {
                unsafe { libc::close(cmd_fd) };
                return Err(err);
            }
        };

        let mut read = HashSet::new();
        read.insert(cmd_fd);

        Ok(Select {
            sets: Mutex::new(Sets {
                read,
                write: HashSet::new(),
                error: HashSet::new(),
            }),
            cmd_fd,
            wake_fd,
            wake_addr: bound,
            closed: AtomicBool::new(false),
        })
    }

    /// One byte to the command descriptor so the blocked select returns.
    fn wake(&self) {
        let byte = [b'u'];
        unsafe {
            libc::sendto(
                self.wake_fd,
                byte.as_ptr() as *const libc::c_void,
                1,
                0,
                &self.wake_addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            );
        }
    }

    fn drain(&self) {
        let mut buf = [0u8; 128];
        loop {
            let rc = unsafe {
                libc::recv(self.cmd_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
            };
            if rc <= 0 {
                break;
            }
        }
    }
}

impl Poller for Select {
    fn register(&self, fd: RawFd, event: Event) -> io::Result<()> {
        {
            let mut sets = self.sets.lock().unwrap();
            match event {
                Event::Readable => {
                    sets.read.insert(fd);
                }
                Event::Writable => {
                    sets.write.insert(fd);
                }
                Event::Error => {
                    sets.error.insert(fd);
                }
                Event::None => {}
            }
        }
        self.wake();
        Ok(())
    }

    fn modify(&self, fd: RawFd, event: Event) -> io::Result<()> {
        {
            let mut sets = self.sets.lock().unwrap();
            sets.read.remove(&fd);
            sets.write.remove(&fd);
            sets.error.remove(&fd);
            match event {
                Event::Readable => {
                    sets.read.insert(fd);
                }
                Event::Writable => {
                    sets.write.insert(fd);
                }
                Event::Error => {
                    sets.error.insert(fd);
                }
                Event::None => {}
            }
        }
        self.wake();
        Ok(())
    }

    fn unregister(&self, fd: RawFd) -> io::Result<()> {
        {
            let mut sets = self.sets.lock().unwrap();
            sets.read.remove(&fd);
            sets.write.remove(&fd);
            sets.error.remove(&fd);
        }
        self.wake();
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> io::Result<Vec<(RawFd, Event)>> {
        let (read, write, error) = {
            let sets = self.sets.lock().unwrap();
            (sets.read.clone(), sets.write.clone(), sets.error.clone())
        };

        let mut rfds: libc::fd_set = unsafe { mem::zeroed() };
        let mut wfds: libc::fd_set = unsafe { mem::zeroed() };
        let mut efds: libc::fd_set = unsafe { mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut rfds);
            libc::FD_ZERO(&mut wfds);
            libc::FD_ZERO(&mut efds);
        }

        let mut maxfd = self.cmd_fd;
        unsafe { libc::FD_SET(self.cmd_fd, &mut rfds) };
        for &fd in read.iter() {
            unsafe { libc::FD_SET(fd, &mut rfds) };
            maxfd = maxfd.max(fd);
        }
        for &fd in write.iter() {
            unsafe { libc::FD_SET(fd, &mut wfds) };
            maxfd = maxfd.max(fd);
        }
        for &fd in error.iter() {
            unsafe { libc::FD_SET(fd, &mut efds) };
            maxfd = maxfd.max(fd);
        }

        let mut tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let rc = unsafe { libc::select(maxfd + 1, &mut rfds, &mut wfds, &mut efds, &mut tv) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut events = Vec::new();
        unsafe {
            if libc::FD_ISSET(self.cmd_fd, &mut rfds) {
                self.drain();
            }
            for &fd in read.iter() {
                if fd != self.cmd_fd && libc::FD_ISSET(fd, &mut rfds) {
                    events.push((fd, Event::Readable));
                }
            }
            for &fd in write.iter() {
                if libc::FD_ISSET(fd, &mut wfds) {
                    events.push((fd, Event::Writable));
                }
            }
            for &fd in error.iter() {
                if libc::FD_ISSET(fd, &mut efds) {
                    events.push((fd, Event::Error));
                }
            }
        }
        Ok(events)
    }

    fn terminate(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.wake();
        }
    }
}

impl Drop for Select {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.cmd_fd);
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
        let poller = Select::new().unwrap();
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
    fn wake_interrupts_poll() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Instant;

        let poller = Arc::new(Select::new().unwrap());
        let woken = poller.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
            woken.register(sock.as_raw_fd(), Event::Writable).unwrap();
            sock
        });

        let start = Instant::now();
        // a registration from another thread interrupts the long block
        let _ = poller.poll(Duration::from_secs(10)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        let _sock = waker.join().unwrap();
    }
}
