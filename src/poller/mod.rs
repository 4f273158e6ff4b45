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

//! Poller backends wrapping the OS readiness mechanisms

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::notifier::Event;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub mod kqueue;
pub mod poll;
pub mod select;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use self::epoll::Epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub use self::kqueue::Kqueue;
pub use self::poll::Poll;
pub use self::select::Select;

/// The interface the notifier consumes from the OS: watch a descriptor for
/// one interest class, and block up to a timeout for `(descriptor, event)`
/// readiness pairs.
pub trait Poller: Send + Sync {
    fn register(&self, fd: RawFd, event: Event) -> io::Result<()>;
    fn modify(&self, fd: RawFd, event: Event) -> io::Result<()>;
    fn unregister(&self, fd: RawFd) -> io::Result<()>;
    fn poll(&self, timeout: Duration) -> io::Result<Vec<(RawFd, Event)>>;

    /// Interrupt a pending poll ahead of termination, if the backend can.
    fn terminate(&self) {}
}

/// Best available backend for this target.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn default_poller() -> io::Result<Box<dyn Poller>> {
    Ok(Box::new(Epoll::new()?))
}

/// Best available backend for this target.
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub fn default_poller() -> io::Result<Box<dyn Poller>> {
    Ok(Box::new(Kqueue::new()?))
}

/// Best available backend for this target.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
pub fn default_poller() -> io::Result<Box<dyn Poller>> {
    Ok(Box::new(Poll::new()))
}

fn timeout_ms(timeout: Duration) -> libc::c_int {
    timeout.as_millis().min(i32::max_value() as u128) as libc::c_int
}
