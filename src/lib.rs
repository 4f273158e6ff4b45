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

//! Cooperative coroutine runtime with readiness-driven socket I/O
//!
//! Network code is written as straight-line resumable procedures that yield
//! to a single-threaded [`Scheduler`] whenever they would block on a socket,
//! a timer or another coroutine. A [`Notifier`] thread polls the best
//! available OS readiness mechanism and resumes the waiting coroutine when
//! its descriptor becomes ready.
//!
//! A procedure implements [`Resumable`]: one `step` per scheduler tick,
//! consuming the value (or fault) delivered at its yield site and producing
//! the next yield. Yielding [`Yielded::Delegate`] runs a sub-procedure in
//! place; yielding [`Yielded::Child`] freezes the caller until a freshly
//! spawned coroutine finishes and hands back its final value.

#[macro_use]
extern crate log;

extern crate byteorder;
extern crate libc;
extern crate linked_hash_map;

#[cfg(test)]
extern crate env_logger;

pub mod coroutine;
pub mod net;
pub mod notifier;
pub mod poller;
pub mod scheduler;
pub mod sync;
pub mod timer;

pub use crate::coroutine::{
    CoroId, Fault, FaultKind, Handle, Input, Resumable, State, Step, Value, Yielded,
};
pub use crate::net::{AsyncSock, SockOpts};
pub use crate::notifier::{Event, Notifier};
pub use crate::scheduler::{Config, Scheduler};
pub use crate::sync::{CoroCondition, CoroLock};
pub use crate::timer::RepeatTimer;
