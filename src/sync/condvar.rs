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

//! Condition variable for coroutines

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::coroutine::{CoroId, Handle};

struct CondState {
    owner: Option<CoroId>,
    notified: bool,
    waiters: VecDeque<Handle>,
}

/// Condition primitive for coroutines.
///
/// The same discipline as [`CoroLock`](crate::sync::CoroLock): no suspension
/// between `acquire` and `release`, except inside `wait`.
pub struct CoroCondition {
    state: Mutex<CondState>,
}

impl CoroCondition {
    pub fn new() -> CoroCondition {
        CoroCondition {
            state: Mutex::new(CondState {
                owner: None,
                notified: false,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn acquire(&self, co: &Handle) {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.owner.is_none(),
            "invalid cv acquire: held by #{:?}, wanted by #{}",
            state.owner,
            co.id()
        );
        state.owner = Some(co.id());
    }

    pub fn release(&self, co: &Handle) {
        let mut state = self.state.lock().unwrap();
        assert_eq!(
            state.owner,
            Some(co.id()),
            "invalid cv release by #{}",
            co.id()
        );
        state.owner = None;
    }

    /// Set the notification flag and wake the queue head, if any.
    ///
    /// A notification with no waiters is latched: the next `wait` consumes
    /// it without suspending.
    pub fn notify(&self) {
        let head = {
            let mut state = self.state.lock().unwrap();
            state.notified = true;
            state.waiters.pop_front()
        };
        if let Some(waiter) = head {
            waiter.resume(None);
        }
    }

    /// Wait for a notification. Returns true when the caller was enqueued
    /// and must yield, then re-check its predicate; false when a pending
    /// notification was consumed and ownership is kept.
    pub fn wait(&self, co: &Handle) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.notified {
                state.notified = false;
                state.owner = Some(co.id());
                return false;
            }
            state.owner = None;
            state.waiters.push_back(co.clone());
        }
        co.suspend();
        true
    }
}

impl Default for CoroCondition {
    fn default() -> CoroCondition {
        CoroCondition::new()
    }
}
