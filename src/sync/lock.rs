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

//! Lock for coroutines

use std::sync::Mutex;

use crate::coroutine::{CoroId, Handle};

/// Single-owner lock for coroutines.
///
/// Since a coroutine runs until it yields, no waiters queue here. The holder
/// must not suspend between `acquire` and `release`; violating the contract
/// is a fatal assertion.
pub struct CoroLock {
    owner: Mutex<Option<CoroId>>,
}

impl CoroLock {
    pub fn new() -> CoroLock {
        CoroLock {
            owner: Mutex::new(None),
        }
    }

    pub fn acquire(&self, co: &Handle) {
        let mut owner = self.owner.lock().unwrap();
        assert!(
            owner.is_none(),
            "invalid lock acquire: held by #{:?}, wanted by #{}",
            *owner,
            co.id()
        );
        *owner = Some(co.id());
    }

    pub fn release(&self, co: &Handle) {
        let mut owner = self.owner.lock().unwrap();
        assert_eq!(
            *owner,
            Some(co.id()),
            "invalid lock release by #{}",
            co.id()
        );
        *owner = None;
    }
}

impl Default for CoroLock {
    fn default() -> CoroLock {
        CoroLock::new()
    }
}
