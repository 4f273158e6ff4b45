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

//! Periodic timer helper

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

struct TimerState {
    interval: Duration,
    active: bool,
    terminate: bool,
    /// Bumped on every control change so a sleeping tick restarts.
    generation: u64,
}

struct Shared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// Calls a function every interval on a dedicated thread. The timer can be
/// stopped, restarted and re-paced until terminated.
pub struct RepeatTimer {
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RepeatTimer {
    pub fn new<F>(interval: Duration, mut f: F) -> RepeatTimer
    where
        F: FnMut() + Send + 'static,
    {
        assert!(interval > Duration::from_secs(0), "invalid timer interval");

        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                interval,
                active: true,
                terminate: false,
                generation: 0,
            }),
            cond: Condvar::new(),
        });

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("repeat-timer".to_owned())
                .spawn(move || loop {
                    let mut state = shared.state.lock().unwrap();
                    while !state.active && !state.terminate {
                        state = shared.cond.wait(state).unwrap();
                    }
                    if state.terminate {
                        break;
                    }
                    let generation = state.generation;
                    let interval = state.interval;
                    let (state, timed_out) = shared.cond.wait_timeout(state, interval).unwrap();
                    let fire = timed_out.timed_out()
                        && state.active
                        && !state.terminate
                        && state.generation == generation;
                    drop(state);
                    if fire {
                        f();
                    }
                })
                .expect("repeat timer thread")
        };

        RepeatTimer {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.active = false;
        state.generation += 1;
        self.shared.cond.notify_all();
    }

    pub fn start(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.active = true;
        state.generation += 1;
        self.shared.cond.notify_all();
    }

    /// Change the pace; non-positive intervals are ignored.
    pub fn set_interval(&self, interval: Duration) {
        if interval == Duration::from_secs(0) {
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        state.interval = interval;
        state.generation += 1;
        self.shared.cond.notify_all();
    }

    pub fn terminate(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.terminate = true;
            self.shared.cond.notify_all();
        }
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn ticks_and_stops() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counted = ticks.clone();
        let timer = RepeatTimer::new(Duration::from_millis(20), move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(150));
        assert!(ticks.load(Ordering::SeqCst) >= 2);

        timer.stop();
        thread::sleep(Duration::from_millis(50));
        let frozen = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), frozen);

        timer.start();
        thread::sleep(Duration::from_millis(100));
        assert!(ticks.load(Ordering::SeqCst) > frozen);

        timer.terminate();
    }
}
