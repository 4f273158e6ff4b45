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

//! Single-threaded cooperative coroutine scheduler

use std::collections::HashMap;
use std::io;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use linked_hash_map::LinkedHashMap;

use crate::coroutine::{
    Completion, CoroId, Coroutine, Fault, Frame, Handle, Input, Resumable, State, Step, Value,
    Yielded,
};
use crate::notifier::Notifier;

/// Runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// How long the notifier blocks in one poll.
    pub poll_interval: Duration,
    /// Global inactivity threshold for registered descriptors. Must be at
    /// least five poll intervals.
    pub fd_timeout: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            poll_interval: Duration::from_secs(2),
            fd_timeout: Duration::from_secs(10),
        }
    }
}

/// Settable event flag, in the manner of a latch: `wait` blocks until `set`.
struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn new() -> Signal {
        Signal {
            flag: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn set(&self) {
        *self.flag.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn clear(&self) {
        *self.flag.lock().unwrap() = false;
    }

    fn wait(&self) {
        let mut flag = self.flag.lock().unwrap();
        while !*flag {
            flag = self.cond.wait(flag).unwrap();
        }
    }
}

struct SchedState {
    coros: HashMap<CoroId, Coroutine>,
    /// Runnable set, stepped in insertion order.
    running: LinkedHashMap<CoroId, ()>,
    suspended: LinkedHashMap<CoroId, ()>,
    /// Sleep deadlines, ascending; same-deadline entries keep insertion
    /// order.
    timers: Vec<(Instant, CoroId)>,
    next_id: CoroId,
    terminate: bool,
}

struct Shared {
    state: Mutex<SchedState>,
    tick: Condvar,
    /// Set whenever the coroutine population is empty and on worker exit.
    idle: Signal,
    notifier: Notifier,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Coroutine scheduler.
///
/// An explicit runtime handle: clone-able, shared freely between threads.
/// Owns the coroutine population, a dedicated worker thread that steps them,
/// and the readiness [`Notifier`]. Torn down only by [`terminate`].
///
/// [`terminate`]: Scheduler::terminate
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler with default configuration.
    pub fn new() -> io::Result<Scheduler> {
        Scheduler::with_config(Config::default())
    }

    /// Create a scheduler, spawning the worker and notifier threads.
    pub fn with_config(config: Config) -> io::Result<Scheduler> {
        assert!(
            config.fd_timeout >= config.poll_interval * 5,
            "fd_timeout must be at least five poll intervals"
        );

        let notifier = Notifier::new(config.poll_interval, config.fd_timeout)?;
        let sched = Scheduler {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedState {
                    coros: HashMap::new(),
                    running: LinkedHashMap::new(),
                    suspended: LinkedHashMap::new(),
                    timers: Vec::new(),
                    next_id: 1,
                    terminate: false,
                }),
                tick: Condvar::new(),
                idle: Signal::new(),
                notifier,
                worker: Mutex::new(None),
            }),
        };

        let worker = {
            let sched = sched.clone();
            thread::Builder::new()
                .name("scheduler".to_owned())
                .spawn(move || sched.run())?
        };
        *sched.shared.worker.lock().unwrap() = Some(worker);

        Ok(sched)
    }

    #[inline]
    pub(crate) fn notifier(&self) -> &Notifier {
        &self.shared.notifier
    }

    /// Spawn a coroutine from a resumable procedure. It enters the runnable
    /// set immediately and is first stepped with a nil input.
    pub fn spawn<R>(&self, name: &str, body: R) -> Handle
    where
        R: Resumable + 'static,
    {
        let name = Arc::new(name.to_owned());
        let done = Arc::new(Completion::new());

        let mut guard = self.shared.state.lock().unwrap();
        let id = guard.next_id;
        guard.next_id += 1;
        guard.coros.insert(
            id,
            Coroutine {
                name: name.clone(),
                body: Some(Box::new(body)),
                pending: Input::Nil,
                stack: Vec::new(),
                state: State::Scheduled,
                done: done.clone(),
            },
        );
        guard.running.insert(id, ());
        self.shared.idle.clear();
        self.shared.tick.notify_one();
        drop(guard);

        trace!("Coroutine `{}`#{}: spawned", name, id);
        Handle::new(id, name, done, self.clone())
    }

    /// Move a running coroutine to the suspended set, optionally waking it
    /// after `timeout`. Valid only from the coroutine's own step.
    pub(crate) fn suspend(&self, cid: CoroId, timeout: Option<Duration>) {
        if let Some(t) = timeout {
            if t == Duration::from_secs(0) {
                warn!("invalid timeout {:?}", t);
                return;
            }
        }

        let mut guard = self.shared.state.lock().unwrap();
        let st = &mut *guard;
        let coro = match st.coros.get_mut(&cid) {
            Some(coro) => coro,
            None => {
                warn!("suspend: unknown coroutine #{}", cid);
                return;
            }
        };

        if coro.state == State::Running {
            coro.state = State::Suspended;
            st.running.remove(&cid);
            if !st.suspended.contains_key(&cid) {
                st.suspended.insert(cid, ());
            }
            if let Some(t) = timeout {
                let deadline = Instant::now() + t;
                let at = st.timers.partition_point(|&(d, _)| d <= deadline);
                st.timers.insert(at, (deadline, cid));
                self.shared.tick.notify_one();
            }
        } else {
            warn!(
                "Coroutine `{}`#{}: cannot suspend while {:?}",
                coro.name, cid, coro.state
            );
        }
    }

    /// Wake a suspended or stopped coroutine with `value`. Anything else is
    /// a dropped request.
    pub(crate) fn resume(&self, cid: CoroId, value: Option<Value>) {
        let mut guard = self.shared.state.lock().unwrap();
        let st = &mut *guard;
        let coro = match st.coros.get_mut(&cid) {
            Some(coro) => coro,
            None => {
                warn!("resume: unknown coroutine #{}", cid);
                return;
            }
        };

        match coro.state {
            State::Suspended | State::Stopped => {
                coro.pending = match value {
                    Some(v) => Input::Value(v),
                    None => Input::Nil,
                };
                coro.state = State::Scheduled;
                st.suspended.remove(&cid);
                if !st.running.contains_key(&cid) {
                    st.running.insert(cid, ());
                }
                self.shared.tick.notify_one();
            }
            state => {
                warn!(
                    "Coroutine `{}`#{}: cannot resume while {:?}",
                    coro.name, cid, state
                );
            }
        }
    }

    /// Throw `fault` into a coroutine. Valid while it is scheduled or
    /// stopped; anything else is a dropped request.
    pub(crate) fn throw(&self, cid: CoroId, fault: Fault) {
        let mut guard = self.shared.state.lock().unwrap();
        let st = &mut *guard;
        let coro = match st.coros.get_mut(&cid) {
            Some(coro) => coro,
            None => {
                warn!("throw: unknown coroutine #{}", cid);
                return;
            }
        };

        match coro.state {
            State::Scheduled | State::Stopped => {
                coro.pending = Input::Fault(fault);
                coro.state = State::Scheduled;
                st.suspended.remove(&cid);
                if !st.running.contains_key(&cid) {
                    st.running.insert(cid, ());
                }
                self.shared.tick.notify_one();
            }
            state => {
                warn!(
                    "Coroutine `{}`#{}: cannot throw while {:?}",
                    coro.name, cid, state
                );
            }
        }
    }

    /// Block until the coroutine population becomes empty.
    pub fn join(&self) {
        self.shared.idle.wait();
    }

    /// Stop the notifier and the worker, detach every coroutine and unblock
    /// all joiners. Call from outside the scheduler's own coroutines.
    pub fn terminate(&self) {
        self.shared.notifier.terminate();
        {
            let mut guard = self.shared.state.lock().unwrap();
            guard.terminate = true;
            self.shared.tick.notify_one();
        }
        self.shared.idle.wait();
        if let Some(worker) = self.shared.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
        debug!("scheduler terminated");
    }

    /// Worker loop.
    fn run(&self) {
        trace!("scheduler: starts");

        loop {
            let mut guard = self.shared.state.lock().unwrap();

            let wait_for = guard
                .timers
                .first()
                .map(|&(deadline, _)| deadline.saturating_duration_since(Instant::now()));
            while guard.running.is_empty() && !guard.terminate {
                match wait_for {
                    Some(timeout) => {
                        let (g, _) = self.shared.tick.wait_timeout(guard, timeout).unwrap();
                        guard = g;
                        break;
                    }
                    None => guard = self.shared.tick.wait(guard).unwrap(),
                }
            }

            if guard.terminate {
                let st = &mut *guard;
                for (_, coro) in st.coros.iter_mut() {
                    coro.stack.clear();
                }
                for (_, coro) in st.coros.drain() {
                    coro.done.set(Input::Nil);
                }
                st.running.clear();
                st.suspended.clear();
                st.timers.clear();
                break;
            }

            // wake timed suspends
            if !guard.timers.is_empty() {
                let now = Instant::now();
                let st = &mut *guard;
                while let Some(&(deadline, cid)) = st.timers.first() {
                    if deadline > now {
                        break;
                    }
                    st.timers.remove(0);
                    if let Some(coro) = st.coros.get_mut(&cid) {
                        st.suspended.remove(&cid);
                        if !st.running.contains_key(&cid) {
                            st.running.insert(cid, ());
                        }
                        coro.state = State::Scheduled;
                        coro.pending = Input::Nil;
                    }
                }
            }

            let batch: Vec<CoroId> = guard.running.keys().cloned().collect();
            drop(guard);

            for cid in batch {
                self.tick_one(cid);
            }
        }

        self.shared.idle.set();
        trace!("scheduler: exits");
    }

    /// Step a single coroutine and handle the outcome.
    fn tick_one(&self, cid: CoroId) {
        let (mut body, input, handle) = {
            let mut guard = self.shared.state.lock().unwrap();
            let coro = match guard.coros.get_mut(&cid) {
                Some(coro) => coro,
                None => return,
            };
            coro.state = State::Running;
            let body = match coro.body.take() {
                Some(body) => body,
                None => return,
            };
            let input = mem::replace(&mut coro.pending, Input::Nil);
            let handle = Handle::new(cid, coro.name.clone(), coro.done.clone(), self.clone());
            (body, input, handle)
        };

        trace!("{:?}: stepping with {:?}", handle, input);

        // stepped without the lock held; the procedure may call back in
        let step = body.step(&handle, input);

        let mut guard = self.shared.state.lock().unwrap();
        let st = &mut *guard;
        match step {
            Step::Yield(yielded) => self.handle_yield(st, cid, body, yielded),
            Step::Done(value) => self.unwind(st, cid, value),
            Step::Failed(fault) => self.unwind(st, cid, Input::Fault(fault)),
        }
    }

    fn handle_yield(
        &self,
        st: &mut SchedState,
        cid: CoroId,
        body: Box<dyn Resumable>,
        yielded: Yielded,
    ) {
        if !st.coros.contains_key(&cid) {
            return;
        }

        match yielded {
            Yielded::Delegate(sub) => {
                let coro = st.coros.get_mut(&cid).unwrap();
                match coro.state {
                    State::Suspended => coro.state = State::Stopped,
                    State::Running => coro.state = State::Scheduled,
                    _ => {}
                }
                coro.stack.push(Frame::Delegate(body));
                coro.body = Some(sub);
                coro.pending = Input::Nil;
                trace!("Coroutine `{}`#{}: delegating", coro.name, cid);
            }
            Yielded::Child(child) => {
                let child_id = child.id();
                {
                    let coro = st.coros.get_mut(&cid).unwrap();
                    coro.body = Some(body);
                }
                let frozen = match st.coros.get_mut(&child_id) {
                    Some(child) if child_id != cid && child.stack.is_empty() => {
                        child.stack.push(Frame::Caller(cid));
                        true
                    }
                    _ => false,
                };
                let coro = st.coros.get_mut(&cid).unwrap();
                if frozen {
                    coro.state = State::Frozen;
                    st.running.remove(&cid);
                    trace!(
                        "Coroutine `{}`#{}: frozen waiting for #{}",
                        coro.name, cid, child_id
                    );
                } else {
                    warn!(
                        "Coroutine `{}`#{}: yielded coroutine #{} which is not freshly spawned",
                        coro.name, cid, child_id
                    );
                    coro.state = State::Scheduled;
                    coro.pending = Input::Nil;
                }
            }
            plain => {
                let coro = st.coros.get_mut(&cid).unwrap();
                coro.body = Some(body);
                match coro.state {
                    State::Suspended => {
                        // the request is now honoured; the pending slot is
                        // left for the resume that delivers the real value
                        coro.state = State::Stopped;
                    }
                    State::Running => {
                        coro.pending = match plain {
                            Yielded::Value(v) => Input::Value(v),
                            _ => Input::Nil,
                        };
                        coro.state = State::Scheduled;
                    }
                    // resumed or thrown at mid-step; the new pending wins
                    _ => {}
                }
            }
        }
    }

    /// Termination path of a procedure: pop a frame and either return to the
    /// delegating procedure, reactivate a frozen caller, or destroy the
    /// coroutine.
    fn unwind(&self, st: &mut SchedState, cid: CoroId, value: Input) {
        let frame = match st.coros.get_mut(&cid) {
            Some(coro) => coro.stack.pop(),
            None => return,
        };

        match frame {
            Some(Frame::Delegate(saved)) => {
                let coro = st.coros.get_mut(&cid).unwrap();
                coro.body = Some(saved);
                coro.state = State::Scheduled;
                // the sub-procedure's final value arrives at the caller's
                // yield site on the next tick
                coro.pending = value;
            }
            Some(Frame::Caller(parent_id)) => {
                self.delete(st, cid, Input::Nil);
                match st.coros.get_mut(&parent_id) {
                    Some(parent) => {
                        if parent.state != State::Frozen {
                            warn!(
                                "Coroutine `{}`#{}: woken by #{} while {:?}, expected frozen",
                                parent.name, parent_id, cid, parent.state
                            );
                        }
                        parent.state = State::Running;
                        parent.pending = value;
                        if !st.running.contains_key(&parent_id) {
                            st.running.insert(parent_id, ());
                        }
                    }
                    None => {
                        warn!("coroutine #{} finished but caller #{} is gone", cid, parent_id);
                    }
                }
            }
            None => {
                if let Input::Fault(ref fault) = value {
                    if let Some(coro) = st.coros.get(&cid) {
                        warn!("Coroutine `{}`#{}: uncaught {}", coro.name, cid, fault);
                    }
                }
                self.delete(st, cid, value);
            }
        }
    }

    fn delete(&self, st: &mut SchedState, cid: CoroId, value: Input) {
        st.running.remove(&cid);
        st.suspended.remove(&cid);
        if let Some(coro) = st.coros.remove(&cid) {
            debug!("Coroutine `{}`#{}: finished", coro.name, cid);
            debug_assert!(coro.stack.is_empty());
            coro.done.set(value);
        }
        if st.coros.is_empty() {
            self.shared.idle.set();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::coroutine::FaultKind;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn quick() -> Scheduler {
        let _ = env_logger::builder().is_test(true).try_init();
        Scheduler::with_config(Config {
            poll_interval: ms(50),
            fd_timeout: ms(250),
        })
        .unwrap()
    }

    /// Yields `left - 1`, `left - 2`, ... `0`, then finishes with the last
    /// yielded value.
    struct Count {
        left: u32,
    }

    impl Resumable for Count {
        fn step(&mut self, _co: &Handle, input: Input) -> Step {
            if self.left == 0 {
                return Step::Done(input);
            }
            self.left -= 1;
            Step::Yield(Yielded::Value(Box::new(self.left)))
        }
    }

    /// Yields one value, then finishes with it.
    struct YieldOnce {
        value: i32,
    }

    impl Resumable for YieldOnce {
        fn step(&mut self, _co: &Handle, input: Input) -> Step {
            match input {
                Input::Nil => Step::Yield(Yielded::Value(Box::new(self.value))),
                other => Step::Done(other),
            }
        }
    }

    #[test]
    fn spawn_and_join() {
        let sched = quick();
        let co = sched.spawn("count", Count { left: 3 });
        assert_eq!(co.join().downcast::<u32>(), Some(0));
        sched.join();
        sched.terminate();
    }

    #[test]
    fn monotonic_ids() {
        let sched = quick();
        let a = sched.spawn("a", Count { left: 0 });
        let b = sched.spawn("b", Count { left: 0 });
        let c = sched.spawn("c", Count { left: 0 });
        assert!(a.id() < b.id());
        assert!(b.id() < c.id());
        sched.join();
        sched.terminate();
    }

    struct Sleeper {
        delay: Duration,
        order: Arc<Mutex<Vec<CoroId>>>,
        slept: bool,
    }

    impl Resumable for Sleeper {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            if !self.slept {
                self.slept = true;
                co.sleep(self.delay);
                return Step::Yield(Yielded::Nil);
            }
            self.order.lock().unwrap().push(co.id());
            Step::Done(input)
        }
    }

    #[test]
    fn sleep_wake_ordering() {
        let sched = quick();
        let order = Arc::new(Mutex::new(Vec::new()));
        let sleeper = |delay| Sleeper {
            delay,
            order: order.clone(),
            slept: false,
        };

        let a = sched.spawn("sleep-30", sleeper(ms(30)));
        let b = sched.spawn("sleep-10", sleeper(ms(10)));
        let c = sched.spawn("sleep-20", sleeper(ms(20)));
        sched.join();

        assert_eq!(*order.lock().unwrap(), vec![b.id(), c.id(), a.id()]);
        sched.terminate();
    }

    struct Parent {
        sched: Scheduler,
        got: Arc<Mutex<Option<i32>>>,
        spawned: bool,
    }

    impl Resumable for Parent {
        fn step(&mut self, _co: &Handle, input: Input) -> Step {
            if !self.spawned {
                self.spawned = true;
                let child = self.sched.spawn("compute", YieldOnce { value: 42 });
                return Step::Yield(Yielded::Child(child));
            }
            *self.got.lock().unwrap() = input.downcast::<i32>();
            Step::Done(Input::Nil)
        }
    }

    #[test]
    fn child_return_value() {
        let sched = quick();
        let got = Arc::new(Mutex::new(None));
        sched.spawn(
            "parent",
            Parent {
                sched: sched.clone(),
                got: got.clone(),
                spawned: false,
            },
        );
        sched.join();
        assert_eq!(*got.lock().unwrap(), Some(42));
        sched.terminate();
    }

    struct Boom;

    impl Resumable for Boom {
        fn step(&mut self, _co: &Handle, _input: Input) -> Step {
            Step::Failed(Fault::app("boom"))
        }
    }

    struct Catcher {
        sched: Scheduler,
        got: Arc<Mutex<Option<String>>>,
        spawned: bool,
    }

    impl Resumable for Catcher {
        fn step(&mut self, _co: &Handle, input: Input) -> Step {
            if !self.spawned {
                self.spawned = true;
                let child = self.sched.spawn("boom", Boom);
                return Step::Yield(Yielded::Child(child));
            }
            if let Input::Fault(fault) = input {
                *self.got.lock().unwrap() = Some(fault.message);
            }
            Step::Done(Input::Nil)
        }
    }

    #[test]
    fn child_fault_propagates() {
        let sched = quick();
        let got = Arc::new(Mutex::new(None));
        sched.spawn(
            "catcher",
            Catcher {
                sched: sched.clone(),
                got: got.clone(),
                spawned: false,
            },
        );
        sched.join();
        assert_eq!(got.lock().unwrap().as_deref(), Some("boom"));
        sched.terminate();
    }

    struct Delegator {
        got: Arc<Mutex<Option<i32>>>,
        delegated: bool,
    }

    impl Resumable for Delegator {
        fn step(&mut self, _co: &Handle, input: Input) -> Step {
            if !self.delegated {
                self.delegated = true;
                return Step::Yield(Yielded::Delegate(Box::new(YieldOnce { value: 7 })));
            }
            *self.got.lock().unwrap() = input.downcast::<i32>();
            Step::Done(Input::Nil)
        }
    }

    #[test]
    fn delegate_final_value() {
        let sched = quick();
        let got = Arc::new(Mutex::new(None));
        sched.spawn(
            "outer",
            Delegator {
                got: got.clone(),
                delegated: false,
            },
        );
        sched.join();
        assert_eq!(*got.lock().unwrap(), Some(7));
        sched.terminate();
    }

    struct WaitOnce {
        seen: Arc<Mutex<Vec<u32>>>,
        waited: bool,
    }

    impl Resumable for WaitOnce {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            if !self.waited {
                self.waited = true;
                co.suspend();
                return Step::Yield(Yielded::Nil);
            }
            if let Some(v) = input.downcast::<u32>() {
                self.seen.lock().unwrap().push(v);
            }
            Step::Done(Input::Nil)
        }
    }

    #[test]
    fn resume_delivered_once() {
        let sched = quick();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let co = sched.spawn(
            "waiter",
            WaitOnce {
                seen: seen.clone(),
                waited: false,
            },
        );

        thread::sleep(ms(50));
        co.resume(Some(Box::new(1u32)));
        // the second resume is dropped with a warning
        co.resume(Some(Box::new(2u32)));
        sched.join();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        sched.terminate();
    }

    struct FaultSink {
        got: Arc<Mutex<Option<FaultKind>>>,
        waited: bool,
    }

    impl Resumable for FaultSink {
        fn step(&mut self, co: &Handle, input: Input) -> Step {
            if !self.waited {
                self.waited = true;
                co.suspend();
                return Step::Yield(Yielded::Nil);
            }
            if let Input::Fault(fault) = input {
                *self.got.lock().unwrap() = Some(fault.kind);
            }
            Step::Done(Input::Nil)
        }
    }

    #[test]
    fn throw_into_stopped() {
        let sched = quick();
        let got = Arc::new(Mutex::new(None));
        let co = sched.spawn(
            "sink",
            FaultSink {
                got: got.clone(),
                waited: false,
            },
        );

        thread::sleep(ms(50));
        co.throw(Fault::timeout(ms(5)));
        sched.join();

        assert_eq!(*got.lock().unwrap(), Some(FaultKind::Timeout));
        sched.terminate();
    }

    struct Forever;

    impl Resumable for Forever {
        fn step(&mut self, co: &Handle, _input: Input) -> Step {
            co.sleep(Duration::from_secs(3600));
            Step::Yield(Yielded::Nil)
        }
    }

    #[test]
    fn terminate_unblocks_joiners() {
        let sched = quick();
        let co = sched.spawn("forever", Forever);
        thread::sleep(ms(50));
        sched.terminate();
        assert!(co.join().is_nil());
    }
}
