// swrend/src/queue.rs
//
//! A single-threaded executor that owns the only thread allowed to touch graphics state.
//!
//! Tasks receive `&mut S`, where `S` is built on the dedicated thread itself, so `S` doesn't have
//! to be `Send`. Tasks run in submission order across all submitters. A blocking submission parks
//! the caller on a oneshot channel that the worker signals exactly once after the task returns;
//! everything the task wrote is visible to the caller once it wakes up.

use crate::error::Error;

use log::{debug, warn};
use std::mem;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;
type Factory<S> = Box<dyn FnOnce() -> S + Send>;

enum Message<S> {
    Run(Task<S>),
    Shutdown,
}

enum QueueState<S> {
    // The worker hasn't been spawned yet.
    Idle(Factory<S>),
    Running(Worker<S>),
    Stopped,
}

struct Worker<S> {
    sender: Sender<Message<S>>,
    thread: JoinHandle<()>,
}

pub struct TaskQueue<S: 'static> {
    name: String,
    state: Mutex<QueueState<S>>,
}

impl<S: 'static> TaskQueue<S> {
    /// Creates a queue. The worker thread is spawned lazily, on the first submission or on
    /// `start()`, and builds its state with `factory`.
    pub fn new<F>(name: &str, factory: F) -> TaskQueue<S>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        TaskQueue {
            name: name.to_owned(),
            state: Mutex::new(QueueState::Idle(Box::new(factory))),
        }
    }

    // Lock the state
    fn lock(&self) -> MutexGuard<QueueState<S>> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Spawns the worker thread if it isn't running yet.
    pub fn start(&self) -> Result<(), Error> {
        let mut state = self.lock();
        Self::ensure_running(&self.name, &mut state).map(|_| ())
    }

    fn ensure_running<'a>(
        name: &str,
        state: &'a mut QueueState<S>,
    ) -> Result<&'a Sender<Message<S>>, Error> {
        if let QueueState::Idle(_) = *state {
            let factory = match mem::replace(state, QueueState::Stopped) {
                QueueState::Idle(factory) => factory,
                _ => unreachable!(),
            };
            let (sender, receiver) = mpsc::channel();
            let thread = thread::Builder::new()
                .name(name.to_owned())
                .spawn(move || worker_loop(factory, receiver))
                .map_err(|_| Error::ThreadSpawnFailed)?;
            debug!("Spawned graphics thread {:?}", name);
            *state = QueueState::Running(Worker { sender, thread });
        }

        match *state {
            QueueState::Running(ref worker) => Ok(&worker.sender),
            QueueState::Stopped => Err(Error::EngineStopped),
            QueueState::Idle(_) => unreachable!(),
        }
    }

    /// Returns true if the worker thread has been spawned and not shut down.
    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), QueueState::Running(_))
    }

    /// Returns the id of the worker thread, if it is running.
    pub fn thread_id(&self) -> Option<ThreadId> {
        match *self.lock() {
            QueueState::Running(ref worker) => Some(worker.thread.thread().id()),
            QueueState::Idle(_) | QueueState::Stopped => None,
        }
    }

    fn is_worker_thread(&self) -> bool {
        self.thread_id() == Some(thread::current().id())
    }

    /// Enqueues `task`. If `blocking` is true, waits until it has run on the worker thread.
    pub fn submit<F>(&self, task: F, blocking: bool) -> Result<(), Error>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if blocking {
            self.run(task)
        } else {
            self.post(task)
        }
    }

    /// Enqueues `task` and returns without waiting for it.
    pub fn post<F>(&self, task: F) -> Result<(), Error>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let mut state = self.lock();
        let sender = Self::ensure_running(&self.name, &mut state)?;
        sender
            .send(Message::Run(Box::new(task)))
            .map_err(|_| Error::WorkerGone)
    }

    /// Enqueues `task`, waits for it to run, and returns its result.
    pub fn run<R, F>(&self, task: F) -> Result<R, Error>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        // Waiting on ourselves would never wake up.
        if self.is_worker_thread() {
            return Err(Error::RecursiveSubmission);
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        self.post(move |state| {
            let _ = sender.send(task(state));
        })?;
        receiver.recv().map_err(|_| Error::WorkerGone)
    }

    /// Lets every queued task run, then stops the worker thread and waits for it to exit.
    ///
    /// Later submissions fail with `Error::EngineStopped`.
    pub fn shutdown(&self) {
        let worker = match mem::replace(&mut *self.lock(), QueueState::Stopped) {
            QueueState::Running(worker) => worker,
            QueueState::Idle(_) | QueueState::Stopped => return,
        };

        let _ = worker.sender.send(Message::Shutdown);
        if worker.thread.thread().id() == thread::current().id() {
            warn!("Graphics thread shut itself down; not joining");
            return;
        }
        if worker.thread.join().is_err() {
            warn!("Graphics thread {:?} panicked", self.name);
        }
        debug!("Joined graphics thread {:?}", self.name);
    }
}

impl<S: 'static> Drop for TaskQueue<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<S>(factory: Factory<S>, receiver: Receiver<Message<S>>) {
    let mut state = factory();
    for message in receiver {
        match message {
            Message::Run(task) => task(&mut state),
            Message::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskQueue;
    use crate::error::Error;

    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_first_submission_spawns_worker() {
        let queue = TaskQueue::new("test-lazy", Vec::<u32>::new);
        assert!(!queue.is_running());
        queue.run(|log| log.push(1)).unwrap();
        assert!(queue.is_running());
        assert_ne!(queue.thread_id(), Some(thread::current().id()));
    }

    #[test]
    fn test_blocking_run_returns_value_from_worker() {
        let queue = TaskQueue::new("test-value", || 40);
        queue.submit(|value| *value += 2, false).unwrap();
        let value = queue.run(|value| *value).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_all_tasks_run_on_one_thread() {
        let queue = Arc::new(TaskQueue::new("test-affinity", || thread::current().id()));
        let owner = queue.run(|owner| *owner).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.run(|owner| (*owner, thread::current().id())).unwrap())
            })
            .collect();
        for handle in handles {
            let (state_owner, runner) = handle.join().unwrap();
            assert_eq!(state_owner, owner);
            assert_eq!(runner, owner);
        }
    }

    #[test]
    fn test_tasks_run_in_submission_order_per_submitter() {
        const SUBMITTERS: usize = 4;
        const TASKS: usize = 50;

        let queue = Arc::new(TaskQueue::new("test-fifo", Vec::<(usize, usize)>::new));
        let barrier = Arc::new(Barrier::new(SUBMITTERS));
        let handles: Vec<_> = (0..SUBMITTERS)
            .map(|submitter| {
                let (queue, barrier) = (queue.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    for index in 0..TASKS {
                        let blocking = index % 2 == 0;
                        queue
                            .submit(move |log| log.push((submitter, index)), blocking)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let log = queue.run(|log| log.clone()).unwrap();
        assert_eq!(log.len(), SUBMITTERS * TASKS);
        for submitter in 0..SUBMITTERS {
            let order: Vec<usize> = log
                .iter()
                .filter(|&&(who, _)| who == submitter)
                .map(|&(_, index)| index)
                .collect();
            assert_eq!(order, (0..TASKS).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_shutdown_drains_queue_then_rejects_work() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let queue = TaskQueue::new("test-shutdown", || ());
        for _ in 0..10 {
            let counter = counter.clone();
            queue
                .post(move |_| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })
                .unwrap();
        }
        queue.shutdown();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 10);
        assert!(!queue.is_running());
        match queue.run(|_| ()) {
            Err(Error::EngineStopped) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_blocking_submission_from_worker_is_rejected() {
        let queue = Arc::new(TaskQueue::new("test-recursive", || 0));
        let inner = queue.clone();
        let nested = queue.run(move |_| inner.run(|value| *value)).unwrap();
        match nested {
            Err(Error::RecursiveSubmission) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        // Fire-and-forget submissions from the worker are still fine.
        let inner = queue.clone();
        queue
            .run(move |_| inner.post(|value| *value = 7))
            .unwrap()
            .unwrap();
        assert_eq!(queue.run(|value| *value).unwrap(), 7);
    }

    #[test]
    fn test_panicking_task_reports_worker_gone() {
        let queue = TaskQueue::new("test-panic", || ());
        match queue.run(|_| -> () { panic!("boom") }) {
            Err(Error::WorkerGone) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
