//! Execution protocol for compiled validators
//!
//! Every compiled routine threads an [`Exec`] marker through its
//! continuations. In sync mode each continuation runs on the calling
//! stack; in deferred mode each iteration step is submitted to a
//! [`TaskQueue`] chosen by the host and runs on a later turn. One
//! top-level choice governs the whole run.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Single-threaded cooperative task queue.
///
/// The scheduler capability handed to a deferred validation run. The host
/// decides when turns happen: [`tick`](TaskQueue::tick) runs one task,
/// [`drain`](TaskQueue::drain) runs until the queue is empty. Tasks may
/// submit further tasks while running.
#[derive(Default)]
pub struct TaskQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to run on a later turn.
    pub fn submit(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    /// Run the next pending task. Returns false when the queue was empty.
    pub fn tick(&self) -> bool {
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks submitted while
    /// draining.
    pub fn drain(&self) {
        while self.tick() {}
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Whether no tasks are pending.
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// The sync/deferred marker fixed at the top-level call.
///
/// Propagated unchanged through every recursive continuation: object field
/// iteration, array element iteration, and the custom chain all consult the
/// same marker, so a single top-level choice governs the entire run.
#[derive(Clone, Debug)]
pub enum Exec {
    /// Continuations run on the calling stack.
    Sync,
    /// Continuations are submitted to the host's task queue.
    Deferred(Rc<TaskQueue>),
}

impl Exec {
    /// Whether continuations run on the calling stack.
    pub fn is_sync(&self) -> bool {
        matches!(self, Exec::Sync)
    }

    /// Run the next step now (sync) or on a later queue turn (deferred).
    pub(crate) fn step(&self, task: impl FnOnce() + 'static) {
        match self {
            Exec::Sync => task(),
            Exec::Deferred(queue) => queue.submit(Box::new(task)),
        }
    }
}
