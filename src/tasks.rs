//! Work handed back to the host's main thread.
//!
//! Interceptors run on the host's call thread and must not block it. Slow work
//! is moved elsewhere by the layer above, and its result is queued here to be
//! run right before the next main-loop iteration, where touching host-owned
//! state is safe again.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::Result;
use crate::hooks::{ForeignFn, HookHandle, HookManager, Priority};
use crate::metrics::{MetricsSink, Sample};

type Task = Box<dyn FnOnce() + Send>;

/// A clonable, `Send` way to queue work onto a [`MainThreadQueue`].
#[derive(Clone)]
pub struct QueueHandle {
    sender: Sender<Task>,
}

impl QueueHandle {
    pub fn queue_on_main_thread<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(task)).is_err() {
            tracing::warn!("main thread queue is gone, dropping task");
        }
    }
}

pub struct MainThreadQueue {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
}

impl Default for MainThreadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThreadQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn queue_on_main_thread<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle().queue_on_main_thread(task)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Runs every task queued so far, in queue order, on the calling thread.
    ///
    /// Tasks queued by the tasks being run wait for the next drain. A panicking task
    /// is logged and the rest still run.
    pub fn drain(&self) -> usize {
        let pending: Vec<Task> = self.receiver.try_iter().take(self.receiver.len()).collect();
        let count = pending.len();

        for task in pending {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|message| message.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                tracing::error!(%message, "main thread task panicked");
            }
        }

        count
    }

    /// Hooks `main_loop` so the queue is drained before every iteration.
    ///
    /// The pump is a shared hook at [`Priority::Earliest`]; whenever it ran anything it
    /// pushes a `"Tasks"` sample with the drained count and the time the drain took.
    pub fn install_pump<A: 'static, R: 'static>(
        self: &Arc<Self>,
        hooks: &HookManager,
        main_loop: &ForeignFn<A, R>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<HookHandle> {
        let queue = self.clone();

        hooks.hook_shared(main_loop, "tasks", Priority::Earliest, move |chain, args| {
            let started = Instant::now();
            let drained = queue.drain();
            if drained > 0 {
                metrics.push(
                    Sample::new("Tasks")
                        .elapsed(started.elapsed())
                        .field("count", drained),
                );
            }

            chain.call_original(args)
        })
    }
}
