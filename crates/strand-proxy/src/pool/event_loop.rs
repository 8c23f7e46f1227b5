use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use super::{AffinityMap, PoolRole};
use crate::connection::ConnectionId;
use crate::error::{ConfigError, PoolError};

/// Unit of work executed on an event loop.
pub type Task = BoxFuture<'static, ()>;

/// One worker thread driving a single-threaded Tokio runtime.
///
/// Every task submitted here runs on this thread only, in submission order.
/// A task that blocks the thread stalls this loop and nothing else.
pub struct EventLoop {
    index: usize,
    name: String,
    task_tx: mpsc::UnboundedSender<Task>,
    pending: Arc<AtomicUsize>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    fn spawn(
        role: PoolRole,
        group: &str,
        index: usize,
        shutdown_rx: watch::Receiver<bool>,
        drain_timeout: Duration,
    ) -> Result<Self, PoolError> {
        let name = role.thread_name(group, index);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| PoolError::Runtime {
                role,
                index,
                source,
            })?;
        let (task_tx, task_rx) = mpsc::unbounded_channel();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!("Event loop started");
                runtime.block_on(run_loop(task_rx, shutdown_rx, drain_timeout));
                debug!("Event loop stopped");
            })
            .map_err(|source| PoolError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            index,
            name,
            task_tx,
            pending: Arc::new(AtomicUsize::new(0)),
            thread_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Thread name, `<group>-<role>-<index>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task without waiting for it to run.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = PendingGuard::new(Arc::clone(&self.pending));
        let task: Task = Box::pin(async move {
            let _guard = guard;
            task.await;
        });
        self.task_tx
            .send(task)
            .map_err(|_| PoolError::Stopped(self.name.clone()))
    }

    /// Tasks submitted and not yet finished.
    pub fn pending_tasks(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn join(&self) {
        let Some(handle) = self.thread_handle.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Stopping from inside this loop: it exits once the current task returns
            return;
        }
        debug!("Waiting for {} to finish", self.name);
        if handle.join().is_err() {
            warn!("Event loop {} panicked", self.name);
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn run_loop(
    mut task_rx: mpsc::UnboundedReceiver<Task>,
    mut shutdown_rx: watch::Receiver<bool>,
    drain_timeout: Duration,
) {
    let mut tasks = JoinSet::new();

    if !*shutdown_rx.borrow_and_update() {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                task = task_rx.recv() => match task {
                    Some(task) => {
                        tasks.spawn(task);
                    }
                    None => break,
                },
                Some(result) = tasks.join_next(), if !tasks.is_empty() => log_task_result(result),
            }
        }
    }

    // No new work from here on; queued tasks that never started are dropped
    task_rx.close();

    let drained = tokio::time::timeout(drain_timeout, async {
        while let Some(result) = tasks.join_next().await {
            log_task_result(result);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = tasks.len(),
            "Drain timeout elapsed, aborting remaining tasks"
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

fn log_task_result(result: Result<(), JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            warn!("Task panicked on event loop: {}", err);
        }
    }
}

/// A fixed-size group of event loops serving one [`PoolRole`].
pub struct EventLoopGroup {
    role: PoolRole,
    loops: Vec<EventLoop>,
    next: AtomicUsize,
    affinity: AffinityMap,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl EventLoopGroup {
    /// Start `threads` event loops. Either every loop starts or none is left running.
    pub fn new(
        role: PoolRole,
        group: &str,
        threads: usize,
        drain_timeout: Duration,
    ) -> Result<Self, PoolError> {
        if threads == 0 {
            return Err(ConfigError::InvalidThreadCount {
                option: role.config_option(),
                value: threads,
            }
            .into());
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut loops = Vec::with_capacity(threads);
        for index in 0..threads {
            match EventLoop::spawn(role, group, index, shutdown_rx.clone(), drain_timeout) {
                Ok(event_loop) => loops.push(event_loop),
                Err(err) => {
                    let _ = shutdown_tx.send(true);
                    for event_loop in &loops {
                        event_loop.join();
                    }
                    return Err(err);
                }
            }
        }

        info!(role = %role, threads, "Event loop group started");

        Ok(Self {
            role,
            loops,
            next: AtomicUsize::new(0),
            affinity: AffinityMap::new(),
            shutdown_tx,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn role(&self) -> PoolRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EventLoop> {
        self.loops.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventLoop> {
        self.loops.iter()
    }

    pub fn thread_names(&self) -> Vec<String> {
        self.loops.iter().map(|l| l.name.clone()).collect()
    }

    /// Round-robin selection.
    pub fn next(&self) -> &EventLoop {
        &self.loops[self.next_index()]
    }

    fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len()
    }

    /// The loop pinned to a connection; the first call pins one round-robin.
    pub fn pinned(&self, id: ConnectionId) -> &EventLoop {
        let index = self.affinity.get_or_assign(id, || self.next_index());
        &self.loops[index]
    }

    /// Index of the loop pinned to a connection, if any.
    pub fn pinned_index(&self, id: ConnectionId) -> Option<usize> {
        self.affinity.get(id)
    }

    /// Forget a closed connection's pinning.
    pub fn release(&self, id: ConnectionId) {
        self.affinity.release(id);
    }

    pub fn pinned_connections(&self) -> usize {
        self.affinity.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting work, let in-flight tasks drain, and join the threads. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(role = %self.role, threads = self.loops.len(), "Shutting down event loop group");
        let _ = self.shutdown_tx.send(true);
        for event_loop in &self.loops {
            event_loop.join();
        }
        info!(role = %self.role, "Event loop group shutdown complete");
    }
}

impl Drop for EventLoopGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("role", &self.role)
            .field("threads", &self.loops.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
