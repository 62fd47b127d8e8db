//! Bounded worker pool for send and receive tasks.
//!
//! Jobs go into an unbounded queue. Workers are tokio tasks that pull from it:
//!
//! ```text
//! send_packet ──┐
//!               ├─► unbounded mpsc ─► worker 1 (core, lives until shutdown)
//! on_message ───┘                  └► worker 2 (extra, exits after keep-alive)
//! ```
//!
//! A worker is spawned on submit while fewer than `core_workers` exist, or when
//! no worker is idle and fewer than `max_workers` exist. Each job runs as its
//! own tokio task and the worker awaits it, so a panicking job is logged and
//! the worker keeps going.
//!
//! Shutdown drops the queue's sender: queued jobs still run, new submissions
//! fail with [`PacketError::Shutdown`]. [`WorkerPool::on_drained`] runs a
//! closure once the last worker has exited.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;

use crate::error::{PacketError, Result};
use crate::handler::BoxFuture;

/// Default number of workers kept alive while idle.
pub const DEFAULT_CORE_WORKERS: usize = 1;

/// Default ceiling on concurrent workers.
pub const DEFAULT_MAX_WORKERS: usize = 2;

/// Default idle time after which workers above the core count exit.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// A unit of work.
pub type Job = BoxFuture<'static, ()>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Workers that never expire.
    pub core_workers: usize,
    /// Maximum concurrent workers.
    pub max_workers: usize,
    /// Idle time before an extra worker exits.
    pub keep_alive: Duration,
}

impl PoolConfig {
    /// Check the worker bounds.
    pub fn validate(&self) -> Result<()> {
        if self.core_workers == 0 {
            return Err(PacketError::Configuration(
                "core_workers must be at least 1".to_string(),
            ));
        }
        if self.max_workers < self.core_workers {
            return Err(PacketError::Configuration(format!(
                "max_workers ({}) must be >= core_workers ({})",
                self.max_workers, self.core_workers
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: DEFAULT_CORE_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

/// State shared between the pool handle and its workers.
struct Shared {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>,
    config: PoolConfig,
    runtime: Handle,
    /// Workers currently alive.
    live: AtomicUsize,
    /// Workers waiting for a job.
    idle: AtomicUsize,
    /// Jobs submitted but not yet picked up.
    queued: AtomicUsize,
    /// Jobs that panicked.
    panicked: AtomicUsize,
    /// Signalled when `live` drops to zero.
    drained: Notify,
}

/// Bounded pool of async workers over an unbounded queue.
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    shared: Arc<Shared>,
    dispatch: Dispatch,
}

impl WorkerPool {
    /// Create a pool whose workers run on `runtime` and log through `dispatch`.
    ///
    /// No worker is spawned until the first job arrives.
    pub fn new(config: PoolConfig, runtime: Handle, dispatch: Dispatch) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            rx: tokio::sync::Mutex::new(rx),
            config,
            runtime,
            live: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
            drained: Notify::new(),
        });

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            shared,
            dispatch,
        })
    }

    /// Create a pool on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// `Configuration` when called outside a runtime.
    pub fn on_current_runtime(config: PoolConfig, dispatch: Dispatch) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            PacketError::Configuration(format!("worker pool needs a tokio runtime: {}", e))
        })?;
        Self::new(config, runtime, dispatch)
    }

    /// Queue a job. Never blocks.
    ///
    /// # Errors
    ///
    /// `Shutdown` once [`shutdown`](Self::shutdown) has been called.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Box::pin(job.with_subscriber(self.dispatch.clone()));

        {
            let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = guard.as_ref().ok_or(PacketError::Shutdown)?;
            self.shared.queued.fetch_add(1, Ordering::AcqRel);
            if tx.send(job).is_err() {
                self.shared.queued.fetch_sub(1, Ordering::AcqRel);
                return Err(PacketError::Shutdown);
            }
        }

        self.maybe_spawn_worker();
        Ok(())
    }

    /// Stop accepting jobs. Already queued jobs still run. Idempotent.
    ///
    /// Returns true on the first call.
    pub fn shutdown(&self) -> bool {
        let mut guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take().is_some()
    }

    /// True once shut down.
    pub fn is_shutdown(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Workers currently alive.
    #[inline]
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Jobs waiting to be picked up.
    #[inline]
    pub fn queued_jobs(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    /// Jobs that panicked since the pool was created.
    #[inline]
    pub fn panicked_jobs(&self) -> usize {
        self.shared.panicked.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Run `f` on the pool's runtime once every worker has exited.
    ///
    /// Only meaningful after [`shutdown`](Self::shutdown): a running pool keeps
    /// its core workers forever.
    pub fn on_drained<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = self.shared.clone();
        let wait = async move {
            loop {
                let notified = shared.drained.notified();
                if shared.live.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
            f();
        };
        self.shared
            .runtime
            .spawn(wait.with_subscriber(self.dispatch.clone()));
    }

    fn maybe_spawn_worker(&self) {
        let config = &self.shared.config;
        loop {
            let live = self.shared.live.load(Ordering::Acquire);
            let idle = self.shared.idle.load(Ordering::Acquire);

            let wanted = live < config.core_workers || (idle == 0 && live < config.max_workers);
            if !wanted {
                return;
            }

            if self
                .shared
                .live
                .compare_exchange(live, live + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let shared = self.shared.clone();
                tracing::trace!(workers = live + 1, "spawning worker");
                self.shared
                    .runtime
                    .spawn(worker_loop(shared).with_subscriber(self.dispatch.clone()));
                return;
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Next {
    Job(Job),
    Closed,
    Expired,
}

/// Pull and run jobs until the queue closes or this worker expires.
async fn worker_loop(shared: Arc<Shared>) {
    loop {
        shared.idle.fetch_add(1, Ordering::AcqRel);
        let next = next_job(&shared).await;
        shared.idle.fetch_sub(1, Ordering::AcqRel);

        match next {
            Next::Job(job) => {
                shared.queued.fetch_sub(1, Ordering::AcqRel);
                if let Err(e) = shared.runtime.spawn(job).await {
                    if e.is_panic() {
                        shared.panicked.fetch_add(1, Ordering::AcqRel);
                        tracing::error!("worker task panicked");
                    }
                }
            }
            Next::Closed => break,
            Next::Expired => {
                let core = shared.config.core_workers;
                let retired = shared
                    .live
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                        (live > core).then(|| live - 1)
                    })
                    .is_ok();
                if retired {
                    tracing::trace!("idle worker expired");
                    return;
                }
            }
        }
    }

    if shared.live.fetch_sub(1, Ordering::AcqRel) == 1 {
        shared.drained.notify_waiters();
    }
}

async fn next_job(shared: &Shared) -> Next {
    let recv = async {
        let mut rx = shared.rx.lock().await;
        rx.recv().await
    };

    let extra = shared.live.load(Ordering::Acquire) > shared.config.core_workers;
    if extra {
        match tokio::time::timeout(shared.config.keep_alive, recv).await {
            Ok(Some(job)) => Next::Job(job),
            Ok(None) => Next::Closed,
            Err(_) => Next::Expired,
        }
    } else {
        match recv.await {
            Some(job) => Next::Job(job),
            None => Next::Closed,
        }
    }
}
