use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::queue::JobQueue;
use crate::scanner::ScanCapability;
use crate::store::FindingStore;
use crate::tracker::JobTracker;
use crate::worker::{spawn_worker_pool, ScanWorker};

/// Process-wide handles, built once at startup and passed to every component.
#[derive(Clone)]
pub struct ServiceContext {
    pub dispatcher: Dispatcher,
    pub tracker: JobTracker,
    pub findings: Arc<dyn FindingStore>,
}

/// A started service: the context plus the background tasks serving it.
pub struct RunningServices {
    pub context: ServiceContext,
    shutdown: CancellationToken,
    pool: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ServiceContext {
    /// Wire tracker, queue, worker pool and retention sweeper together.
    pub fn start(
        settings: &Settings,
        findings: Arc<dyn FindingStore>,
        scanner: Arc<dyn ScanCapability>,
    ) -> RunningServices {
        let tracker = JobTracker::new(settings.job_retention);
        let (queue, receiver) = JobQueue::bounded(settings.queue_capacity);
        let worker = ScanWorker::new(
            tracker.clone(),
            findings.clone(),
            scanner,
            settings.scan_timeout,
        );

        let shutdown = CancellationToken::new();
        let pool = spawn_worker_pool(worker, receiver, settings.workers, shutdown.clone());
        let sweeper = tracker.spawn_sweeper(settings.sweep_interval(), shutdown.clone());

        RunningServices {
            context: ServiceContext {
                dispatcher: Dispatcher::new(tracker.clone(), queue),
                tracker,
                findings,
            },
            shutdown,
            pool,
            sweeper,
        }
    }
}

impl RunningServices {
    /// Stop taking jobs and wait for running ones to finish.
    pub async fn shutdown(self) {
        info!("shutting down scan services");
        self.shutdown.cancel();
        if let Err(e) = self.sweeper.await {
            error!(error = %e, "job sweeper ended abnormally");
        }
        if let Err(e) = self.pool.await {
            error!(error = %e, "scan worker pool ended abnormally");
        }
    }
}
