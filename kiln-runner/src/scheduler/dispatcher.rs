//! Run dispatcher
//!
//! Queues run requests and executes them with bounded parallelism. Runs of
//! the same builder share its workspace, so they execute one at a time.

use kiln_core::dto::{RunReport, RunRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::service::{ExecutionService, StatusReporter, TriggerSink};

/// A queued run and where its report goes
pub struct Submission {
    pub request: RunRequest,
    pub reply: oneshot::Sender<RunReport>,
}

/// Cheap handle for submitting runs to a dispatcher
#[derive(Clone)]
pub struct DispatchHandle {
    queue: mpsc::UnboundedSender<Submission>,
    in_flight: Arc<watch::Sender<usize>>,
    cancel: Arc<watch::Sender<bool>>,
}

impl DispatchHandle {
    /// Creates a handle and the queue a `Dispatcher` consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Submission>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        let handle = Self {
            queue,
            in_flight: Arc::new(watch::channel(0).0),
            cancel: Arc::new(watch::channel(false).0),
        };
        (handle, receiver)
    }

    /// Number of submitted runs that have not finished
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Resolves once every submitted run, including runs they trigger, is done
    pub async fn wait_idle(&self) {
        let mut in_flight = self.in_flight.subscribe();
        let _ = in_flight.wait_for(|count| *count == 0).await;
    }

    /// Cancels every running and queued run
    pub fn cancel_all(&self) {
        self.cancel.send_replace(true);
    }

    fn finished(&self) {
        self.in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl TriggerSink for DispatchHandle {
    fn submit(&self, request: RunRequest) -> oneshot::Receiver<RunReport> {
        let (reply, receiver) = oneshot::channel();
        let run_id = request.id;

        self.in_flight.send_modify(|count| *count += 1);
        if self.queue.send(Submission { request, reply }).is_err() {
            error!("Dispatcher is gone, dropping run {}", run_id);
            self.finished();
        }

        receiver
    }
}

/// Executes queued runs
pub struct Dispatcher {
    executor: Arc<dyn ExecutionService>,
    reporter: Option<Arc<dyn StatusReporter>>,
    semaphore: Arc<Semaphore>,
    builders: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    handle: DispatchHandle,
    queue: mpsc::UnboundedReceiver<Submission>,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn ExecutionService>,
        reporter: Option<Arc<dyn StatusReporter>>,
        max_parallel_runs: usize,
        handle: DispatchHandle,
        queue: mpsc::UnboundedReceiver<Submission>,
    ) -> Self {
        Self {
            executor,
            reporter,
            semaphore: Arc::new(Semaphore::new(max_parallel_runs.max(1))),
            builders: Arc::new(Mutex::new(HashMap::new())),
            handle,
            queue,
        }
    }

    /// Consumes the queue until every handle is dropped
    pub async fn run(mut self) {
        info!(
            "Dispatcher started ({} parallel run(s))",
            self.semaphore.available_permits()
        );

        while let Some(submission) = self.queue.recv().await {
            debug!(
                "Queued {} run {} for {}",
                submission.request.pipeline, submission.request.id, submission.request.builder
            );
            self.spawn_run(submission);
        }

        info!("Dispatcher queue closed");
    }

    fn builder_lock(&self, builder: &str) -> Arc<AsyncMutex<()>> {
        // the map only ever gains entries, so a poisoned guard is still consistent
        let mut builders = self.builders.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(builders.entry(builder.to_string()).or_default())
    }

    fn spawn_run(&self, submission: Submission) {
        let executor = Arc::clone(&self.executor);
        let reporter = self.reporter.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let builder_lock = self.builder_lock(&submission.request.builder);
        let handle = self.handle.clone();

        tokio::spawn(async move {
            let Submission { request, reply } = submission;
            let run_id = request.id;

            let _workspace = builder_lock.lock_owned().await;
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Cannot schedule run {}: {}", run_id, e);
                    handle.finished();
                    return;
                }
            };

            let report = executor.execute(request, handle.cancel.subscribe()).await;

            if let Some(reporter) = reporter {
                if let Err(e) = reporter.report(&report).await {
                    warn!("Failed to report run {}: {:#}", run_id, e);
                }
            }

            if reply.send(report).is_err() {
                debug!("Nobody is waiting for run {}", run_id);
            }
            handle.finished();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use kiln_core::domain::pipeline::{PipelineKind, RunState};
    use kiln_core::domain::step::StepResult;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks how many runs overlap, per builder and overall
    #[derive(Default)]
    struct SlowExecutor {
        running: AtomicUsize,
        peak: AtomicUsize,
        per_builder: Mutex<HashMap<String, usize>>,
        builder_peak: AtomicUsize,
        children: Mutex<Option<DispatchHandle>>,
    }

    #[async_trait]
    impl ExecutionService for SlowExecutor {
        async fn execute(&self, request: RunRequest, cancel: watch::Receiver<bool>) -> RunReport {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            {
                let mut per_builder = self.per_builder.lock().unwrap();
                let count = per_builder.entry(request.builder.clone()).or_default();
                *count += 1;
                self.builder_peak.fetch_max(*count, Ordering::SeqCst);
            }

            if request.pipeline == PipelineKind::Tarball {
                let handle = self.children.lock().unwrap().clone();
                if let Some(handle) = handle {
                    let child = RunRequest::new(PipelineKind::Package, "child", BTreeMap::new())
                        .with_parent(request.id);
                    drop(handle.submit(child));
                }
            }

            tokio::time::sleep(Duration::from_millis(20)).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            *self
                .per_builder
                .lock()
                .unwrap()
                .get_mut(&request.builder)
                .unwrap() -= 1;

            let result = if *cancel.borrow() {
                StepResult::Cancelled
            } else {
                StepResult::Success
            };
            RunReport {
                run_id: request.id,
                parent: request.parent,
                builder: request.builder,
                pipeline: request.pipeline,
                result,
                state: RunState::Completed,
                steps: Vec::new(),
                properties: request.properties,
                logs: Vec::new(),
                started_at: Utc::now(),
                completed_at: Utc::now(),
            }
        }
    }

    #[derive(Default)]
    struct CountingReporter {
        reported: AtomicUsize,
    }

    #[async_trait]
    impl StatusReporter for CountingReporter {
        async fn report(&self, _report: &RunReport) -> anyhow::Result<()> {
            self.reported.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn start(
        executor: Arc<SlowExecutor>,
        reporter: Option<Arc<dyn StatusReporter>>,
        parallel: usize,
    ) -> DispatchHandle {
        let (handle, queue) = DispatchHandle::channel();
        let dispatcher = Dispatcher::new(executor, reporter, parallel, handle.clone(), queue);
        tokio::spawn(dispatcher.run());
        handle
    }

    fn package(builder: &str) -> RunRequest {
        RunRequest::new(PipelineKind::Package, builder, BTreeMap::new())
    }

    #[tokio::test]
    async fn test_submit_returns_report() {
        let executor = Arc::new(SlowExecutor::default());
        let reporter = Arc::new(CountingReporter::default());
        let handle = start(executor, Some(reporter.clone() as Arc<dyn StatusReporter>), 2);

        let request = package("el7-x86_64");
        let id = request.id;
        let report = handle.submit(request).await.unwrap();

        assert_eq!(report.run_id, id);
        assert_eq!(report.result, StepResult::Success);
        handle.wait_idle().await;
        assert_eq!(reporter.reported.load(Ordering::SeqCst), 1);
        assert_eq!(handle.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_same_builder_runs_are_serialized() {
        let executor = Arc::new(SlowExecutor::default());
        let handle = start(executor.clone(), None, 4);

        let receivers: Vec<_> = (0..3).map(|_| handle.submit(package("el7-x86_64"))).collect();
        for receiver in receivers {
            receiver.await.unwrap();
        }

        assert_eq!(executor.builder_peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let executor = Arc::new(SlowExecutor::default());
        let handle = start(executor.clone(), None, 2);

        for builder in ["a", "b", "c", "d", "e"] {
            drop(handle.submit(package(builder)));
        }
        handle.wait_idle().await;

        assert_eq!(executor.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wait_idle_covers_triggered_runs() {
        let executor = Arc::new(SlowExecutor::default());
        let handle = start(executor.clone(), None, 2);
        *executor.children.lock().unwrap() = Some(handle.clone());

        let parent = RunRequest::new(PipelineKind::Tarball, "lustre-tarball", BTreeMap::new());
        drop(handle.submit(parent));
        handle.wait_idle().await;

        let per_builder = executor.per_builder.lock().unwrap();
        assert_eq!(per_builder.get("child"), Some(&0));
        assert_eq!(handle.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_reaches_running_runs() {
        let executor = Arc::new(SlowExecutor::default());
        let handle = start(executor, None, 1);

        let receiver = handle.submit(package("el7-x86_64"));
        handle.cancel_all();

        assert_eq!(receiver.await.unwrap().result, StepResult::Cancelled);
    }

    #[tokio::test]
    async fn test_builder_locks_survive_poisoning() {
        let (handle, queue) = DispatchHandle::channel();
        let dispatcher = Dispatcher::new(
            Arc::new(SlowExecutor::default()),
            None,
            1,
            handle,
            queue,
        );
        let first = dispatcher.builder_lock("el7-x86_64");

        let builders = Arc::clone(&dispatcher.builders);
        let poisoned = std::thread::spawn(move || {
            let _guard = builders.lock().unwrap();
            panic!("poison the builder map");
        })
        .join();
        assert!(poisoned.is_err());
        assert!(dispatcher.builders.is_poisoned());

        let again = dispatcher.builder_lock("el7-x86_64");
        assert!(Arc::ptr_eq(&first, &again));
        dispatcher.builder_lock("el8-x86_64");
    }
}
