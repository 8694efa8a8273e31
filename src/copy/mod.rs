use crate::config::settings::{CopySettings, ImageCopyPolicy, QueueFullPolicy};
use crate::image::ImageReference;
use crate::prometheus::{COPIES_DROPPED, COPIES_SUBMITTED, COPY_FAILURES};
use crate::registry::TargetRegistry;
use crate::secrets::PullSecretsProvider;
use crate::skopeo;
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// One unit of mirroring work: make the target registry carry the contents
/// of the source reference. Idempotent across retries.
#[derive(Debug, Clone)]
pub struct CopyTask {
    pub source: ImageReference,
    pub target: String,
    /// The container's pull policy is `Always`: refresh the mirror even when
    /// the target already exists.
    pub pull_always: bool,
    pub namespace: String,
    pub image_pull_secrets: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("copy tool failed: {0}")]
    Tool(#[from] skopeo::SkopeoError),
    #[error("auth file: {0}")]
    AuthFile(#[from] std::io::Error),
}

/// Seam over the external copy tool.
#[async_trait]
pub trait CopyBackend: Send + Sync {
    async fn copy(
        &self,
        task: &CopyTask,
        src_authfile: Option<&Path>,
        dest_creds: Option<&str>,
    ) -> Result<(), CopyError>;
}

pub struct SkopeoBackend;

#[async_trait]
impl CopyBackend for SkopeoBackend {
    async fn copy(
        &self,
        task: &CopyTask,
        src_authfile: Option<&Path>,
        dest_creds: Option<&str>,
    ) -> Result<(), CopyError> {
        let src_auth = match src_authfile {
            Some(path) => skopeo::SourceAuth::Authfile(path),
            None => skopeo::SourceAuth::None,
        };
        skopeo::copy(&task.source.canonical(), &task.target, src_auth, dest_creds).await?;
        Ok(())
    }
}

/// Executes one copy task end to end. Shared by all workers; tasks share no
/// mutable state of their own.
pub struct CopyRunner {
    registry: Arc<dyn TargetRegistry>,
    secrets: Arc<dyn PullSecretsProvider>,
    backend: Arc<dyn CopyBackend>,
}

impl CopyRunner {
    pub fn new(
        registry: Arc<dyn TargetRegistry>,
        secrets: Arc<dyn PullSecretsProvider>,
        backend: Arc<dyn CopyBackend>,
    ) -> Self {
        Self {
            registry,
            secrets,
            backend,
        }
    }

    /// Never propagates: the admission that scheduled this task has already
    /// been answered.
    pub async fn execute(&self, task: CopyTask) {
        // Mutable tags are refreshed on every admission under PullAlways.
        if !task.pull_always && self.registry.image_exists(&task.target).await {
            debug!(target = task.target, "Target already mirrored, skipping copy");
            return;
        }
        // The subsequent copy surfaces the real problem if the repository is
        // genuinely unusable.
        let repository = task.source.trimmed();
        if let Err(e) = self.registry.create_repository(&repository).await {
            error!(repository, error = %e, "Repository ensure failed, continuing");
        }
        let authfile = match self.materialize_auth(&task).await {
            Ok(authfile) => authfile,
            Err(e) => {
                error!(error = %e, "Unable to materialize source credentials, copying anonymously");
                None
            }
        };
        let dest_creds = self.registry.credentials().await;
        let dest_creds = (!dest_creds.is_empty()).then_some(dest_creds);
        let result = self
            .backend
            .copy(
                &task,
                authfile.as_ref().map(|file| file.path()),
                dest_creds.as_deref(),
            )
            .await;
        match result {
            Ok(()) => info!(source = %task.source, target = task.target, "Mirrored image"),
            Err(e) => {
                COPY_FAILURES.inc();
                error!(source = %task.source, target = task.target, error = %e, "Image copy failed");
            }
        }
        // `authfile` drops here: the temp file is removed on every exit path,
        // panic included.
    }

    async fn materialize_auth(&self, task: &CopyTask) -> Result<Option<NamedTempFile>, CopyError> {
        let Some(config) = self
            .secrets
            .auth_config(&task.namespace, &task.image_pull_secrets)
            .await
        else {
            return Ok(None);
        };
        let mut authfile = tempfile::Builder::new()
            .prefix("src-auth-")
            .suffix(".json")
            .tempfile()?;
        authfile.write_all(config.as_bytes())?;
        authfile.flush()?;
        Ok(Some(authfile))
    }
}

struct QueuedTask {
    task: CopyTask,
    done: Option<oneshot::Sender<()>>,
}

/// Bounded worker pool for copy tasks. Submissions fan in from many
/// concurrent admissions; concurrency is capped by a semaphore, queueing by
/// the channel capacity.
pub struct CopyCoordinator {
    queue: mpsc::Sender<QueuedTask>,
    runner: Arc<CopyRunner>,
    queue_full_policy: QueueFullPolicy,
    timeout: Option<Duration>,
}

impl CopyCoordinator {
    pub fn start(runner: CopyRunner, settings: &CopySettings) -> Self {
        let runner = Arc::new(runner);
        let (queue, mut receiver) = mpsc::channel::<QueuedTask>(settings.queue_size);
        let workers = Arc::new(Semaphore::new(settings.max_workers));
        let dispatch_runner = Arc::clone(&runner);
        tokio::spawn(async move {
            while let Some(queued) = receiver.recv().await {
                let permit = match Arc::clone(&workers).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let runner = Arc::clone(&dispatch_runner);
                tokio::spawn(async move {
                    match queued.done {
                        Some(mut done) => {
                            // A waiting caller that gives up (deadline hit or
                            // admission dropped) closes the channel; that must
                            // abort the copy itself, subprocess included.
                            let target = queued.task.target.clone();
                            let completed = tokio::select! {
                                _ = runner.execute(queued.task) => true,
                                _ = done.closed() => false,
                            };
                            if completed {
                                let _ = done.send(());
                            } else {
                                warn!(target, "Copy wait abandoned, aborting copy");
                            }
                        }
                        None => runner.execute(queued.task).await,
                    }
                    drop(permit);
                });
            }
        });
        Self {
            queue,
            runner,
            queue_full_policy: settings.queue_full_policy,
            timeout: settings.timeout_seconds.map(Duration::from_secs),
        }
    }

    /// Submit a task according to the copy policy. `Delayed` tasks run
    /// detached and survive admission return; `Immediate` and `Force` waits
    /// are bounded by the configured timeout, and expiry aborts the copy
    /// itself, not just the wait.
    pub async fn dispatch(&self, policy: ImageCopyPolicy, task: CopyTask) {
        COPIES_SUBMITTED.inc();
        match policy {
            ImageCopyPolicy::Delayed => {
                self.enqueue(QueuedTask { task, done: None }).await;
            }
            ImageCopyPolicy::Immediate => {
                let (done, completion) = oneshot::channel();
                if self
                    .enqueue(QueuedTask {
                        task,
                        done: Some(done),
                    })
                    .await
                {
                    self.await_completion(completion).await;
                }
            }
            ImageCopyPolicy::Force => match self.timeout {
                Some(limit) => {
                    if tokio::time::timeout(limit, self.runner.execute(task))
                        .await
                        .is_err()
                    {
                        warn!("Copy aborted by admission deadline");
                    }
                }
                None => self.runner.execute(task).await,
            },
        }
    }

    async fn enqueue(&self, queued: QueuedTask) -> bool {
        match self.queue_full_policy {
            QueueFullPolicy::Block => match self.queue.send(queued).await {
                Ok(()) => true,
                Err(_) => {
                    error!("Copy queue is closed, dropping task");
                    false
                }
            },
            QueueFullPolicy::Drop => match self.queue.try_send(queued) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    COPIES_DROPPED.inc();
                    warn!(
                        target = dropped.task.target,
                        "Copy queue saturated, dropping task"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    error!("Copy queue is closed, dropping task");
                    false
                }
            },
        }
    }

    async fn await_completion(&self, completion: oneshot::Receiver<()>) {
        match self.timeout {
            Some(limit) => {
                // Dropping the receiver on expiry signals the worker to abort.
                if tokio::time::timeout(limit, completion).await.is_err() {
                    warn!("Copy did not finish before the admission deadline");
                }
            }
            None => {
                let _ = completion.await;
            }
        }
    }
}
