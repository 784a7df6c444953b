use crate::{
    models::{ApiError, RunReport},
    sync::{Reconciler, SyncError},
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Single-worker queue: runs execute strictly one after another.
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<RunRequest>,
    statuses: Arc<Mutex<RunLog>>,
}

/// Run states keyed by id. Only the most recent `retained` terminal runs
/// are kept; queued and running entries are never evicted.
struct RunLog {
    states: HashMap<Uuid, RunState>,
    finished: VecDeque<Uuid>,
    retained: usize,
}

impl RunLog {
    fn new(retained: usize) -> Self {
        Self {
            states: HashMap::new(),
            finished: VecDeque::new(),
            retained: retained.max(1),
        }
    }

    fn set(&mut self, id: Uuid, state: RunState) {
        self.states.insert(id, state);
    }

    fn finish(&mut self, id: Uuid, state: RunState) {
        self.states.insert(id, state);
        self.finished.push_back(id);
        while self.finished.len() > self.retained {
            if let Some(evicted) = self.finished.pop_front() {
                self.states.remove(&evicted);
                debug!(target = "propfeed.jobs", run = %evicted, "run_evicted");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Api,
    Schedule,
    Startup,
}

#[derive(Debug, Clone)]
struct RunRequest {
    id: Uuid,
    trigger: Trigger,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Completed { report: Box<RunReport> },
    Failed { error: String, stage: Option<String> },
}

#[derive(Clone, Serialize)]
pub struct RunInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: RunState,
}

impl RunQueue {
    pub fn spawn(
        reconciler: Reconciler,
        capacity: usize,
        retained: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RunRequest>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(RunLog::new(retained)));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.set(request.id, RunState::Running);
                }
                info!(
                    target = "propfeed.jobs",
                    run = %request.id,
                    trigger = ?request.trigger,
                    "run_dequeued"
                );

                let result = run_isolated(&reconciler).await;
                let state = match result {
                    Ok(report) => RunState::Completed {
                        report: Box::new(report),
                    },
                    Err(err) => RunState::Failed {
                        error: err.detail().to_string(),
                        stage: Some(err.stage().to_string()),
                    },
                };
                statuses_bg.lock().await.finish(request.id, state);
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue(&self, trigger: Trigger) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.set(id, RunState::Queued);
        }
        let request = RunRequest { id, trigger };
        if self.tx.send(request).await.is_err() {
            self.statuses.lock().await.states.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<RunInfo> {
        let guard = self.statuses.lock().await;
        guard.states.get(&id).cloned().map(|state| RunInfo {
            id: id.to_string(),
            state,
        })
    }
}

/// Runs on its own task so a panic inside a store implementation marks the
/// run failed instead of killing the worker.
async fn run_isolated(reconciler: &Reconciler) -> Result<RunReport, SyncError> {
    let reconciler = reconciler.clone();
    match tokio::spawn(async move { reconciler.run().await }).await {
        Ok(result) => result,
        Err(err) => Err(SyncError::internal("worker", err.to_string())),
    }
}

/// Enqueues a run every `interval`. The first tick fires after one full
/// interval; startup runs are requested separately.
pub fn spawn_scheduler(queue: RunQueue, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match queue.enqueue(Trigger::Schedule).await {
                Ok(id) => info!(target = "propfeed.jobs", run = %id, "scheduled_run_enqueued"),
                Err(err) => {
                    warn!(target = "propfeed.jobs", error = %err.error, "scheduled_run_rejected");
                    break;
                }
            }
        }
    })
}
