use crate::{
    models::{AnalyzeResponse, ApiError},
    pipeline::{AnalyzeInput, Pipeline},
    security::AuthContext,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::sleep,
};
use uuid::Uuid;

/// Background worker for batch analysis. Items run one at a time with a
/// pause in between so the model quota is not burned in a burst.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    registry: Arc<Mutex<Registry>>,
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    items: Vec<BatchItem>,
    context: AuthContext,
}

/// Job statuses keyed by id, each pinned to the owner that enqueued it.
/// Completed jobs roll off oldest-first past the retention cap.
struct Registry {
    entries: HashMap<Uuid, JobEntry>,
    finished: VecDeque<Uuid>,
    retain: usize,
}

struct JobEntry {
    owner: String,
    state: JobState,
}

impl Registry {
    fn new(retain: usize) -> Self {
        Self {
            entries: HashMap::new(),
            finished: VecDeque::new(),
            retain: retain.max(1),
        }
    }

    fn set(&mut self, id: Uuid, owner: &str, state: JobState) {
        let completed = matches!(state, JobState::Completed { .. });
        self.entries.insert(id, JobEntry {
            owner: owner.to_string(),
            state,
        });
        if completed {
            self.finished.push_back(id);
            while self.finished.len() > self.retain {
                if let Some(old) = self.finished.pop_front() {
                    self.entries.remove(&old);
                }
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BatchAnalyzeRequest {
    pub items: Vec<BatchItem>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BatchItem {
    pub description: String,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running { completed: usize, total: usize },
    Completed { results: Vec<BatchOutcome> },
}

#[derive(Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Analyzed { item: Box<AnalyzeResponse> },
    Failed { error: String, stage: String },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let registry = Arc::new(Mutex::new(Registry::new(job_history_from_env())));
        let registry_bg = registry.clone();
        let delay = batch_delay_from_env();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let total = job.items.len();
                let owner = job.context.owner_id();
                let is_guest = job.context.is_guest();
                {
                    let mut guard = registry_bg.lock().await;
                    guard.set(job.id, &owner, JobState::Running {
                        completed: 0,
                        total,
                    });
                }

                let mut results = Vec::with_capacity(total);
                for (index, item) in job.items.into_iter().enumerate() {
                    if index > 0 {
                        sleep(delay).await;
                    }
                    let input = AnalyzeInput {
                        description: Some(item.description),
                        image: None,
                    };
                    let outcome = match pipeline.run(input, &owner).await {
                        Ok(outcome) => BatchOutcome::Analyzed {
                            item: Box::new(AnalyzeResponse::from_outcome(outcome, is_guest)),
                        },
                        Err(err) => BatchOutcome::Failed {
                            error: err.detail().to_string(),
                            stage: err.stage().to_string(),
                        },
                    };
                    results.push(outcome);
                    let mut guard = registry_bg.lock().await;
                    guard.set(job.id, &owner, JobState::Running {
                        completed: index + 1,
                        total,
                    });
                }

                let mut guard = registry_bg.lock().await;
                guard.set(job.id, &owner, JobState::Completed { results });
            }
        });

        (Self { tx, registry }, handle)
    }

    pub async fn enqueue_batch(
        &self,
        request: BatchAnalyzeRequest,
        context: AuthContext,
    ) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.registry.lock().await;
            guard.set(id, &context.owner_id(), JobState::Queued);
        }
        let job = Job {
            id,
            items: request.items,
            context,
        };
        self.tx.send(job).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    /// Looks up a job for the identity that enqueued it. Anyone else gets
    /// `None`, same as an unknown id.
    pub async fn get(&self, owner: &str, id: Uuid) -> Option<JobInfo> {
        let guard = self.registry.lock().await;
        let entry = guard.entries.get(&id)?;
        if entry.owner != owner {
            return None;
        }
        Some(JobInfo {
            id: id.to_string(),
            state: entry.state.clone(),
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

fn job_history_from_env() -> usize {
    std::env::var("JOB_HISTORY_MAX")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256)
}

fn batch_delay_from_env() -> Duration {
    let secs = std::env::var("BATCH_ITEM_DELAY_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(2);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GeminiClient, GeminiConfig};
    use crate::security::IdentityKind;
    use crate::store::memory::MemoryStore;

    fn offline_queue() -> (JobQueue, JoinHandle<()>) {
        let config = GeminiConfig {
            api_url: "http://localhost:9".into(),
            api_key: None,
            model: "gemini-2.0-flash-001".into(),
        };
        let pipeline = Pipeline::new(
            Arc::new(GeminiClient::new(config)),
            Arc::new(MemoryStore::new()),
        );
        JobQueue::spawn(pipeline)
    }

    fn guest(subject: &str) -> AuthContext {
        AuthContext {
            subject: subject.into(),
            kind: IdentityKind::Guest,
        }
    }

    #[tokio::test]
    async fn job_status_is_scoped_to_its_creator() {
        let (queue, _worker) = offline_queue();
        let creator = guest("g-1");
        let id = queue
            .enqueue_batch(
                BatchAnalyzeRequest {
                    items: vec![BatchItem {
                        description: "old desk lamp".into(),
                    }],
                },
                creator.clone(),
            )
            .await
            .unwrap();

        assert!(queue.get(&creator.owner_id(), id).await.is_some());
        assert!(queue.get(&guest("g-2").owner_id(), id).await.is_none());
        assert!(queue.get("user:someone-else", id).await.is_none());
    }

    #[tokio::test]
    async fn unknown_job_ids_are_not_found() {
        let (queue, _worker) = offline_queue();
        assert!(queue.get("guest:g-1", Uuid::new_v4()).await.is_none());
    }

    #[test]
    fn finished_jobs_roll_off_oldest_first() {
        let mut registry = Registry::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            registry.set(*id, "user:a", JobState::Completed {
                results: Vec::new(),
            });
        }
        assert!(!registry.entries.contains_key(&ids[0]));
        assert!(registry.entries.contains_key(&ids[1]));
        assert!(registry.entries.contains_key(&ids[2]));
    }

    #[test]
    fn running_jobs_are_never_evicted() {
        let mut registry = Registry::new(1);
        let running = Uuid::new_v4();
        registry.set(running, "user:a", JobState::Running {
            completed: 0,
            total: 3,
        });
        for _ in 0..3 {
            registry.set(Uuid::new_v4(), "user:a", JobState::Completed {
                results: Vec::new(),
            });
        }
        assert!(registry.entries.contains_key(&running));
    }
}
