use anyhow::{bail, Result};
use futures_util::{stream, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::core::stage::StageState;
use crate::core::state::{Draft, Page};
use crate::services::generator::{ArtifactGenerator, ArtifactRequest, GeneratedArtifact};
use crate::services::persistence::PersistenceScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Generating,
    Completed,
    Error,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkGenerationProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: HashSet<String>,
}

impl BulkGenerationProgress {
    pub fn is_settled(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}

#[derive(Default)]
struct BulkState {
    epoch: u64,
    tasks: HashMap<String, TaskState>,
    errors: HashMap<String, String>,
    progress: BulkGenerationProgress,
    generating: bool,
}

pub struct BulkGenerator {
    generator: Arc<dyn ArtifactGenerator>,
    draft: Arc<Mutex<Draft>>,
    flow: Arc<Mutex<StageState>>,
    scheduler: Arc<PersistenceScheduler>,
    state: Mutex<BulkState>,
    progress_sender: broadcast::Sender<BulkGenerationProgress>,
}

impl BulkGenerator {
    pub fn new(
        generator: Arc<dyn ArtifactGenerator>,
        draft: Arc<Mutex<Draft>>,
        flow: Arc<Mutex<StageState>>,
        scheduler: Arc<PersistenceScheduler>,
    ) -> Arc<Self> {
        let (progress_sender, _) = broadcast::channel(64);
        Arc::new(BulkGenerator {
            generator,
            draft,
            flow,
            scheduler,
            state: Mutex::new(BulkState::default()),
            progress_sender,
        })
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<BulkGenerationProgress> {
        self.progress_sender.subscribe()
    }

    pub fn progress(&self) -> BulkGenerationProgress {
        self.state.lock().unwrap().progress.clone()
    }

    pub fn is_generating(&self) -> bool {
        self.state.lock().unwrap().generating
    }

    pub fn task_states(&self) -> HashMap<String, TaskState> {
        self.state.lock().unwrap().tasks.clone()
    }

    pub fn task_errors(&self) -> HashMap<String, String> {
        self.state.lock().unwrap().errors.clone()
    }

    pub fn sync_registry(&self, draft: &Draft) {
        let mut state = self.state.lock().unwrap();
        for page in &draft.pages {
            if page.image_url.is_some() {
                state.tasks.insert(page.id.clone(), TaskState::Completed);
            } else {
                state.tasks.entry(page.id.clone()).or_insert(TaskState::Pending);
            }
        }
        let live: HashSet<&str> = draft.pages.iter().map(|p| p.id.as_str()).collect();
        state.tasks.retain(|id, _| live.contains(id.as_str()));
        state.errors.retain(|id, _| live.contains(id.as_str()));
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        // Stragglers from an in-flight batch die on the epoch bump.
        state.epoch += 1;
        state.tasks.clear();
        state.errors.clear();
        state.progress = BulkGenerationProgress::default();
        state.generating = false;
        let _ = self.progress_sender.send(state.progress.clone());
    }

    pub async fn generate_all(&self) -> Result<BulkGenerationProgress> {
        let jobs: Vec<Page> = {
            let draft = self.draft.lock().unwrap();
            draft
                .pages
                .iter()
                .filter(|p| p.image_url.is_none())
                .cloned()
                .collect()
        };
        self.run_batch(jobs, false).await
    }

    pub async fn retry_failed(&self) -> Result<BulkGenerationProgress> {
        let failed: HashSet<String> = {
            let state = self.state.lock().unwrap();
            state
                .tasks
                .iter()
                .filter(|(_, s)| **s == TaskState::Error)
                .map(|(id, _)| id.clone())
                .collect()
        };
        let jobs: Vec<Page> = {
            let draft = self.draft.lock().unwrap();
            draft
                .pages
                .iter()
                .filter(|p| failed.contains(&p.id) && p.image_url.is_none())
                .cloned()
                .collect()
        };
        self.run_batch(jobs, true).await
    }

    async fn run_batch(&self, jobs: Vec<Page>, retry: bool) -> Result<BulkGenerationProgress> {
        if jobs.is_empty() {
            log::debug!("No pages awaiting artwork");
            return Ok(self.progress());
        }
        let epoch = {
            let mut state = self.state.lock().unwrap();
            if state.generating {
                bail!("Bulk generation is already running");
            }
            state.generating = true;
            if retry {
                state.progress.failed = state.progress.failed.saturating_sub(jobs.len());
            } else {
                state.errors.clear();
                state.progress = BulkGenerationProgress {
                    total: jobs.len(),
                    completed: 0,
                    failed: 0,
                    in_progress: HashSet::new(),
                };
            }
            for page in &jobs {
                state.tasks.insert(page.id.clone(), TaskState::Generating);
                state.errors.remove(&page.id);
                state.progress.in_progress.insert(page.id.clone());
            }
            let _ = self.progress_sender.send(state.progress.clone());
            state.epoch
        };
        log::info!("Generating artwork for {} pages", jobs.len());

        let generator = Arc::clone(&self.generator);
        let concurrency = generator.max_concurrency().max(1);
        stream::iter(jobs)
            .map(|page| {
                let generator = Arc::clone(&generator);
                async move {
                    let request = ArtifactRequest::for_page(&page);
                    let result = generator.generate(&request).await;
                    (page.id, result)
                }
            })
            .buffer_unordered(concurrency)
            .for_each(|(page_id, result)| {
                self.apply_result(epoch, &page_id, result);
                futures_util::future::ready(())
            })
            .await;

        let progress = {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                log::debug!("Batch superseded mid-flight, leaving the fresh registry alone");
                return Ok(state.progress.clone());
            }
            state.generating = false;
            let _ = self.progress_sender.send(state.progress.clone());
            state.progress.clone()
        };
        log::info!(
            "Artwork batch settled: {} completed, {} failed of {}",
            progress.completed,
            progress.failed,
            progress.total
        );

        // Fresh artwork flows back through the normal autosave pipeline.
        let draft = self.draft.lock().unwrap().clone();
        let flow = self.flow.lock().unwrap().clone();
        self.scheduler.on_change(&draft, &flow);

        Ok(progress)
    }

    fn apply_result(&self, epoch: u64, page_id: &str, result: Result<GeneratedArtifact>) {
        if self.state.lock().unwrap().epoch != epoch {
            log::debug!("Discarding page {} result from a superseded batch", page_id);
            return;
        }
        match result {
            Ok(artifact) => {
                {
                    let mut draft = self.draft.lock().unwrap();
                    match draft.pages.iter_mut().find(|p| p.id == page_id) {
                        Some(page) => page.image_url = Some(artifact.url.clone()),
                        None => log::warn!("Page {} vanished during generation", page_id),
                    }
                }
                let mut state = self.state.lock().unwrap();
                state.tasks.insert(page_id.to_string(), TaskState::Completed);
                state.errors.remove(page_id);
                state.progress.completed += 1;
                state.progress.in_progress.remove(page_id);
                let _ = self.progress_sender.send(state.progress.clone());
            }
            Err(e) => {
                log::warn!("Artwork failed for page {}: {:#}", page_id, e);
                let mut state = self.state.lock().unwrap();
                state.tasks.insert(page_id.to_string(), TaskState::Error);
                state.errors.insert(page_id.to_string(), format!("{e:#}"));
                state.progress.failed += 1;
                state.progress.in_progress.remove(page_id);
                let _ = self.progress_sender.send(state.progress.clone());
            }
        }
    }
}
