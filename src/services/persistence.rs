use anyhow::{Context, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::config::PersistenceConfig;
use crate::core::stage::{StageState, StageStatus, WizardStage};
use crate::core::state::{BackupSnapshot, Draft, DraftPatch, TrackedFields};
use crate::services::backup::BackupStore;
use crate::services::change::has_real_changes;
use crate::services::pause::PauseGate;
use crate::services::remote::DraftStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Draft,
    Review,
    Final,
    Export,
}

impl SaveMode {
    pub fn detect(draft: &Draft, flow: &StageState, export_active: bool) -> SaveMode {
        if export_active {
            return SaveMode::Export;
        }
        if flow.status(WizardStage::Dedication) == StageStatus::Complete
            || flow.current == WizardStage::Export
        {
            return SaveMode::Final;
        }
        if !draft.pages.is_empty() {
            return SaveMode::Review;
        }
        SaveMode::Draft
    }
}

fn debounce_window(config: &PersistenceConfig, mode: SaveMode) -> Duration {
    let ms = match mode {
        SaveMode::Draft => config.debounce_draft_ms,
        SaveMode::Review => config.debounce_review_ms,
        SaveMode::Final | SaveMode::Export => config.debounce_final_ms,
    };
    Duration::from_millis(ms)
}

pub struct RetryCoordinator {
    max_attempts: u32,
    base_delay: Duration,
    max_jitter_ms: u64,
    backup: Arc<BackupStore>,
}

impl RetryCoordinator {
    pub fn new(config: &PersistenceConfig, backup: Arc<BackupStore>) -> Self {
        RetryCoordinator {
            max_attempts: config.max_save_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_jitter_ms: config.retry_jitter_ms,
            backup,
        }
    }

    pub async fn save<F, Fut>(&self, draft: &Draft, flow: &StageState, mut write: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 1u32;
        loop {
            match write().await {
                Ok(()) => {
                    if let Err(e) = self.backup.clear(&draft.id).await {
                        log::warn!("Failed to clear backup for draft {}: {:#}", draft.id, e);
                    }
                    return Ok(());
                }
                Err(e) => {
                    log::warn!(
                        "Save attempt {}/{} failed for draft {}: {:#}",
                        attempt,
                        self.max_attempts,
                        draft.id,
                        e
                    );
                    let snapshot = BackupSnapshot::capture(draft, flow);
                    if let Err(be) = self.backup.write_backup(&draft.id, &snapshot).await {
                        log::error!("Failed to write backup for draft {}: {:#}", draft.id, be);
                    }
                    if attempt >= self.max_attempts {
                        return Err(e).with_context(|| {
                            format!(
                                "Draft {} not saved after {} attempts",
                                draft.id, self.max_attempts
                            )
                        });
                    }
                    tokio::time::sleep(self.retry_delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay * 2u32.saturating_pow(attempt - 1);
        if self.max_jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::random_range(0..=self.max_jitter_ms))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PersistenceState {
    pub can_save: bool,
    pub is_dirty: bool,
    pub is_blocked: bool,
    pub last_save_unix_ms: Option<u64>,
    pub paused_remaining_ms: Option<u64>,
    pub final_states: Vec<String>,
}

#[derive(Default)]
struct SchedulerState {
    draft_id: String,
    schedule_seq: u64,
    dirty: bool,
    last_saved: Option<TrackedFields>,
    last_save_time: Option<SystemTime>,
}

pub struct PersistenceScheduler {
    config: PersistenceConfig,
    store: Arc<dyn DraftStore>,
    retry: RetryCoordinator,
    gate: Arc<PauseGate>,
    state: Mutex<SchedulerState>,
    // Held across the remote write so saves never interleave.
    in_flight: tokio::sync::Mutex<()>,
}

impl PersistenceScheduler {
    pub fn new(
        config: PersistenceConfig,
        store: Arc<dyn DraftStore>,
        backup: Arc<BackupStore>,
        gate: Arc<PauseGate>,
    ) -> Arc<Self> {
        let retry = RetryCoordinator::new(&config, backup);
        Arc::new(PersistenceScheduler {
            config,
            store,
            retry,
            gate,
            state: Mutex::new(SchedulerState::default()),
            in_flight: tokio::sync::Mutex::new(()),
        })
    }

    pub fn reset_identity(&self, draft_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.draft_id = draft_id.to_string();
        state.schedule_seq += 1;
        state.dirty = false;
        state.last_saved = None;
        state.last_save_time = None;
    }

    pub fn mode_for(&self, draft: &Draft, flow: &StageState) -> SaveMode {
        SaveMode::detect(draft, flow, self.gate.is_blocked())
    }

    pub fn on_change(self: &Arc<Self>, draft: &Draft, flow: &StageState) {
        let mode = self.mode_for(draft, flow);

        let seq = {
            let mut state = self.state.lock().unwrap();
            if state.draft_id != draft.id {
                log::warn!(
                    "Change for draft {} ignored, scheduler tracks {}",
                    draft.id,
                    state.draft_id
                );
                return;
            }
            if !has_real_changes(draft, state.last_saved.as_ref()) {
                // A revert also supersedes whatever save is still pending.
                state.schedule_seq += 1;
                state.dirty = false;
                return;
            }
            state.dirty = true;
            if mode == SaveMode::Export {
                log::debug!("Critical operation underway, draft {} stays dirty", draft.id);
                return;
            }
            state.schedule_seq += 1;
            state.schedule_seq
        };

        let window = debounce_window(&self.config, mode);
        let scheduler = Arc::clone(self);
        let draft = draft.clone();
        let flow = flow.clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if !scheduler.still_current(seq) {
                // A newer edit took over this slot.
                return;
            }
            if let Err(e) = scheduler.save_now(&draft, &flow).await {
                log::error!("Autosave failed for draft {}: {:#}", draft.id, e);
            }
        });
    }

    pub async fn flush_now(&self, draft: &Draft, flow: &StageState) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.schedule_seq += 1;
        }
        self.save_now(draft, flow).await
    }

    async fn save_now(&self, draft: &Draft, flow: &StageState) -> Result<()> {
        let _in_flight = self.in_flight.lock().await;

        if draft.id.trim().is_empty() {
            log::warn!("Draft has no identity, skipping save");
            return Ok(());
        }
        {
            let state = self.state.lock().unwrap();
            if state.draft_id != draft.id {
                log::warn!(
                    "Save for draft {} skipped, scheduler tracks {}",
                    draft.id,
                    state.draft_id
                );
                return Ok(());
            }
            if !has_real_changes(draft, state.last_saved.as_ref()) {
                return Ok(());
            }
        }
        if !self.gate.can_persist_now() {
            log::debug!("Persistence paused, draft {} stays dirty", draft.id);
            return Ok(());
        }

        let patch = self.build_patch(draft, flow).await;
        let store = Arc::clone(&self.store);
        let draft_id = draft.id.clone();
        self.retry
            .save(draft, flow, move || {
                let store = Arc::clone(&store);
                let draft_id = draft_id.clone();
                let patch = patch.clone();
                async move { store.update_record(&draft_id, &patch).await }
            })
            .await?;

        {
            let mut state = self.state.lock().unwrap();
            state.last_saved = Some(draft.tracked_fields());
            state.last_save_time = Some(SystemTime::now());
            state.dirty = false;
        }
        log::debug!("Draft {} saved", draft.id);
        Ok(())
    }

    // A record already final on the remote keeps its status, the patch goes
    // out without one.
    async fn build_patch(&self, draft: &Draft, flow: &StageState) -> DraftPatch {
        let mut patch = DraftPatch::from_draft(draft, flow);
        match self.store.read_status(&draft.id).await {
            Ok(remote_status) => {
                if self.config.final_states.iter().any(|s| *s == remote_status) {
                    log::debug!(
                        "Draft {} is already {} on the remote, leaving status untouched",
                        draft.id,
                        remote_status
                    );
                    patch.status = None;
                }
            }
            Err(e) => {
                log::warn!(
                    "Could not read remote status for draft {}: {:#}, leaving status untouched",
                    draft.id,
                    e
                );
                patch.status = None;
            }
        }
        patch
    }

    pub fn state_snapshot(&self) -> PersistenceState {
        let (dirty, last_save_time) = {
            let state = self.state.lock().unwrap();
            (state.dirty, state.last_save_time)
        };
        let blocked = self.gate.is_blocked();
        PersistenceState {
            can_save: !blocked,
            is_dirty: dirty,
            is_blocked: blocked,
            last_save_unix_ms: last_save_time
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
            paused_remaining_ms: self
                .gate
                .blocked_remaining()
                .map(|d| d.as_millis() as u64),
            final_states: self.config.final_states.clone(),
        }
    }

    fn still_current(&self, seq: u64) -> bool {
        self.state.lock().unwrap().schedule_seq == seq
    }
}
