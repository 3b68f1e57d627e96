use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::core::config::Config;
use crate::core::io::{FsLocalStore, LocalStore};
use crate::core::stage::{StageState, WizardStage};
use crate::core::state::{BackupSnapshot, Draft};
use crate::services::backup::BackupStore;
use crate::services::bulk::{BulkGenerationProgress, BulkGenerator, TaskState};
use crate::services::generator::{create_artifact_generator, ArtifactGenerator, ArtifactRequest};
use crate::services::pause::{CriticalSignalBus, PauseGate};
use crate::services::persistence::{PersistenceScheduler, PersistenceState};
use crate::services::remote::{create_draft_store, DraftStore};

pub struct WizardSession {
    draft: Arc<Mutex<Draft>>,
    flow: Arc<Mutex<StageState>>,
    scheduler: Arc<PersistenceScheduler>,
    bulk: Arc<BulkGenerator>,
    backup: Arc<BackupStore>,
    gate: Arc<PauseGate>,
    generator: Arc<dyn ArtifactGenerator>,
    signals: CriticalSignalBus,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl WizardSession {
    pub fn new(
        config: &Config,
        store: Arc<dyn DraftStore>,
        generator: Arc<dyn ArtifactGenerator>,
        local: Arc<dyn LocalStore>,
        draft: Draft,
        flow: Option<StageState>,
    ) -> Arc<Self> {
        let gate = Arc::new(PauseGate::new(Duration::from_millis(
            config.persistence.pause_cooldown_ms,
        )));
        let signals = CriticalSignalBus::new();
        let listener = gate.spawn_cooldown_listener(signals.subscribe());

        let backup = Arc::new(BackupStore::new(local));
        let scheduler = PersistenceScheduler::new(
            config.persistence.clone(),
            store,
            backup.clone(),
            gate.clone(),
        );
        scheduler.reset_identity(&draft.id);

        let mut flow_state = match flow {
            Some(previous) => StageState::rebuild(&previous),
            None => StageState::new(),
        };
        flow_state.assigned_characters = draft.characters.len() as u32;

        let draft = Arc::new(Mutex::new(draft));
        let flow = Arc::new(Mutex::new(flow_state));
        let bulk = BulkGenerator::new(
            generator.clone(),
            draft.clone(),
            flow.clone(),
            scheduler.clone(),
        );
        {
            let snapshot = draft.lock().unwrap().clone();
            bulk.sync_registry(&snapshot);
        }

        Arc::new(WizardSession {
            draft,
            flow,
            scheduler,
            bulk,
            backup,
            gate,
            generator,
            signals,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn from_config(config: &Config, draft: Draft, flow: Option<StageState>) -> Result<Arc<Self>> {
        let store = create_draft_store(config)?;
        let generator = create_artifact_generator(config)?;
        let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(config.backup.root.clone()));
        Ok(WizardSession::new(config, store, generator, local, draft, flow))
    }

    // --- Snapshots ---

    pub fn draft(&self) -> Draft {
        self.draft.lock().unwrap().clone()
    }

    pub fn flow(&self) -> StageState {
        self.flow.lock().unwrap().clone()
    }

    pub fn signals(&self) -> CriticalSignalBus {
        self.signals.clone()
    }

    pub fn persistence_state(&self) -> PersistenceState {
        self.scheduler.state_snapshot()
    }

    pub fn bulk_progress(&self) -> BulkGenerationProgress {
        self.bulk.progress()
    }

    pub fn task_states(&self) -> HashMap<String, TaskState> {
        self.bulk.task_states()
    }

    pub fn task_errors(&self) -> HashMap<String, String> {
        self.bulk.task_errors()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<BulkGenerationProgress> {
        self.bulk.subscribe_progress()
    }

    // --- Draft lifecycle ---

    pub fn submit(&self, updated: Draft) -> Result<()> {
        {
            let current = self.draft.lock().unwrap();
            if current.id != updated.id {
                bail!(
                    "Draft identity changed from {} to {}, use load instead",
                    current.id,
                    updated.id
                );
            }
        }
        {
            *self.draft.lock().unwrap() = updated.clone();
        }
        {
            let mut flow = self.flow.lock().unwrap();
            flow.assigned_characters = updated.characters.len() as u32;
        }
        self.bulk.sync_registry(&updated);
        let flow = self.flow.lock().unwrap().clone();
        self.scheduler.on_change(&updated, &flow);
        Ok(())
    }

    pub fn load(&self, draft: Draft, flow: Option<StageState>) {
        self.scheduler.reset_identity(&draft.id);
        let mut flow_state = match flow {
            Some(previous) => StageState::rebuild(&previous),
            None => StageState::new(),
        };
        flow_state.assigned_characters = draft.characters.len() as u32;
        {
            *self.flow.lock().unwrap() = flow_state;
        }
        {
            *self.draft.lock().unwrap() = draft.clone();
        }
        self.bulk.reset();
        self.bulk.sync_registry(&draft);
        log::info!("Loaded draft {}", draft.id);
    }

    // --- Stage progression ---

    pub fn can_advance(&self) -> bool {
        let draft = self.draft.lock().unwrap().clone();
        self.flow.lock().unwrap().can_advance(&draft)
    }

    pub fn advance(&self) -> Result<WizardStage> {
        let draft = self.draft.lock().unwrap().clone();
        let next = self.flow.lock().unwrap().advance(&draft)?;
        let flow = self.flow.lock().unwrap().clone();
        self.scheduler.on_change(&draft, &flow);
        Ok(next)
    }

    pub fn retreat(&self) -> Result<WizardStage> {
        self.flow.lock().unwrap().retreat()
    }

    // --- Artwork ---

    pub async fn generate_all(&self) -> Result<BulkGenerationProgress> {
        self.bulk.generate_all().await
    }

    pub async fn retry_failed(&self) -> Result<BulkGenerationProgress> {
        self.bulk.retry_failed().await
    }

    pub async fn generate_character_thumbnail(&self, character_id: &str) -> Result<String> {
        let request = {
            let draft = self.draft.lock().unwrap();
            let character = draft
                .character(character_id)
                .with_context(|| format!("Unknown character {character_id}"))?;
            ArtifactRequest::for_character(character)
        };
        let artifact = self.generator.generate(&request).await?;
        {
            let mut draft = self.draft.lock().unwrap();
            if let Some(character) = draft.characters.iter_mut().find(|c| c.id == character_id) {
                character.thumbnail_url = Some(artifact.url.clone());
            }
        }
        let draft = self.draft.lock().unwrap().clone();
        let flow = self.flow.lock().unwrap().clone();
        self.scheduler.on_change(&draft, &flow);
        Ok(artifact.url)
    }

    // --- Persistence control ---

    pub async fn flush_now(&self) -> Result<()> {
        let draft = self.draft.lock().unwrap().clone();
        let flow = self.flow.lock().unwrap().clone();
        self.scheduler.flush_now(&draft, &flow).await
    }

    pub fn pause_persistence(&self, window: Duration) {
        self.gate.pause(window);
    }

    pub fn resume_persistence(&self) {
        self.gate.resume_now();
    }

    pub async fn recover_backup(&self, draft_id: &str) -> Result<Option<BackupSnapshot>> {
        self.backup.recover(draft_id).await
    }

    pub async fn restore_from_backup(&self, draft_id: &str) -> Result<bool> {
        match self.backup.recover(draft_id).await? {
            Some(snapshot) => {
                self.load(snapshot.draft, Some(snapshot.flow));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // Teardown never touches the remote, only the local emergency tier.
    pub async fn detach(&self) -> Result<()> {
        let draft = self.draft.lock().unwrap().clone();
        let flow = self.flow.lock().unwrap().clone();
        if !draft.id.trim().is_empty() {
            let snapshot = BackupSnapshot::capture(&draft, &flow);
            self.backup.write_emergency(&draft.id, &snapshot).await?;
        }
        if let Some(handle) = self.listener.lock().unwrap().take() {
            handle.abort();
        }
        log::info!("Session for draft {} detached", draft.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Character, DraftPatch, LocalizedText, Page};
    use crate::services::generator::GeneratedArtifact;
    use async_trait::async_trait;
    use tokio::time::sleep;

    #[derive(Debug, Default)]
    struct MockDraftStore {
        update_calls: Mutex<Vec<DraftPatch>>,
    }

    #[async_trait]
    impl DraftStore for MockDraftStore {
        async fn update_record(&self, _draft_id: &str, patch: &DraftPatch) -> Result<()> {
            self.update_calls.lock().unwrap().push(patch.clone());
            Ok(())
        }

        async fn read_status(&self, _draft_id: &str) -> Result<String> {
            Ok("draft".to_string())
        }
    }

    #[derive(Debug, Default)]
    struct MockGenerator {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactGenerator for MockGenerator {
        async fn generate(&self, request: &ArtifactRequest) -> Result<GeneratedArtifact> {
            self.calls.lock().unwrap().push(request.item_id.clone());
            Ok(GeneratedArtifact {
                url: format!("https://cdn.test/{}.png", request.item_id),
            })
        }
    }

    struct Rig {
        session: Arc<WizardSession>,
        store: Arc<MockDraftStore>,
        _dir: tempfile::TempDir,
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.persistence.debounce_draft_ms = 30;
        config.persistence.debounce_review_ms = 30;
        config.persistence.debounce_final_ms = 30;
        config.persistence.retry_base_delay_ms = 10;
        config.persistence.retry_jitter_ms = 0;
        config.persistence.pause_cooldown_ms = 150;
        config
    }

    fn seed_draft() -> Draft {
        let mut draft = Draft::default();
        draft.id = "story-1".to_string();
        draft.meta.title = "La isla de papel".to_string();
        draft.meta.theme = "imaginación".to_string();
        draft.characters.push(Character {
            id: "c1".to_string(),
            name: "Paloma".to_string(),
            description: LocalizedText {
                es: "Una niña que dobla barcos".to_string(),
                en: "A girl who folds boats".to_string(),
            },
            reference_urls: vec![],
            thumbnail_url: Some("https://cdn.test/c1.png".to_string()),
        });
        draft.pages.push(Page {
            id: "p1".to_string(),
            page_number: 1,
            text: "El mar era de cartulina".to_string(),
            prompt: "paper sea".to_string(),
            image_url: None,
        });
        draft
    }

    fn rig_with(draft: Draft) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockDraftStore::default());
        let generator = Arc::new(MockGenerator::default());
        let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(dir.path()));
        let store_dyn: Arc<dyn DraftStore> = store.clone();
        let session = WizardSession::new(
            &fast_config(),
            store_dyn,
            generator,
            local,
            draft,
            None,
        );
        Rig {
            session,
            store,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn submit_schedules_an_autosave() {
        let rig = rig_with(seed_draft());
        let mut draft = rig.session.draft();
        draft.meta.title = "La isla doblada".to_string();
        rig.session.submit(draft).unwrap();

        sleep(Duration::from_millis(150)).await;
        let patches = rig.store.update_calls.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].title.as_deref(), Some("La isla doblada"));
    }

    #[tokio::test]
    async fn submit_rejects_identity_changes() {
        let rig = rig_with(seed_draft());
        let mut foreign = rig.session.draft();
        foreign.id = "story-2".to_string();
        assert!(rig.session.submit(foreign).is_err());
    }

    #[tokio::test]
    async fn advance_walks_the_wizard() {
        let rig = rig_with(seed_draft());
        assert_eq!(rig.session.flow().current, WizardStage::Characters);
        assert_eq!(rig.session.advance().unwrap(), WizardStage::Story);
        assert_eq!(rig.session.advance().unwrap(), WizardStage::Design);
        // Preview needs artwork on every page first.
        rig.session.advance().unwrap();
        assert!(rig.session.advance().is_err());

        rig.session.generate_all().await.unwrap();
        assert_eq!(rig.session.advance().unwrap(), WizardStage::DedicationChoice);
        assert_eq!(rig.session.retreat().unwrap(), WizardStage::Preview);
    }

    #[tokio::test]
    async fn thumbnails_land_on_the_character_and_autosave() {
        let mut draft = seed_draft();
        draft.characters[0].thumbnail_url = None;
        let rig = rig_with(draft);

        let url = rig
            .session
            .generate_character_thumbnail("c1")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.test/c1.png");
        assert_eq!(
            rig.session.draft().characters[0].thumbnail_url.as_deref(),
            Some("https://cdn.test/c1.png")
        );

        sleep(Duration::from_millis(150)).await;
        let patches = rig.store.update_calls.lock().unwrap();
        assert_eq!(patches.len(), 1);
        let characters = patches[0].characters.as_ref().unwrap();
        assert!(characters[0].thumbnail_url.is_some());
    }

    #[tokio::test]
    async fn critical_signals_hold_saves_until_the_cooldown_passes() {
        let rig = rig_with(seed_draft());
        rig.session
            .signals()
            .publish(crate::services::pause::CriticalSignal::OperationStarted);
        sleep(Duration::from_millis(30)).await;

        let mut draft = rig.session.draft();
        draft.meta.title = "Edición durante export".to_string();
        rig.session.submit(draft).unwrap();
        sleep(Duration::from_millis(60)).await;
        assert!(rig.store.update_calls.lock().unwrap().is_empty());
        assert!(rig.session.persistence_state().is_dirty);

        // Cooldown over, an explicit flush pushes the held edit out.
        sleep(Duration::from_millis(150)).await;
        rig.session.flush_now().await.unwrap();
        assert_eq!(rig.store.update_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn detach_leaves_an_emergency_backup_to_restore() {
        let dir = tempfile::tempdir().unwrap();
        let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(dir.path()));
        let store: Arc<dyn DraftStore> = Arc::new(MockDraftStore::default());
        let generator = Arc::new(MockGenerator::default());
        let config = fast_config();

        let session = WizardSession::new(
            &config,
            store.clone(),
            generator.clone(),
            local.clone(),
            seed_draft(),
            None,
        );
        session.detach().await.unwrap();

        // A later session on the same machine finds the emergency snapshot.
        let revived = WizardSession::new(
            &config,
            store,
            generator,
            local,
            Draft::default(),
            None,
        );
        assert!(revived.restore_from_backup("story-1").await.unwrap());
        assert_eq!(revived.draft().meta.title, "La isla de papel");
        assert_eq!(revived.flow().current, WizardStage::Characters);
        assert!(!revived.restore_from_backup("story-404").await.unwrap());
    }
}
