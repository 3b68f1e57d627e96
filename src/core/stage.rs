use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core::state::Draft;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WizardStage {
    #[serde(rename = "characters")]
    Characters,
    #[serde(rename = "story")]
    Story,
    #[serde(rename = "design")]
    Design,
    #[serde(rename = "preview")]
    Preview,
    #[serde(rename = "dedicatoria-choice")]
    DedicationChoice,
    #[serde(rename = "dedicatoria")]
    Dedication,
    #[serde(rename = "export")]
    Export,
}

impl WizardStage {
    pub const ALL: [WizardStage; 7] = [
        WizardStage::Characters,
        WizardStage::Story,
        WizardStage::Design,
        WizardStage::Preview,
        WizardStage::DedicationChoice,
        WizardStage::Dedication,
        WizardStage::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WizardStage::Characters => "characters",
            WizardStage::Story => "story",
            WizardStage::Design => "design",
            WizardStage::Preview => "preview",
            WizardStage::DedicationChoice => "dedicatoria-choice",
            WizardStage::Dedication => "dedicatoria",
            WizardStage::Export => "export",
        }
    }

    fn position(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    pub fn next(&self) -> Option<WizardStage> {
        Self::ALL.get(self.position() + 1).copied()
    }

    pub fn previous(&self) -> Option<WizardStage> {
        self.position().checked_sub(1).and_then(|i| Self::ALL.get(i)).copied()
    }
}

impl fmt::Display for WizardStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for WizardStage {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self> {
        WizardStage::ALL
            .iter()
            .find(|s| s.as_str() == value)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown wizard stage: {}", value))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StageStatus {
    #[default]
    #[serde(rename = "no_iniciada")]
    NotStarted,
    #[serde(rename = "borrador")]
    InProgress,
    #[serde(rename = "completado")]
    Complete,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StageState {
    pub current: WizardStage,
    #[serde(default)]
    statuses: HashMap<WizardStage, StageStatus>,
    #[serde(default)]
    pub assigned_characters: u32,
}

impl StageState {
    pub fn new() -> Self {
        let mut statuses = HashMap::new();
        statuses.insert(WizardStage::Characters, StageStatus::InProgress);
        StageState {
            current: WizardStage::Characters,
            statuses,
            assigned_characters: 0,
        }
    }

    pub fn rebuild(previous: &StageState) -> Self {
        let mut statuses = previous.statuses.clone();
        // The stored current stage is not trusted, scan for the first
        // incomplete one instead.
        let current = WizardStage::ALL
            .iter()
            .copied()
            .find(|s| statuses.get(s).copied().unwrap_or_default() != StageStatus::Complete)
            .unwrap_or(WizardStage::Export);
        if statuses.get(&current).copied().unwrap_or_default() == StageStatus::NotStarted {
            statuses.insert(current, StageStatus::InProgress);
        }
        StageState {
            current,
            statuses,
            assigned_characters: previous.assigned_characters,
        }
    }

    pub fn status(&self, stage: WizardStage) -> StageStatus {
        self.statuses.get(&stage).copied().unwrap_or_default()
    }

    pub fn can_advance(&self, draft: &Draft) -> bool {
        self.current.next().is_some() && stage_complete(self.current, draft)
    }

    pub fn advance(&mut self, draft: &Draft) -> Result<WizardStage> {
        let Some(next) = self.current.next() else {
            bail!("Already at the {} stage", self.current);
        };
        if !stage_complete(self.current, draft) {
            bail!("Stage {} is not complete yet", self.current);
        }
        self.statuses.insert(self.current, StageStatus::Complete);
        if self.status(next) == StageStatus::NotStarted {
            self.statuses.insert(next, StageStatus::InProgress);
        }
        self.current = next;
        Ok(next)
    }

    pub fn retreat(&mut self) -> Result<WizardStage> {
        let Some(previous) = self.current.previous() else {
            bail!("Already at the {} stage", self.current);
        };
        self.current = previous;
        Ok(previous)
    }
}

impl Default for StageState {
    fn default() -> Self {
        StageState::new()
    }
}

fn stage_complete(stage: WizardStage, draft: &Draft) -> bool {
    match stage {
        WizardStage::Characters => {
            !draft.characters.is_empty()
                && draft.characters.iter().all(|c| {
                    !c.name.trim().is_empty()
                        && !c.description.es.trim().is_empty()
                        && c.thumbnail_url.is_some()
                })
        }
        WizardStage::Story => {
            !draft.meta.title.trim().is_empty()
                && !draft.meta.theme.trim().is_empty()
                && !draft.pages.is_empty()
                && draft.pages.iter().all(|p| !p.text.trim().is_empty())
        }
        WizardStage::Design => draft.pages.iter().all(|p| !p.prompt.trim().is_empty()),
        WizardStage::Preview => {
            !draft.pages.is_empty() && draft.pages.iter().all(|p| p.image_url.is_some())
        }
        WizardStage::DedicationChoice => true,
        WizardStage::Dedication => match &draft.meta.dedication {
            Some(dedication) => !dedication.text.trim().is_empty(),
            None => true,
        },
        WizardStage::Export => false,
    }
}
