use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::stage::StageState;

pub const STATUS_DRAFT: &str = "draft";
pub const STATUS_COMPLETED: &str = "completed";

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct LocalizedText {
    #[serde(default)]
    pub es: String,
    #[serde(default)]
    pub en: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub reference_urls: Vec<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub page_number: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub prompt: String,
    pub image_url: Option<String>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dedication {
    #[serde(default)]
    pub text: String,
    pub background_url: Option<String>,
    pub layout: Option<String>,
    pub alignment: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DraftMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub target_age: String,
    #[serde(default)]
    pub literary_style: String,
    #[serde(default)]
    pub central_message: String,
    #[serde(default)]
    pub additional_details: String,
    #[serde(default = "default_status")]
    pub status: String, // "draft" until the remote marks the story final
    #[serde(rename = "dedicatoria")]
    pub dedication: Option<Dedication>,
}

fn default_status() -> String {
    STATUS_DRAFT.to_string()
}

impl Default for DraftMeta {
    fn default() -> Self {
        DraftMeta {
            title: String::new(),
            theme: String::new(),
            target_age: String::new(),
            literary_style: String::new(),
            central_message: String::new(),
            additional_details: String::new(),
            status: default_status(),
            dedication: None,
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Draft {
    pub id: String,
    #[serde(default)]
    pub meta: DraftMeta,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub pages: Vec<Page>,
}

impl Draft {
    pub fn page(&self, page_id: &str) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == page_id)
    }

    pub fn character(&self, character_id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == character_id)
    }

    // Page content stays out of the projection, artwork lands in the record
    // through the generation backend rather than autosave.
    pub fn tracked_fields(&self) -> TrackedFields {
        TrackedFields {
            title: self.meta.title.clone(),
            theme: self.meta.theme.clone(),
            target_age: self.meta.target_age.clone(),
            literary_style: self.meta.literary_style.clone(),
            central_message: self.meta.central_message.clone(),
            additional_details: self.meta.additional_details.clone(),
            dedication: self.meta.dedication.clone(),
            characters: self.characters.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedFields {
    pub title: String,
    pub theme: String,
    pub target_age: String,
    pub literary_style: String,
    pub central_message: String,
    pub additional_details: String,
    pub dedication: Option<Dedication>,
    pub characters: Vec<Character>,
}

#[derive(Serialize, Default, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DraftPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub literary_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub central_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_details: Option<String>,
    // Some(None) goes out as an explicit null and clears the dedication on
    // the remote.
    #[serde(rename = "dedicatoria", skip_serializing_if = "Option::is_none")]
    pub dedication: Option<Option<Dedication>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<Character>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<StageState>,
}

impl DraftPatch {
    pub fn from_draft(draft: &Draft, flow: &StageState) -> Self {
        DraftPatch {
            title: Some(draft.meta.title.clone()),
            theme: Some(draft.meta.theme.clone()),
            target_age: Some(draft.meta.target_age.clone()),
            literary_style: Some(draft.meta.literary_style.clone()),
            central_message: Some(draft.meta.central_message.clone()),
            additional_details: Some(draft.meta.additional_details.clone()),
            dedication: Some(draft.meta.dedication.clone()),
            characters: Some(draft.characters.clone()),
            status: Some(draft.meta.status.clone()),
            flow: Some(flow.clone()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BackupSnapshot {
    pub draft: Draft,
    pub flow: StageState,
    pub saved_at_ms: u64,
}

impl BackupSnapshot {
    pub fn capture(draft: &Draft, flow: &StageState) -> Self {
        BackupSnapshot {
            draft: draft.clone(),
            flow: flow.clone(),
            saved_at_ms: unix_millis(),
        }
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
