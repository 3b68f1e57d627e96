use crate::core::state::{Draft, TrackedFields};

/// True when the tracked projection differs from the last saved one.
pub fn has_real_changes(draft: &Draft, last_saved: Option<&TrackedFields>) -> bool {
    match last_saved {
        Some(previous) => draft.tracked_fields() != *previous,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Character, Dedication, LocalizedText, Page};

    fn base_draft() -> Draft {
        let mut draft = Draft::default();
        draft.id = "d1".to_string();
        draft.meta.title = "El bosque de cristal".to_string();
        draft.meta.theme = "valentía".to_string();
        draft.meta.target_age = "4-6".to_string();
        draft.characters.push(Character {
            id: "c1".to_string(),
            name: "Nico".to_string(),
            description: LocalizedText {
                es: "Un zorro valiente".to_string(),
                en: "A brave fox".to_string(),
            },
            reference_urls: vec![],
            thumbnail_url: None,
        });
        draft
    }

    #[test]
    fn never_saved_always_counts_as_changed() {
        assert!(has_real_changes(&base_draft(), None));
        assert!(has_real_changes(&Draft::default(), None));
    }

    #[test]
    fn identical_state_is_not_a_change() {
        let draft = base_draft();
        let saved = draft.tracked_fields();
        assert!(!has_real_changes(&draft, Some(&saved)));
    }

    #[test]
    fn every_tracked_field_flags_a_change() {
        let draft = base_draft();
        let saved = draft.tracked_fields();

        let mut edited = draft.clone();
        edited.meta.title = "Otro título".to_string();
        assert!(has_real_changes(&edited, Some(&saved)));

        let mut edited = draft.clone();
        edited.meta.theme = "amistad".to_string();
        assert!(has_real_changes(&edited, Some(&saved)));

        let mut edited = draft.clone();
        edited.meta.target_age = "7-9".to_string();
        assert!(has_real_changes(&edited, Some(&saved)));

        let mut edited = draft.clone();
        edited.meta.literary_style = "rima".to_string();
        assert!(has_real_changes(&edited, Some(&saved)));

        let mut edited = draft.clone();
        edited.meta.central_message = "compartir".to_string();
        assert!(has_real_changes(&edited, Some(&saved)));

        let mut edited = draft.clone();
        edited.meta.additional_details = "con nieve".to_string();
        assert!(has_real_changes(&edited, Some(&saved)));

        let mut edited = draft.clone();
        edited.meta.dedication = Some(Dedication {
            text: "Para Mateo".to_string(),
            ..Dedication::default()
        });
        assert!(has_real_changes(&edited, Some(&saved)));

        let mut edited = draft.clone();
        edited.characters[0].name = "Niko".to_string();
        assert!(has_real_changes(&edited, Some(&saved)));

        let mut edited = draft.clone();
        edited.characters[0].thumbnail_url = Some("https://cdn.test/c1.png".to_string());
        assert!(has_real_changes(&edited, Some(&saved)));
    }

    #[test]
    fn untracked_edits_do_not_flag_a_change() {
        let draft = base_draft();
        let saved = draft.tracked_fields();

        let mut edited = draft.clone();
        edited.pages.push(Page {
            id: "p1".to_string(),
            page_number: 1,
            text: "nueva página".to_string(),
            prompt: "forest".to_string(),
            image_url: Some("https://cdn.test/p1.png".to_string()),
        });
        edited.meta.status = "completed".to_string();
        assert!(!has_real_changes(&edited, Some(&saved)));
    }
}
