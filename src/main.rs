use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Select, Text};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

use storyforge::core::config::Config;
use storyforge::core::state::{Character, Dedication, Draft, LocalizedText, Page};
use storyforge::services::bulk::TaskState;
use storyforge::services::session::WizardSession;

const MENU: [&str; 10] = [
    "Show session status",
    "Edit story details",
    "Write the dedication",
    "Generate character thumbnails",
    "Generate page artwork",
    "Retry failed pages",
    "Advance to the next stage",
    "Go back a stage",
    "Save now",
    "Quit",
];

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load or create config
    let config = Config::load_or_create(Path::new("config.yml"))?;

    // 2. Open a session on the demo draft, preferring local unsaved work
    let draft = sample_draft();
    let draft_id = draft.id.clone();
    let session = WizardSession::from_config(&config, draft, None)?;
    if session.restore_from_backup(&draft_id).await? {
        println!("Recovered unsaved work from a local backup.");
    }

    // 3. Menu loop
    loop {
        let header = format!("Stage {} | What next?", session.flow().current);
        let action = Select::new(&header, MENU.to_vec()).prompt()?;
        match action {
            "Show session status" => show_status(&session),
            "Edit story details" => edit_story(&session)?,
            "Write the dedication" => edit_dedication(&session)?,
            "Generate character thumbnails" => generate_thumbnails(&session).await,
            "Generate page artwork" => run_generation(&session, false).await?,
            "Retry failed pages" => run_generation(&session, true).await?,
            "Advance to the next stage" => match session.advance() {
                Ok(stage) => println!("Now at the {} stage.", stage),
                Err(e) => println!("{e}"),
            },
            "Go back a stage" => match session.retreat() {
                Ok(stage) => println!("Back at the {} stage.", stage),
                Err(e) => println!("{e}"),
            },
            "Save now" => match session.flush_now().await {
                Ok(()) => println!("Saved."),
                Err(e) => eprintln!("Save failed: {e:#}"),
            },
            "Quit" => break,
            _ => {}
        }
    }

    // 4. Teardown keeps unsaved work in a local backup
    session.detach().await?;
    println!("Session closed. Unsaved work stays in the local backup.");
    Ok(())
}

fn show_status(session: &Arc<WizardSession>) {
    let draft = session.draft();
    let state = session.persistence_state();
    println!("Draft {} \"{}\"", draft.id, draft.meta.title);
    println!("Stage: {}", session.flow().current);
    println!(
        "Persistence: dirty={} can_save={} blocked={}",
        state.is_dirty, state.can_save, state.is_blocked
    );
    if let Some(remaining) = state.paused_remaining_ms {
        println!("Autosave paused for another {remaining} ms");
    }

    let tasks = session.task_states();
    let done = tasks
        .values()
        .filter(|s| matches!(s, TaskState::Completed))
        .count();
    let failed = tasks
        .values()
        .filter(|s| matches!(s, TaskState::Error))
        .count();
    println!("Artwork: {done}/{} pages done, {failed} failed", tasks.len());
}

fn edit_story(session: &Arc<WizardSession>) -> Result<()> {
    let mut draft = session.draft();
    draft.meta.title = Text::new("Title:")
        .with_initial_value(&draft.meta.title)
        .prompt()?;
    draft.meta.theme = Text::new("Theme:")
        .with_initial_value(&draft.meta.theme)
        .prompt()?;
    session.submit(draft)?;
    println!("Changes staged, autosave will pick them up.");
    Ok(())
}

fn edit_dedication(session: &Arc<WizardSession>) -> Result<()> {
    let current = session
        .draft()
        .meta
        .dedication
        .map(|d| d.text)
        .unwrap_or_default();
    let text = Text::new("Dedication (leave empty to remove):")
        .with_initial_value(&current)
        .prompt()?;
    let mut draft = session.draft();
    draft.meta.dedication = if text.trim().is_empty() {
        None
    } else {
        Some(Dedication {
            text,
            ..Dedication::default()
        })
    };
    session.submit(draft)?;
    println!("Dedication staged.");
    Ok(())
}

async fn generate_thumbnails(session: &Arc<WizardSession>) {
    let pending: Vec<(String, String)> = session
        .draft()
        .characters
        .iter()
        .filter(|c| c.thumbnail_url.is_none())
        .map(|c| (c.id.clone(), c.name.clone()))
        .collect();
    if pending.is_empty() {
        println!("Every character already has a thumbnail.");
        return;
    }
    for (id, name) in pending {
        match session.generate_character_thumbnail(&id).await {
            Ok(url) => println!("{name}: {url}"),
            Err(e) => eprintln!("{name}: {e:#}"),
        }
    }
}

async fn run_generation(session: &Arc<WizardSession>, retry: bool) -> Result<()> {
    let pending = if retry {
        session
            .task_states()
            .values()
            .filter(|s| matches!(s, TaskState::Error))
            .count()
    } else {
        session
            .draft()
            .pages
            .iter()
            .filter(|p| p.image_url.is_none())
            .count()
    };
    if pending == 0 {
        println!(
            "{}",
            if retry {
                "No failed pages to retry."
            } else {
                "Every page already has artwork."
            }
        );
        return Ok(());
    }

    let mut events = session.subscribe_progress();
    let pb = ProgressBar::new(pending as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    let watcher = {
        let pb = pb.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(progress) => {
                        pb.set_length(progress.total as u64);
                        pb.set_position((progress.completed + progress.failed) as u64);
                        if progress.is_settled() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let outcome = if retry {
        session.retry_failed().await
    } else {
        session.generate_all().await
    };
    let outcome = match outcome {
        Ok(progress) => progress,
        Err(e) => {
            watcher.abort();
            pb.finish_and_clear();
            eprintln!("Generation failed: {e:#}");
            return Ok(());
        }
    };
    let _ = watcher.await;
    pb.finish_with_message("done");

    if outcome.failed > 0 {
        println!("{} of {} pages failed:", outcome.failed, outcome.total);
        for (page_id, error) in session.task_errors() {
            println!("  {page_id}: {error}");
        }
    } else {
        println!("All {} pages illustrated.", outcome.total);
    }
    Ok(())
}

fn sample_draft() -> Draft {
    let mut draft = Draft::default();
    draft.id = "demo-cuento-1".to_string();
    draft.meta.title = "El faro y la ballena".to_string();
    draft.meta.theme = "una amistad junto al mar".to_string();
    draft.meta.target_age = "4-6".to_string();
    draft.meta.literary_style = "rimado".to_string();
    draft.meta.central_message = "los amigos se encuentran aunque sean distintos".to_string();
    draft.characters.push(Character {
        id: "c1".to_string(),
        name: "Bruma".to_string(),
        description: LocalizedText {
            es: "Una ballena gris que canta bajito".to_string(),
            en: "A gray whale that sings softly".to_string(),
        },
        reference_urls: vec![],
        thumbnail_url: None,
    });
    for (i, (text, prompt)) in [
        (
            "El faro parpadeaba solo en la punta del acantilado.",
            "lonely lighthouse on a cliff at dusk, watercolor",
        ),
        (
            "Una noche, una canción subió desde las olas.",
            "whale song rising from dark waves toward a lighthouse beam",
        ),
        (
            "Bruma y el faro se saludaron con luz y con canto.",
            "gray whale greeting a glowing lighthouse, warm colors",
        ),
    ]
    .into_iter()
    .enumerate()
    {
        draft.pages.push(Page {
            id: format!("p{}", i + 1),
            page_number: (i + 1) as u32,
            text: text.to_string(),
            prompt: prompt.to_string(),
            image_url: None,
        });
    }
    draft
}
