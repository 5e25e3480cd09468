use anyhow::Result;
use inquire::{Confirm, MultiSelect, Text};
use std::path::PathBuf;
use uuid::Uuid;

use depot_core::Work;

/// Title and parent selection for a new work
pub struct NewWorkAnswers {
    pub title: String,
    pub parent_ids: Vec<Uuid>,
}

struct WorkOption {
    id: Uuid,
    title: String,
}

impl std::fmt::Display for WorkOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.title, &self.id.to_string()[..8])
    }
}

/// Prompts for a new work, offering existing works as parents
pub fn prompt_new_work(existing: &[Work]) -> Result<NewWorkAnswers> {
    let title = Text::new("Title:").prompt()?;

    let parent_ids = if existing.is_empty() {
        Vec::new()
    } else {
        let options: Vec<WorkOption> = existing
            .iter()
            .map(|w| WorkOption {
                id: w.id,
                title: w.title.clone(),
            })
            .collect();
        MultiSelect::new("Link into (space to select):", options)
            .prompt()?
            .into_iter()
            .map(|o| o.id)
            .collect()
    };

    Ok(NewWorkAnswers { title, parent_ids })
}

/// Prompts the user for repository registration details
pub fn prompt_register_repository() -> Result<(String, PathBuf, String, bool)> {
    let name = Text::new("Repository name:").prompt()?;
    let path = PathBuf::from(Text::new("Path to store file:").prompt()?);
    let description = Text::new("Description:").prompt()?;
    let default = Confirm::new("Set as default repository?").prompt()?;

    Ok((name, path, description, default))
}

/// Yes/no question defaulting to no
pub fn confirm(question: &str) -> Result<bool> {
    Ok(Confirm::new(question).with_default(false).prompt()?)
}
