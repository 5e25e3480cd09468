use chrono::Utc;

use super::{Actor, ActorEnv, Next, Outcome, WorkAttributes};
use crate::error::{DepotResult, FieldError};

pub const TITLE_FIELD: &str = "title";
pub const BLANK_TITLE_MESSAGE: &str = "can't be blank";

/// Makes the acting user the depositor of a new work
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipActor;

impl Actor for OwnershipActor {
    fn name(&self) -> &'static str {
        "ownership"
    }

    fn create(
        &self,
        env: &mut ActorEnv<'_>,
        attributes: WorkAttributes,
        next: Next<'_>,
    ) -> DepotResult<Outcome> {
        if env.work.depositor.is_empty() {
            env.work.depositor = env.principal.user_key.clone();
        }
        env.work.edit_users.insert(env.principal.user_key.clone());
        next.create(env, attributes)
    }
}

/// Applies the remaining attributes and persists the work
///
/// Sits at the end of the chain, so by the time it runs every concern-specific
/// attribute has already been taken out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelActor;

impl ModelActor {
    fn apply(env: &mut ActorEnv<'_>, attributes: WorkAttributes) -> Vec<FieldError> {
        if let Some(title) = attributes.title {
            env.work.title = title;
        }
        if let Some(edit_users) = attributes.edit_users {
            env.work.edit_users = edit_users;
        }

        let mut errors = Vec::new();
        if env.work.title.trim().is_empty() {
            errors.push(FieldError::new(TITLE_FIELD, BLANK_TITLE_MESSAGE));
        }
        errors
    }

    fn persist(env: &mut ActorEnv<'_>, attributes: WorkAttributes) -> DepotResult<Outcome> {
        let errors = Self::apply(env, attributes);
        if !errors.is_empty() {
            return Ok(Outcome::failure(errors));
        }

        env.work.modified_at = Utc::now();
        env.backend.save_work(&env.work)?;
        log::info!("saved work {} ({})", env.work.id, env.work.title);
        Ok(Outcome::success())
    }
}

impl Actor for ModelActor {
    fn name(&self) -> &'static str {
        "model"
    }

    fn create(
        &self,
        env: &mut ActorEnv<'_>,
        attributes: WorkAttributes,
        next: Next<'_>,
    ) -> DepotResult<Outcome> {
        let saved = Self::persist(env, attributes.clone())?;
        if !saved.is_success() {
            return Ok(saved);
        }
        next.create(env, attributes)
    }

    fn update(
        &self,
        env: &mut ActorEnv<'_>,
        attributes: WorkAttributes,
        next: Next<'_>,
    ) -> DepotResult<Outcome> {
        let saved = Self::persist(env, attributes.clone())?;
        if !saved.is_success() {
            return Ok(saved);
        }
        next.update(env, attributes)
    }
}
