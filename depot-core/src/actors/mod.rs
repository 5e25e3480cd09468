//! Actor chain for creating and updating works
//!
//! A create or update runs through an ordered list of [`Actor`]s. Each actor
//! handles one concern and decides where in its own work the rest of the
//! chain runs, by calling the [`Next`] handle it is given. Returning a failed
//! [`Outcome`] without calling `next` vetoes everything downstream.
//!
//! The chain threads an explicit [`ActorEnv`] (the work, the acting user,
//! the capability checker and the store) instead of sharing mutable state.

mod link;
mod model;

pub use link::{WorkLinkActor, CANNOT_LINK_MESSAGE, PARENT_WORK_IDS_FIELD, SELF_LINK_MESSAGE};
pub use model::{ModelActor, OwnershipActor, BLANK_TITLE_MESSAGE, TITLE_FIELD};

use std::collections::BTreeSet;
use uuid::Uuid;

use crate::ability::Ability;
use crate::db::{DatabaseBackend, Repository};
use crate::error::{DepotResult, FieldError};
use crate::models::{User, Work};

/// Attributes submitted with a create or update
///
/// `None` means "not submitted" and leaves the value alone. For
/// `parent_work_ids` that distinction matters: `Some(vec![])` detaches the
/// work from every parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkAttributes {
    pub title: Option<String>,
    pub edit_users: Option<BTreeSet<String>>,
    pub parent_work_ids: Option<Vec<Uuid>>,
}

impl WorkAttributes {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_parents(mut self, parent_work_ids: Vec<Uuid>) -> Self {
        self.parent_work_ids = Some(parent_work_ids);
        self
    }
}

/// Everything an actor may read or touch while the chain runs
pub struct ActorEnv<'a> {
    /// The work being created or updated. Actors mutate it in place; the
    /// model actor persists it.
    pub work: Work,
    pub principal: &'a User,
    pub ability: &'a dyn Ability,
    pub backend: &'a dyn DatabaseBackend,
}

impl<'a> ActorEnv<'a> {
    pub fn new(
        work: Work,
        principal: &'a User,
        ability: &'a dyn Ability,
        backend: &'a dyn DatabaseBackend,
    ) -> Self {
        Self {
            work,
            principal,
            ability,
            backend,
        }
    }
}

/// Result of running one actor (and whatever it delegated to)
///
/// Business-rule failures are carried here as field errors. Structural
/// failures such as a missing parent come back as `Err` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    errors: Vec<FieldError>,
}

impl Outcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Errors recorded against one field
    pub fn errors_on(&self, field: &str) -> Vec<&FieldError> {
        self.errors.iter().filter(|e| e.field == field).collect()
    }
}

impl From<Vec<FieldError>> for Outcome {
    fn from(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }
}

/// One concern in the chain
///
/// The default implementations pass straight through to the rest of the
/// chain, so an actor only overrides the operations it cares about.
pub trait Actor: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(
        &self,
        env: &mut ActorEnv<'_>,
        attributes: WorkAttributes,
        next: Next<'_>,
    ) -> DepotResult<Outcome> {
        next.create(env, attributes)
    }

    fn update(
        &self,
        env: &mut ActorEnv<'_>,
        attributes: WorkAttributes,
        next: Next<'_>,
    ) -> DepotResult<Outcome> {
        next.update(env, attributes)
    }
}

/// The remainder of the chain after the current actor
#[derive(Clone, Copy)]
pub struct Next<'c> {
    actors: &'c [Box<dyn Actor>],
}

impl<'c> Next<'c> {
    /// Runs `create` on the remaining actors; an empty remainder succeeds
    pub fn create(self, env: &mut ActorEnv<'_>, attributes: WorkAttributes) -> DepotResult<Outcome> {
        match self.actors.split_first() {
            Some((actor, rest)) => {
                log::debug!("create: {}", actor.name());
                actor.create(env, attributes, Next { actors: rest })
            }
            None => Ok(Outcome::success()),
        }
    }

    /// Runs `update` on the remaining actors; an empty remainder succeeds
    pub fn update(self, env: &mut ActorEnv<'_>, attributes: WorkAttributes) -> DepotResult<Outcome> {
        match self.actors.split_first() {
            Some((actor, rest)) => {
                log::debug!("update: {}", actor.name());
                actor.update(env, attributes, Next { actors: rest })
            }
            None => Ok(Outcome::success()),
        }
    }
}

/// What a create or update produced
#[derive(Debug, Clone)]
pub struct ChainResult {
    /// The work as the chain left it
    pub work: Work,
    pub outcome: Outcome,
}

impl ChainResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Ordered list of actors applied to every create and update
pub struct ActorChain {
    actors: Vec<Box<dyn Actor>>,
}

impl ActorChain {
    /// An empty chain; every operation trivially succeeds
    pub fn new() -> Self {
        Self { actors: Vec::new() }
    }

    /// The default chain: ownership, parent links, then persistence
    pub fn standard() -> Self {
        Self::new()
            .with(OwnershipActor)
            .with(WorkLinkActor)
            .with(ModelActor)
    }

    /// Appends an actor to the end of the chain
    pub fn with<A: Actor + 'static>(mut self, actor: A) -> Self {
        self.actors.push(Box::new(actor));
        self
    }

    /// Actor names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.actors.iter().map(|a| a.name()).collect()
    }

    fn head(&self) -> Next<'_> {
        Next {
            actors: &self.actors,
        }
    }

    /// Runs the chain's create path over an explicit environment
    pub fn create(&self, env: &mut ActorEnv<'_>, attributes: WorkAttributes) -> DepotResult<Outcome> {
        self.head().create(env, attributes)
    }

    /// Runs the chain's update path over an explicit environment
    pub fn update(&self, env: &mut ActorEnv<'_>, attributes: WorkAttributes) -> DepotResult<Outcome> {
        self.head().update(env, attributes)
    }

    /// Creates a new work on behalf of `principal`
    pub fn create_work(
        &self,
        backend: &dyn DatabaseBackend,
        ability: &dyn Ability,
        principal: &User,
        attributes: WorkAttributes,
    ) -> DepotResult<ChainResult> {
        let title = attributes.title.clone().unwrap_or_default();
        let mut env = ActorEnv::new(Work::new(title), principal, ability, backend);
        let outcome = self.create(&mut env, attributes)?;
        Ok(ChainResult {
            work: env.work,
            outcome,
        })
    }

    /// Updates an existing work on behalf of `principal`
    pub fn update_work(
        &self,
        backend: &dyn DatabaseBackend,
        ability: &dyn Ability,
        principal: &User,
        work_id: &Uuid,
        attributes: WorkAttributes,
    ) -> DepotResult<ChainResult> {
        let work = backend.find_work(work_id)?;
        let mut env = ActorEnv::new(work, principal, ability, backend);
        let outcome = self.update(&mut env, attributes)?;
        Ok(ChainResult {
            work: env.work,
            outcome,
        })
    }
}

impl Default for ActorChain {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::DepositorAbility;
    use crate::db::MemoryBackend;
    use std::sync::{Arc, Mutex};

    /// Records the order actors run in and optionally vetoes
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        veto: bool,
    }

    impl Actor for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn create(
            &self,
            env: &mut ActorEnv<'_>,
            attributes: WorkAttributes,
            next: Next<'_>,
        ) -> DepotResult<Outcome> {
            self.log.lock().unwrap().push(format!("{}:create", self.name));
            if self.veto {
                return Ok(Outcome::failure(vec![FieldError::new("step", "vetoed")]));
            }
            next.create(env, attributes)
        }
    }

    #[test]
    fn test_empty_chain_succeeds() {
        let backend = MemoryBackend::new();
        let user = User::new("alice@example.org", "Alice");
        let chain = ActorChain::new();

        let result = chain
            .create_work(&backend, &DepositorAbility, &user, WorkAttributes::titled("T"))
            .unwrap();
        assert!(result.is_success());
        // Nothing persisted without a model actor
        assert!(backend.get_work(&result.work.id).unwrap().is_none());
    }

    #[test]
    fn test_chain_runs_in_order_and_veto_stops_it() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ActorChain::new()
            .with(Recorder { name: "first", log: log.clone(), veto: false })
            .with(Recorder { name: "second", log: log.clone(), veto: true })
            .with(Recorder { name: "third", log: log.clone(), veto: false });
        assert_eq!(chain.names(), vec!["first", "second", "third"]);

        let backend = MemoryBackend::new();
        let user = User::new("alice@example.org", "Alice");
        let result = chain
            .create_work(&backend, &DepositorAbility, &user, WorkAttributes::titled("T"))
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.outcome.errors_on("step").len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["first:create", "second:create"]);
    }

    #[test]
    fn test_standard_chain_order() {
        assert_eq!(
            ActorChain::standard().names(),
            vec!["ownership", "work_link", "model"]
        );
    }

    #[test]
    fn test_update_missing_work_is_not_found() {
        let backend = MemoryBackend::new();
        let user = User::new("alice@example.org", "Alice");
        let missing = Uuid::new_v4();

        let err = ActorChain::standard()
            .update_work(&backend, &DepositorAbility, &user, &missing, WorkAttributes::default())
            .unwrap_err();
        assert!(matches!(err, crate::error::DepotError::WorkNotFound(id) if id == missing));
    }
}
