//! Keeps a work's parent ("in-works") links in step with the submitted set

use std::collections::BTreeSet;
use uuid::Uuid;

use super::{Actor, ActorEnv, Next, Outcome, WorkAttributes};
use crate::db::Repository;
use crate::error::{DepotResult, FieldError};
use crate::models::Work;

pub const PARENT_WORK_IDS_FIELD: &str = "parent_work_ids";
pub const CANNOT_LINK_MESSAGE: &str =
    "Works can only be related to each other if user has ability to edit both.";
pub const SELF_LINK_MESSAGE: &str = "can't include the work itself";

/// Reconciles the parents of the work against `parent_work_ids`
///
/// The attribute is taken out before the rest of the chain runs. On create
/// the rest of the chain runs first (the work must exist before a parent can
/// list it); on update the links are reconciled first. Either way a failure
/// in the first half skips the second.
///
/// Parents are saved one at a time as they change. A failure part way
/// through leaves the earlier saves in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkLinkActor;

impl Actor for WorkLinkActor {
    fn name(&self) -> &'static str {
        "work_link"
    }

    fn create(
        &self,
        env: &mut ActorEnv<'_>,
        mut attributes: WorkAttributes,
        next: Next<'_>,
    ) -> DepotResult<Outcome> {
        let parent_ids = attributes.parent_work_ids.take();

        let downstream = next.create(env, attributes)?;
        if !downstream.is_success() {
            return Ok(downstream);
        }
        self.reconcile(env, parent_ids)
    }

    fn update(
        &self,
        env: &mut ActorEnv<'_>,
        mut attributes: WorkAttributes,
        next: Next<'_>,
    ) -> DepotResult<Outcome> {
        let parent_ids = attributes.parent_work_ids.take();

        let linked = self.reconcile(env, parent_ids)?;
        if !linked.is_success() {
            return Ok(linked);
        }
        next.update(env, attributes)
    }
}

impl WorkLinkActor {
    fn reconcile(&self, env: &mut ActorEnv<'_>, desired: Option<Vec<Uuid>>) -> DepotResult<Outcome> {
        // Absent means "leave the links alone"; empty means "remove them all"
        let Some(desired) = desired else {
            return Ok(Outcome::success());
        };

        let desired: BTreeSet<Uuid> = desired.into_iter().collect();
        let current: BTreeSet<Uuid> = env
            .backend
            .in_works_ids(&env.work.id)?
            .into_iter()
            .collect();

        self.remove_stale_parents(env, current.difference(&desired))?;
        let errors = self.add_new_parents(env, desired.difference(&current))?;

        Ok(Outcome::from(errors))
    }

    // TODO: removal does not check edit rights on the parent; decide whether
    // detaching should require them like attaching does.
    fn remove_stale_parents<'i>(
        &self,
        env: &mut ActorEnv<'_>,
        stale: impl Iterator<Item = &'i Uuid>,
    ) -> DepotResult<()> {
        for parent_id in stale {
            // A work listed among its own members is fixed on the copy the
            // chain persists, not on a second stored copy
            if *parent_id == env.work.id {
                let id = env.work.id;
                env.work.remove_member(&id);
                env.backend.save_work(&env.work)?;
                log::debug!("detached {} from itself", id);
                continue;
            }

            let mut parent = env.backend.find_work(parent_id)?;
            parent.remove_member(&env.work.id);
            env.backend.save_work(&parent)?;
            log::debug!("detached {} from parent {}", env.work.id, parent_id);
        }
        Ok(())
    }

    fn add_new_parents<'i>(
        &self,
        env: &ActorEnv<'_>,
        added: impl Iterator<Item = &'i Uuid>,
    ) -> DepotResult<Vec<FieldError>> {
        let mut errors = Vec::new();

        for parent_id in added {
            if *parent_id == env.work.id {
                errors.push(
                    FieldError::new(PARENT_WORK_IDS_FIELD, SELF_LINK_MESSAGE).for_id(*parent_id),
                );
                continue;
            }

            let mut parent = env.backend.find_work(parent_id)?;
            if self.can_edit_both(env, &parent) {
                parent.push_member(env.work.id);
                env.backend.save_work(&parent)?;
                log::debug!("attached {} to parent {}", env.work.id, parent_id);
            } else {
                log::warn!(
                    "{} may not link {} under {}",
                    env.principal.user_key,
                    env.work.id,
                    parent_id
                );
                errors.push(
                    FieldError::new(PARENT_WORK_IDS_FIELD, CANNOT_LINK_MESSAGE).for_id(*parent_id),
                );
            }
        }

        Ok(errors)
    }

    fn can_edit_both(&self, env: &ActorEnv<'_>, parent: &Work) -> bool {
        env.ability.can_edit(env.principal, parent) && env.ability.can_edit(env.principal, &env.work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::{Ability, DepositorAbility};
    use crate::actors::ActorChain;
    use crate::db::{DatabaseBackend, MemoryBackend};
    use crate::error::DepotError;
    use crate::models::User;

    struct Fixture {
        backend: MemoryBackend,
        alice: User,
        bob: User,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: MemoryBackend::new(),
                alice: User::new("alice@example.org", "Alice"),
                bob: User::new("bob@example.org", "Bob"),
            }
        }

        fn work_owned_by(&self, title: &str, owner: &User) -> Uuid {
            let mut work = Work::new(title);
            work.depositor = owner.user_key.clone();
            self.backend.save_work(&work).unwrap();
            work.id
        }

        fn parents_of(&self, id: &Uuid) -> BTreeSet<Uuid> {
            self.backend.in_works_ids(id).unwrap().into_iter().collect()
        }

        fn update(&self, as_user: &User, id: Uuid, parents: Option<Vec<Uuid>>) -> Outcome {
            let attributes = WorkAttributes {
                parent_work_ids: parents,
                ..WorkAttributes::default()
            };
            ActorChain::standard()
                .update_work(&self.backend, &DepositorAbility, as_user, &id, attributes)
                .unwrap()
                .outcome
        }
    }

    #[test]
    fn test_omitted_parents_leave_links_alone() {
        let fx = Fixture::new();
        let parent = fx.work_owned_by("Parent", &fx.alice);
        let child = fx.work_owned_by("Child", &fx.alice);
        assert!(fx.update(&fx.alice, child, Some(vec![parent])).is_success());

        let outcome = fx.update(&fx.alice, child, None);
        assert!(outcome.is_success());
        assert_eq!(fx.parents_of(&child), BTreeSet::from([parent]));
    }

    #[test]
    fn test_empty_parents_remove_every_link() {
        let fx = Fixture::new();
        let p1 = fx.work_owned_by("P1", &fx.alice);
        let p2 = fx.work_owned_by("P2", &fx.alice);
        let child = fx.work_owned_by("Child", &fx.alice);
        assert!(fx.update(&fx.alice, child, Some(vec![p1, p2])).is_success());
        assert_eq!(fx.parents_of(&child).len(), 2);

        let outcome = fx.update(&fx.alice, child, Some(vec![]));
        assert!(outcome.is_success());
        assert!(fx.parents_of(&child).is_empty());
    }

    #[test]
    fn test_reconcile_removes_and_adds_differences() {
        let fx = Fixture::new();
        let keep = fx.work_owned_by("Keep", &fx.alice);
        let stale = fx.work_owned_by("Stale", &fx.alice);
        let add = fx.work_owned_by("Add", &fx.alice);
        let child = fx.work_owned_by("Child", &fx.alice);
        assert!(fx.update(&fx.alice, child, Some(vec![keep, stale])).is_success());

        // Duplicates collapse
        let outcome = fx.update(&fx.alice, child, Some(vec![keep, add, add]));
        assert!(outcome.is_success());
        assert_eq!(fx.parents_of(&child), BTreeSet::from([keep, add]));

        let add_work = fx.backend.find_work(&add).unwrap();
        assert_eq!(add_work.ordered_member_ids, vec![child]);
        assert!(fx.backend.find_work(&stale).unwrap().ordered_member_ids.is_empty());
    }

    #[test]
    fn test_unauthorized_parent_is_reported_and_others_still_added() {
        let fx = Fixture::new();
        let mine = fx.work_owned_by("Mine", &fx.alice);
        let theirs = fx.work_owned_by("Theirs", &fx.bob);
        let also_theirs = fx.work_owned_by("Also theirs", &fx.bob);
        let child = fx.work_owned_by("Child", &fx.alice);

        let outcome = fx.update(&fx.alice, child, Some(vec![theirs, mine, also_theirs]));

        assert!(!outcome.is_success());
        let errors = outcome.errors_on(PARENT_WORK_IDS_FIELD);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.message == CANNOT_LINK_MESSAGE));
        let reported: BTreeSet<Uuid> = errors.iter().filter_map(|e| e.id).collect();
        assert_eq!(reported, BTreeSet::from([theirs, also_theirs]));

        assert_eq!(fx.parents_of(&child), BTreeSet::from([mine]));
        assert!(fx.backend.find_work(&theirs).unwrap().ordered_member_ids.is_empty());
    }

    #[test]
    fn test_edit_rights_needed_on_child_too() {
        let fx = Fixture::new();
        let parent = fx.work_owned_by("Parent", &fx.alice);
        let child = fx.work_owned_by("Bob's child", &fx.bob);

        let outcome = fx.update(&fx.alice, child, Some(vec![parent]));
        assert_eq!(outcome.errors_on(PARENT_WORK_IDS_FIELD).len(), 1);
        assert!(fx.parents_of(&child).is_empty());
    }

    #[test]
    fn test_work_cannot_be_its_own_parent() {
        let fx = Fixture::new();
        let parent = fx.work_owned_by("Parent", &fx.alice);
        let work = fx.work_owned_by("Work", &fx.alice);

        let outcome = fx.update(&fx.alice, work, Some(vec![work, parent]));

        assert!(!outcome.is_success());
        let errors = outcome.errors_on(PARENT_WORK_IDS_FIELD);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, SELF_LINK_MESSAGE);
        assert_eq!(errors[0].id, Some(work));
        assert_eq!(fx.parents_of(&work), BTreeSet::from([parent]));
        assert!(!fx.backend.find_work(&work).unwrap().has_member(&work));
    }

    #[test]
    fn test_stored_self_link_is_removed() {
        let fx = Fixture::new();
        let mut work = Work::new("Loop");
        work.depositor = fx.alice.user_key.clone();
        work.push_member(work.id);
        fx.backend.save_work(&work).unwrap();

        let outcome = fx.update(&fx.alice, work.id, Some(vec![]));

        assert!(outcome.is_success());
        assert!(fx.parents_of(&work.id).is_empty());
        assert!(!fx.backend.find_work(&work.id).unwrap().has_member(&work.id));
    }

    #[test]
    fn test_failed_links_skip_rest_of_update() {
        let fx = Fixture::new();
        let theirs = fx.work_owned_by("Theirs", &fx.bob);
        let child = fx.work_owned_by("Child", &fx.alice);

        let attributes = WorkAttributes {
            title: Some("Renamed".into()),
            parent_work_ids: Some(vec![theirs]),
            ..WorkAttributes::default()
        };
        let result = ActorChain::standard()
            .update_work(&fx.backend, &DepositorAbility, &fx.alice, &child, attributes)
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(fx.backend.find_work(&child).unwrap().title, "Child");
    }

    #[test]
    fn test_removal_does_not_require_edit_rights_on_parent() {
        // Anyone who can edit the child can detach it from a parent they
        // cannot edit.
        let fx = Fixture::new();
        let mut parent = Work::new("Bob's parent");
        parent.depositor = fx.bob.user_key.clone();
        let child = fx.work_owned_by("Child", &fx.alice);
        parent.push_member(child);
        fx.backend.save_work(&parent).unwrap();

        let outcome = fx.update(&fx.alice, child, Some(vec![]));
        assert!(outcome.is_success());
        assert!(fx.backend.find_work(&parent.id).unwrap().ordered_member_ids.is_empty());
    }

    #[test]
    fn test_missing_parent_is_not_found() {
        let fx = Fixture::new();
        let child = fx.work_owned_by("Child", &fx.alice);
        let missing = Uuid::new_v4();

        let err = ActorChain::standard()
            .update_work(
                &fx.backend,
                &DepositorAbility,
                &fx.alice,
                &child,
                WorkAttributes::default().with_parents(vec![missing]),
            )
            .unwrap_err();
        assert!(matches!(err, DepotError::WorkNotFound(id) if id == missing));
    }

    #[test]
    fn test_create_links_after_work_is_saved() {
        let fx = Fixture::new();
        let parent = fx.work_owned_by("Parent", &fx.alice);

        let result = ActorChain::standard()
            .create_work(
                &fx.backend,
                &DepositorAbility,
                &fx.alice,
                WorkAttributes::titled("New child").with_parents(vec![parent]),
            )
            .unwrap();

        assert!(result.is_success());
        let child = result.work.id;
        assert!(fx.backend.get_work(&child).unwrap().is_some());
        assert_eq!(fx.parents_of(&child), BTreeSet::from([parent]));
    }

    #[test]
    fn test_create_skips_links_when_save_is_vetoed() {
        let fx = Fixture::new();
        let parent = fx.work_owned_by("Parent", &fx.alice);

        let result = ActorChain::standard()
            .create_work(
                &fx.backend,
                &DepositorAbility,
                &fx.alice,
                WorkAttributes::titled("   ").with_parents(vec![parent]),
            )
            .unwrap();

        assert!(!result.is_success());
        assert!(fx.backend.find_work(&parent).unwrap().ordered_member_ids.is_empty());
    }

    #[test]
    fn test_downstream_never_sees_parent_ids() {
        struct Spy;
        impl Actor for Spy {
            fn name(&self) -> &'static str {
                "spy"
            }
            fn update(
                &self,
                _env: &mut ActorEnv<'_>,
                attributes: WorkAttributes,
                _next: Next<'_>,
            ) -> DepotResult<Outcome> {
                if attributes.parent_work_ids.is_some() {
                    return Ok(Outcome::failure(vec![FieldError::new("spy", "saw parent ids")]));
                }
                Ok(Outcome::success())
            }
        }

        let fx = Fixture::new();
        let child = fx.work_owned_by("Child", &fx.alice);
        let chain = ActorChain::new().with(WorkLinkActor).with(Spy);

        let result = chain
            .update_work(
                &fx.backend,
                &DepositorAbility,
                &fx.alice,
                &child,
                WorkAttributes::default().with_parents(vec![]),
            )
            .unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn test_custom_ability_is_consulted() {
        struct Everyone;
        impl Ability for Everyone {
            fn can_edit(&self, _principal: &User, _work: &Work) -> bool {
                true
            }
        }

        let fx = Fixture::new();
        let theirs = fx.work_owned_by("Theirs", &fx.bob);
        let child = fx.work_owned_by("Child", &fx.bob);

        let result = ActorChain::new()
            .with(WorkLinkActor)
            .update_work(
                &fx.backend,
                &Everyone,
                &fx.alice,
                &child,
                WorkAttributes::default().with_parents(vec![theirs]),
            )
            .unwrap();
        assert!(result.is_success());
        assert_eq!(fx.parents_of(&child), BTreeSet::from([theirs]));
    }
}
