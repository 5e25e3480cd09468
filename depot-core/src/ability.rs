//! Capability checks
//!
//! Only the `can_edit` contract is used by the actor chain; how a real
//! deployment decides it is up to the [`Ability`] implementation.

use crate::models::{User, Work};

/// Decides whether a principal may edit a work
pub trait Ability: Send + Sync {
    fn can_edit(&self, principal: &User, work: &Work) -> bool;
}

/// Grants edit rights to the depositor of record and the work's edit users
#[derive(Debug, Clone, Copy, Default)]
pub struct DepositorAbility;

impl Ability for DepositorAbility {
    fn can_edit(&self, principal: &User, work: &Work) -> bool {
        work.depositor == principal.user_key || work.edit_users.contains(&principal.user_key)
    }
}
