use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DepotError;

/// Display text used when a transfer request points at a work that is gone
pub const WORK_NOT_FOUND_LABEL: &str = "work not found";

/// A registered user of the repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique identifier for the user (UUID)
    pub id: Uuid,

    /// Login key used to look the user up (usually an email address)
    pub user_key: String,

    /// Display name
    pub name: String,

    /// Contact email
    #[serde(default)]
    pub email: String,

    /// When the user was registered
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Creates a new user with the given key and display name
    pub fn new(user_key: impl Into<String>, name: impl Into<String>) -> Self {
        let user_key = user_key.into();
        Self {
            id: Uuid::new_v4(),
            email: user_key.clone(),
            user_key,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A digital object held by the repository
///
/// Membership is stored on the parent only: `ordered_member_ids` lists the
/// children in order. The child's parents ("in-works") are derived by
/// scanning the store, see [`DepotStore::in_works_ids`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Work {
    /// Unique identifier for the work (UUID)
    pub id: Uuid,

    /// Work title
    pub title: String,

    /// User key of the depositor of record
    #[serde(default)]
    pub depositor: String,

    /// User keys granted edit rights besides the depositor
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub edit_users: BTreeSet<String>,

    /// Child works, in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ordered_member_ids: Vec<Uuid>,

    /// When the work was created
    pub created_at: DateTime<Utc>,

    /// When the work was last modified
    pub modified_at: DateTime<Utc>,
}

impl Work {
    /// Creates a new, not yet persisted, work
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            depositor: String::new(),
            edit_users: BTreeSet::new(),
            ordered_member_ids: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Returns true if the given work is one of this work's ordered members
    pub fn has_member(&self, id: &Uuid) -> bool {
        self.ordered_member_ids.contains(id)
    }

    /// Appends a member at the end of the ordered list (no-op if already present)
    pub fn push_member(&mut self, id: Uuid) {
        if !self.has_member(&id) {
            self.ordered_member_ids.push(id);
            self.modified_at = Utc::now();
        }
    }

    /// Removes every occurrence of a member, returning true if anything changed
    pub fn remove_member(&mut self, id: &Uuid) -> bool {
        let original_len = self.ordered_member_ids.len();
        self.ordered_member_ids.retain(|m| m != id);
        let changed = self.ordered_member_ids.len() != original_len;
        if changed {
            self.modified_at = Utc::now();
        }
        changed
    }
}

/// Lifecycle state of a transfer request
///
/// Persisted as its lowercase name. Unknown names are rejected at parse time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Rejected,
    Canceled,
}

impl TransferStatus {
    /// The persisted name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Accepted => "accepted",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Canceled => "canceled",
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Pending => write!(f, "Pending"),
            TransferStatus::Accepted => write!(f, "Accepted"),
            TransferStatus::Rejected => write!(f, "Rejected"),
            TransferStatus::Canceled => write!(f, "Canceled"),
        }
    }
}

impl FromStr for TransferStatus {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "accepted" => Ok(TransferStatus::Accepted),
            "rejected" => Ok(TransferStatus::Rejected),
            "canceled" => Ok(TransferStatus::Canceled),
            other => Err(DepotError::InvalidStatus(other.to_string())),
        }
    }
}

/// One offer to hand deposit responsibility for a work to another user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRequest {
    pub id: Uuid,

    /// The work being transferred (not owned by the request)
    pub work_id: Uuid,

    /// User offering the work
    pub sending_user: Uuid,

    /// User asked to take over the work
    pub receiving_user: Uuid,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_comment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_comment: Option<String>,

    pub status: TransferStatus,

    /// Set exactly when the request reaches a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRequest {
    /// Creates a pending request. Invariants are checked when the request is
    /// saved through [`crate::transfer::TransferService`].
    pub fn new(
        work_id: Uuid,
        sending_user: Uuid,
        receiving_user: Uuid,
        sender_comment: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            work_id,
            sending_user,
            receiving_user,
            sender_comment,
            receiver_comment: None,
            status: TransferStatus::Pending,
            fulfillment_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransferStatus::Pending
    }

    pub fn is_accepted(&self) -> bool {
        self.status == TransferStatus::Accepted
    }

    pub fn is_rejected(&self) -> bool {
        self.status == TransferStatus::Rejected
    }

    pub fn is_canceled(&self) -> bool {
        self.status == TransferStatus::Canceled
    }

    /// Marks the request accepted by the receiving user
    pub fn transfer(&mut self) -> Result<(), DepotError> {
        self.fulfill(TransferStatus::Accepted)
    }

    /// Marks the request rejected, keeping the receiver's reason
    pub fn reject(&mut self, receiver_comment: Option<String>) -> Result<(), DepotError> {
        self.fulfill(TransferStatus::Rejected)?;
        self.receiver_comment = receiver_comment;
        Ok(())
    }

    /// Withdraws the request on behalf of the sender
    pub fn cancel(&mut self) -> Result<(), DepotError> {
        self.fulfill(TransferStatus::Canceled)
    }

    fn fulfill(&mut self, to: TransferStatus) -> Result<(), DepotError> {
        if self.status.is_terminal() {
            return Err(DepotError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        let now = Utc::now();
        self.status = to;
        self.fulfillment_date = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

/// Collection of everything a repository holds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepotStore {
    /// Repository name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub works: Vec<Work>,

    #[serde(default)]
    pub users: Vec<User>,

    #[serde(default)]
    pub transfer_requests: Vec<TransferRequest>,
}

impl DepotStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self {
            name: String::new(),
            works: Vec::new(),
            users: Vec::new(),
            transfer_requests: Vec::new(),
        }
    }

    /// Gets a work by ID
    pub fn get_work(&self, id: &Uuid) -> Option<&Work> {
        self.works.iter().find(|w| w.id == *id)
    }

    /// Inserts the work or replaces the stored copy with the same ID
    pub fn upsert_work(&mut self, work: Work) {
        match self.works.iter_mut().find(|w| w.id == work.id) {
            Some(existing) => *existing = work,
            None => self.works.push(work),
        }
    }

    /// Removes a work and detaches it from every parent.
    /// Returns false if no work had that ID.
    pub fn remove_work(&mut self, id: &Uuid) -> bool {
        let original_len = self.works.len();
        self.works.retain(|w| w.id != *id);
        if self.works.len() == original_len {
            return false;
        }
        for parent in &mut self.works {
            parent.remove_member(id);
        }
        true
    }

    /// IDs of the works listing `id` among their ordered members
    pub fn in_works_ids(&self, id: &Uuid) -> Vec<Uuid> {
        self.works
            .iter()
            .filter(|w| w.has_member(id))
            .map(|w| w.id)
            .collect()
    }

    /// Gets a user by ID
    pub fn get_user(&self, id: &Uuid) -> Option<&User> {
        self.users.iter().find(|u| u.id == *id)
    }

    /// Gets a user by login key
    pub fn get_user_by_key(&self, user_key: &str) -> Option<&User> {
        self.users.iter().find(|u| u.user_key == user_key)
    }

    /// Gets a transfer request by ID
    pub fn get_transfer_request(&self, id: &Uuid) -> Option<&TransferRequest> {
        self.transfer_requests.iter().find(|t| t.id == *id)
    }

    /// Inserts the request or replaces the stored copy with the same ID
    pub fn upsert_transfer_request(&mut self, request: TransferRequest) {
        match self
            .transfer_requests
            .iter_mut()
            .find(|t| t.id == request.id)
        {
            Some(existing) => *existing = request,
            None => self.transfer_requests.push(request),
        }
    }

    /// The pending request on `work_id`, ignoring the request `excluding`
    pub fn open_transfer_for_work(
        &self,
        work_id: &Uuid,
        excluding: Option<&Uuid>,
    ) -> Option<&TransferRequest> {
        self.transfer_requests.iter().find(|t| {
            t.work_id == *work_id && t.is_pending() && Some(&t.id) != excluding
        })
    }

    /// Validates that user keys are unique
    pub fn validate_unique_user_keys(&self) -> anyhow::Result<()> {
        let mut seen = BTreeSet::new();
        for user in &self.users {
            if !seen.insert(user.user_key.as_str()) {
                anyhow::bail!("Duplicate user key found: {}", user.user_key);
            }
        }
        Ok(())
    }
}

impl Default for DepotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_strict() {
        assert_eq!("pending".parse::<TransferStatus>().unwrap(), TransferStatus::Pending);
        assert_eq!("canceled".parse::<TransferStatus>().unwrap(), TransferStatus::Canceled);

        let err = "not_valid".parse::<TransferStatus>().unwrap_err();
        assert!(matches!(err, DepotError::InvalidStatus(ref s) if s == "not_valid"));

        // Display names are not storage names
        assert!("Pending".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn test_status_rejected_by_serde() {
        let result: Result<TransferStatus, _> = serde_json::from_str("\"not_valid\"");
        assert!(result.is_err());

        let json = serde_json::to_string(&TransferStatus::Canceled).unwrap();
        assert_eq!(json, "\"canceled\"");
    }

    #[test]
    fn test_new_request_is_pending() {
        let req = TransferRequest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some("please take this".into()),
        );
        assert!(req.is_pending());
        assert!(req.fulfillment_date.is_none());
        assert_eq!(req.sender_comment.as_deref(), Some("please take this"));
    }

    #[test]
    fn test_reject_stores_comment() {
        let mut req = TransferRequest::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), None);
        req.reject(Some("a comment".into())).unwrap();

        assert_eq!(req.status, TransferStatus::Rejected);
        assert!(req.fulfillment_date.is_some());
        assert_eq!(req.receiver_comment.as_deref(), Some("a comment"));
    }

    #[test]
    fn test_second_transition_fails_and_keeps_date() {
        let mut req = TransferRequest::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), None);
        req.transfer().unwrap();
        let first_date = req.fulfillment_date;

        let err = req.cancel().unwrap_err();
        assert!(matches!(
            err,
            DepotError::InvalidTransition {
                from: TransferStatus::Accepted,
                to: TransferStatus::Canceled,
                ..
            }
        ));
        assert_eq!(req.status, TransferStatus::Accepted);
        assert_eq!(req.fulfillment_date, first_date);

        assert!(req.transfer().is_err());
        assert!(req.reject(Some("late".into())).is_err());
        assert!(req.receiver_comment.is_none());
    }

    #[test]
    fn test_remove_work_detaches_from_parents() {
        let mut store = DepotStore::new();
        let mut parent = Work::new("Parent");
        let child = Work::new("Child");
        parent.push_member(child.id);
        let (parent_id, child_id) = (parent.id, child.id);
        store.upsert_work(parent);
        store.upsert_work(child);

        assert_eq!(store.in_works_ids(&child_id), vec![parent_id]);
        assert!(store.remove_work(&child_id));
        assert!(store.get_work(&parent_id).unwrap().ordered_member_ids.is_empty());
        assert!(!store.remove_work(&child_id));
    }

    #[test]
    fn test_push_member_is_idempotent() {
        let mut work = Work::new("Parent");
        let child = Uuid::new_v4();
        work.push_member(child);
        work.push_member(child);
        assert_eq!(work.ordered_member_ids, vec![child]);
        assert!(work.remove_member(&child));
        assert!(!work.remove_member(&child));
    }

    #[test]
    fn test_open_transfer_excludes_self() {
        let mut store = DepotStore::new();
        let work_id = Uuid::new_v4();
        let req = TransferRequest::new(work_id, Uuid::new_v4(), Uuid::new_v4(), None);
        let req_id = req.id;
        store.upsert_transfer_request(req);

        assert!(store.open_transfer_for_work(&work_id, None).is_some());
        assert!(store.open_transfer_for_work(&work_id, Some(&req_id)).is_none());
    }

    #[test]
    fn test_validate_unique_user_keys_duplicate() {
        let mut store = DepotStore::new();
        store.users.push(User::new("alice@example.org", "Alice"));
        store.users.push(User::new("alice@example.org", "Alice Again"));

        let result = store.validate_unique_user_keys();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Duplicate user key"));
    }
}
