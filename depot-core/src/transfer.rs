//! Proxy deposit transfers
//!
//! A sending user offers a work to a receiving user. The offer starts out
//! pending and is then accepted (the receiver becomes depositor of record),
//! rejected by the receiver, or canceled by the sender. Terminal states do
//! not change again; a new request may be opened on the same work instead.
//!
//! The one-open-transfer rule is checked before saving. On the YAML backend
//! that check and the save are separate steps, so two writers racing on one
//! work can both pass it. The SQLite backend backs the rule with a partial
//! unique index and reports the loser as the same validation error.

use uuid::Uuid;

use crate::db::{DatabaseBackend, Repository};
use crate::error::{DepotError, DepotResult, ValidationErrors};
use crate::models::{TransferRequest, TransferStatus, WORK_NOT_FOUND_LABEL};

pub const TRANSFER_TO_FIELD: &str = "transfer_to";
pub const TRANSFER_TO_MESSAGE: &str = "must be an existing user";
pub const SENDING_USER_FIELD: &str = "sending_user";
pub const SELF_TRANSFER_MESSAGE: &str = "must specify another user to receive the work";
pub const OPEN_TRANSFER_FIELD: &str = "open_transfer";
pub const OPEN_TRANSFER_MESSAGE: &str =
    "must close open transfer on the work before creating a new one";

/// Input for opening a transfer
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub work_id: Uuid,
    pub sending_user: Uuid,
    /// User key of the intended receiver
    pub transfer_to: String,
    pub sender_comment: Option<String>,
}

/// Creates transfer requests and moves them through their lifecycle
pub struct TransferService<'a> {
    backend: &'a dyn DatabaseBackend,
}

impl<'a> TransferService<'a> {
    pub fn new(backend: &'a dyn DatabaseBackend) -> Self {
        Self { backend }
    }

    /// Validates and saves a new pending request
    ///
    /// Every violated rule is reported at once, keyed by field.
    pub fn create(&self, new: NewTransfer) -> DepotResult<TransferRequest> {
        let receiver = self.backend.get_user_by_key(&new.transfer_to)?;

        let mut errors = ValidationErrors::new();
        if receiver.is_none() {
            errors.add(TRANSFER_TO_FIELD, TRANSFER_TO_MESSAGE);
        }
        let receiving_user = receiver.map(|u| u.id);

        let request = TransferRequest::new(
            new.work_id,
            new.sending_user,
            receiving_user.unwrap_or_else(Uuid::nil),
            new.sender_comment,
        );
        Self::check_parties(&request, receiving_user, &mut errors);
        self.check_open_transfer(&request, &mut errors)?;

        if !errors.is_empty() {
            log::debug!("transfer of {} refused: {}", new.work_id, errors);
            return Err(DepotError::Validation(errors));
        }

        self.backend.save_transfer_request(&request)?;
        log::info!(
            "opened transfer {} of work {} to {}",
            request.id,
            request.work_id,
            new.transfer_to
        );
        Ok(request)
    }

    /// Re-runs the creation rules against a stored request
    pub fn validate(&self, request: &TransferRequest) -> DepotResult<ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let receiver = self.backend.get_user(&request.receiving_user)?;
        if receiver.is_none() {
            errors.add(TRANSFER_TO_FIELD, TRANSFER_TO_MESSAGE);
        }
        Self::check_parties(request, Some(request.receiving_user), &mut errors);
        self.check_open_transfer(request, &mut errors)?;
        Ok(errors)
    }

    fn check_parties(
        request: &TransferRequest,
        receiving_user: Option<Uuid>,
        errors: &mut ValidationErrors,
    ) {
        if receiving_user == Some(request.sending_user) {
            errors.add(SENDING_USER_FIELD, SELF_TRANSFER_MESSAGE);
        }
    }

    fn check_open_transfer(
        &self,
        request: &TransferRequest,
        errors: &mut ValidationErrors,
    ) -> DepotResult<()> {
        if request.is_pending()
            && self
                .backend
                .open_transfer_for_work(&request.work_id, Some(&request.id))?
                .is_some()
        {
            errors.add(OPEN_TRANSFER_FIELD, OPEN_TRANSFER_MESSAGE);
        }
        Ok(())
    }

    /// Accepts the request and hands the work to the receiving user
    ///
    /// If the work is still there its depositor of record becomes the
    /// receiver, who also gains edit rights.
    pub fn transfer(&self, id: &Uuid) -> DepotResult<TransferRequest> {
        let mut request = self.backend.find_transfer_request(id)?;
        request.transfer()?;
        self.backend.save_transfer_request(&request)?;

        if let Some(mut work) = self.backend.get_work(&request.work_id)? {
            let receiver = self.backend.find_user(&request.receiving_user)?;
            work.depositor = receiver.user_key.clone();
            work.edit_users.insert(receiver.user_key.clone());
            work.modified_at = chrono::Utc::now();
            self.backend.save_work(&work)?;
            log::info!("work {} now deposited by {}", work.id, receiver.user_key);
        } else {
            log::warn!(
                "transfer {} accepted but work {} is gone",
                request.id,
                request.work_id
            );
        }

        Ok(request)
    }

    /// Rejects the request, keeping the receiver's comment
    pub fn reject(&self, id: &Uuid, receiver_comment: Option<String>) -> DepotResult<TransferRequest> {
        let mut request = self.backend.find_transfer_request(id)?;
        request.reject(receiver_comment)?;
        self.backend.save_transfer_request(&request)?;
        log::info!("rejected transfer {}", request.id);
        Ok(request)
    }

    /// Withdraws the request on the sender's behalf
    pub fn cancel(&self, id: &Uuid) -> DepotResult<TransferRequest> {
        let mut request = self.backend.find_transfer_request(id)?;
        request.cancel()?;
        self.backend.save_transfer_request(&request)?;
        log::info!("canceled transfer {}", request.id);
        Ok(request)
    }

    /// The work's title, or "work not found" once it has been deleted
    pub fn status_label(&self, request: &TransferRequest) -> DepotResult<String> {
        Ok(self
            .backend
            .get_work(&request.work_id)?
            .map(|w| w.title)
            .unwrap_or_else(|| WORK_NOT_FOUND_LABEL.to_string()))
    }

    pub fn is_deleted_work(&self, request: &TransferRequest) -> DepotResult<bool> {
        Ok(self.backend.get_work(&request.work_id)?.is_none())
    }

    /// Requests addressed to `user_id`, oldest first
    pub fn received_by(&self, user_id: &Uuid) -> DepotResult<Vec<TransferRequest>> {
        Ok(self
            .backend
            .list_transfer_requests()?
            .into_iter()
            .filter(|r| r.receiving_user == *user_id)
            .collect())
    }

    /// Requests sent by `user_id`, oldest first
    pub fn sent_by(&self, user_id: &Uuid) -> DepotResult<Vec<TransferRequest>> {
        Ok(self
            .backend
            .list_transfer_requests()?
            .into_iter()
            .filter(|r| r.sending_user == *user_id)
            .collect())
    }

    /// Requests in the given state, oldest first
    pub fn with_status(&self, status: TransferStatus) -> DepotResult<Vec<TransferRequest>> {
        Ok(self
            .backend
            .list_transfer_requests()?
            .into_iter()
            .filter(|r| r.status == status)
            .collect())
    }
}
