//! Service layer API for blood request workflow operations
//!
//! A request starts `pending`. An admin moves it to `approved` (allocating
//! units) or `rejected`; its recipient may move it to `cancelled`. Approved
//! requests may later be marked `fulfilled`. Every transition is a single
//! sled transaction that re-reads the request, so a request leaves `pending`
//! exactly once even under concurrent callers.
use super::allocator;
use super::error::{FieldErrors, ServiceError};
use super::models::{BloodRequest, InventoryUnit};
use super::policy::Policy;
use super::store::{self, Store, abort};
use super::types::{BloodGroup, RequestStatus, TimeStamp, UnitStatus, Urgency};
use serde::Serialize;
use sled::Transactional;
use sled::transaction::{TransactionError, TransactionResult};

/// Approvals retry from a fresh inventory snapshot at most this many times
/// when another transaction takes one of the proposed units first.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 5;

const DEFAULT_REJECTION_NOTE: &str = "Request rejected";

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub blood_group: BloodGroup,
    pub units_needed: u8,
    pub urgency: Urgency,
    pub hospital_location: String,
}

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub urgency: Option<Urgency>,
    /// Restrict to one recipient's requests.
    pub recipient_id: Option<u64>,
}

/// A request with the emails of the accounts it refers to.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: BloodRequest,
    pub recipient_email: Option<String>,
    pub admin_email: Option<String>,
}

impl NewRequest {
    fn validate(&self, policy: &Policy) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.check(
            (1..=policy.max_units_per_request).contains(&self.units_needed),
            "units_needed",
            &format!("Units needed must be between 1-{}", policy.max_units_per_request),
        );
        errors.check(
            !self.hospital_location.trim().is_empty(),
            "hospital_location",
            "Hospital location is required",
        );
        errors.finish()
    }
}

fn ensure_pending(request: &BloodRequest, action: &str) -> Result<(), ServiceError> {
    if request.status != RequestStatus::Pending {
        return Err(ServiceError::InvalidState(format!(
            "Only pending requests can be {action}. Current status: {:?}",
            request.status
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct RequestService {
    store: Store,
    policy: Policy,
}

impl RequestService {
    pub fn new(store: Store, policy: Policy) -> Self {
        Self { store, policy }
    }

    /// Submit a new request. Stock is not checked until approval.
    pub fn create(&self, recipient_id: u64, new: NewRequest) -> Result<BloodRequest, ServiceError> {
        new.validate(&self.policy)?;
        self.store.account(recipient_id)?;

        let now = TimeStamp::new();
        let request = BloodRequest {
            id: self.store.next_id()?,
            recipient_id,
            blood_group: new.blood_group,
            units_needed: new.units_needed,
            urgency: new.urgency,
            hospital_location: new.hospital_location.trim().to_string(),
            status: RequestStatus::Pending,
            admin_notes: None,
            approved_by: None,
            approved_at: None,
            allocated_units: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store
            .requests
            .insert(store::key(request.id), store::encode(&request)?)?;

        tracing::info!(
            request_id = request.id,
            recipient_id,
            blood_group = %request.blood_group,
            units_needed = request.units_needed,
            "blood request submitted"
        );
        Ok(request)
    }

    pub fn get(&self, request_id: u64) -> Result<BloodRequest, ServiceError> {
        self.store.request(request_id)
    }

    /// Requests matching `filter`, most urgent first, then newest first.
    pub fn list(&self, filter: &RequestFilter) -> Result<Vec<BloodRequest>, ServiceError> {
        let mut requests: Vec<BloodRequest> = self
            .store
            .requests()?
            .into_iter()
            .filter(|r| filter.status.is_none_or(|s| s == r.status))
            .filter(|r| filter.urgency.is_none_or(|u| u == r.urgency))
            .filter(|r| filter.recipient_id.is_none_or(|id| id == r.recipient_id))
            .collect();
        requests.sort_by(|a, b| (b.urgency, b.id).cmp(&(a.urgency, a.id)));
        Ok(requests)
    }

    /// Like [`RequestService::list`], with recipient and approving admin emails joined in.
    pub fn list_views(&self, filter: &RequestFilter) -> Result<Vec<RequestView>, ServiceError> {
        self.list(filter)?
            .into_iter()
            .map(|request| {
                let email = |id: u64| -> Result<Option<String>, ServiceError> {
                    Ok(self.store.find_account(id)?.map(|a| a.email))
                };
                Ok(RequestView {
                    recipient_email: email(request.recipient_id)?,
                    admin_email: request.approved_by.map(email).transpose()?.flatten(),
                    request,
                })
            })
            .collect()
    }

    /// Approve a pending request, marking the soonest-expiring matching units used.
    ///
    /// Units are proposed from a snapshot and re-checked inside the commit. If
    /// another approval took one of them in between, the commit aborts and the
    /// approval starts over from a fresh snapshot.
    pub fn approve(
        &self,
        request_id: u64,
        admin_id: u64,
        notes: Option<String>,
    ) -> Result<BloodRequest, ServiceError> {
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let request = self.store.request(request_id)?;
            ensure_pending(&request, "approved")?;

            let needed = usize::from(request.units_needed);
            let proposal = allocator::propose_from_store(&self.store, request.blood_group, needed)?;
            if proposal.len() < needed {
                return Err(ServiceError::InsufficientStock {
                    available: proposal.len(),
                    needed,
                });
            }

            match self.commit_approval(request_id, admin_id, notes.as_deref(), &proposal) {
                Err(TransactionError::Abort(ServiceError::Conflict(reason))) => {
                    tracing::warn!(request_id, attempt, %reason, "allocation raced, retrying");
                }
                Err(err) => return Err(err.into()),
                Ok(approved) => {
                    tracing::info!(
                        request_id,
                        admin_id,
                        units = ?approved.allocated_units,
                        "blood request approved"
                    );
                    return Ok(approved);
                }
            }
        }

        Err(ServiceError::Conflict(format!(
            "Inventory kept changing while approving request {request_id}, try again"
        )))
    }

    fn commit_approval(
        &self,
        request_id: u64,
        admin_id: u64,
        notes: Option<&str>,
        proposal: &[InventoryUnit],
    ) -> TransactionResult<BloodRequest, ServiceError> {
        (&self.store.requests, &self.store.inventory).transaction(|(requests, inventory)| {
            let mut request: BloodRequest = store::tx_read(requests, request_id)?
                .ok_or_else(|| abort(ServiceError::not_found("request", request_id)))?;
            ensure_pending(&request, "approved").map_err(abort)?;

            for proposed in proposal {
                let current: Option<InventoryUnit> = store::tx_read(inventory, proposed.id)?;
                let mut unit = match current {
                    Some(unit)
                        if unit.status == UnitStatus::Available
                            && unit.blood_group == request.blood_group =>
                    {
                        unit
                    }
                    _ => {
                        return Err(abort(ServiceError::Conflict(format!(
                            "unit {} no longer available",
                            proposed.id
                        ))));
                    }
                };
                unit.status = UnitStatus::Used;
                store::tx_write(inventory, unit.id, &unit)?;
            }

            let now = TimeStamp::new();
            request.status = RequestStatus::Approved;
            request.approved_by = Some(admin_id);
            request.approved_at = Some(now);
            request.admin_notes = Some(notes.unwrap_or_default().to_string());
            request.allocated_units = proposal.iter().map(|u| u.id).collect();
            request.updated_at = now;
            store::tx_write(requests, request_id, &request)?;
            Ok(request)
        })
    }

    // Runs `apply` against the stored request inside a transaction and persists the result.
    fn transition<F>(&self, request_id: u64, apply: F) -> Result<BloodRequest, ServiceError>
    where
        F: Fn(&mut BloodRequest) -> Result<(), ServiceError>,
    {
        let outcome: TransactionResult<BloodRequest, ServiceError> =
            self.store.requests.transaction(|requests| {
                let mut request: BloodRequest = store::tx_read(requests, request_id)?
                    .ok_or_else(|| abort(ServiceError::not_found("request", request_id)))?;
                apply(&mut request).map_err(abort)?;
                request.updated_at = TimeStamp::new();
                store::tx_write(requests, request_id, &request)?;
                Ok(request)
            });
        Ok(outcome?)
    }

    /// Reject a pending request. No inventory is touched.
    pub fn reject(
        &self,
        request_id: u64,
        admin_id: u64,
        notes: Option<String>,
    ) -> Result<BloodRequest, ServiceError> {
        let notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_REJECTION_NOTE.to_string());

        let request = self.transition(request_id, |request| {
            ensure_pending(request, "rejected")?;
            request.status = RequestStatus::Rejected;
            request.approved_by = Some(admin_id);
            request.admin_notes = Some(notes.clone());
            Ok(())
        })?;

        tracing::info!(request_id, admin_id, "blood request rejected");
        Ok(request)
    }

    /// Withdraw a pending request on behalf of its own recipient.
    ///
    /// The record is kept with status `cancelled` rather than deleted.
    pub fn cancel(&self, request_id: u64, requester_id: u64) -> Result<BloodRequest, ServiceError> {
        let request = self.transition(request_id, |request| {
            if request.recipient_id != requester_id {
                return Err(ServiceError::Forbidden(
                    "You can only cancel your own requests".into(),
                ));
            }
            ensure_pending(request, "cancelled")?;
            request.status = RequestStatus::Cancelled;
            Ok(())
        })?;

        tracing::info!(request_id, requester_id, "blood request cancelled");
        Ok(request)
    }

    /// Record that the units of an approved request were delivered.
    pub fn fulfill(&self, request_id: u64, admin_id: u64) -> Result<BloodRequest, ServiceError> {
        let request = self.transition(request_id, |request| {
            if request.status != RequestStatus::Approved {
                return Err(ServiceError::InvalidState(format!(
                    "Only approved requests can be fulfilled. Current status: {:?}",
                    request.status
                )));
            }
            request.status = RequestStatus::Fulfilled;
            Ok(())
        })?;

        tracing::info!(request_id, admin_id, "blood request fulfilled");
        Ok(request)
    }
}
