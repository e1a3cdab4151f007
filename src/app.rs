//! Route-level facade over the services.
//!
//! Each method corresponds to one REST route: it resolves the bearer token,
//! checks the caller's role, runs the service call and wraps the outcome in an
//! [`ApiResponse`]. Transport and routing are left to the embedding server.
use super::api::ApiResponse;
use super::auth::{AuthService, LoginOutcome, Profile, Registration};
use super::config::AppConfig;
use super::donors::{DonorFilter, DonorService, DonorUpdate, DonorView};
use super::error::ServiceError;
use super::inventory::{InventoryService, StockStat, UnitFilter, UnitIntake, UnitUpdate, UnitView};
use super::models::{Account, BloodRequest, InventoryUnit};
use super::policy;
use super::requests::{NewRequest, RequestFilter, RequestService, RequestView};
use super::store::Store;
use super::types::Role;
use chrono::NaiveDate;
use std::sync::Arc;

const BEARER_PREFIX: &str = "Bearer ";

fn bearer_token(authorization: Option<&str>) -> Result<&str, ServiceError> {
    authorization
        .and_then(|header| header.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("Authentication required. No token provided.".into()))
}

fn require_role(account: &Account, roles: &[Role]) -> Result<(), ServiceError> {
    if roles.contains(&account.role) {
        return Ok(());
    }
    tracing::warn!(account_id = account.id, role = ?account.role, "role check failed");
    Err(ServiceError::Forbidden(
        "Access denied. Insufficient permissions.".into(),
    ))
}

// donors may act on their own record only, admins on any
fn require_self_or_admin(account: &Account, donor_id: u64) -> Result<(), ServiceError> {
    match account.role {
        Role::Admin => Ok(()),
        Role::Donor if account.id == donor_id => Ok(()),
        _ => Err(ServiceError::Forbidden(
            "You can only access your own donor profile".into(),
        )),
    }
}

#[derive(Clone)]
pub struct BloodBank {
    store: Store,
    config: AppConfig,
    auth: AuthService,
    donors: DonorService,
    inventory: InventoryService,
    requests: RequestService,
}

impl BloodBank {
    /// Open the database at `config.db_path`.
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        let db = sled::open(&config.db_path)?;
        tracing::info!(path = %config.db_path.display(), "blood bank database opened");
        Ok(Self::with_db(Arc::new(db), config)?)
    }

    pub fn with_db(instance: Arc<sled::Db>, config: AppConfig) -> Result<Self, ServiceError> {
        let store = Store::open(instance)?;
        let policy = config.policy.clone();
        Ok(Self {
            auth: AuthService::new(store.clone(), policy.clone(), config.session_ttl_minutes),
            donors: DonorService::new(store.clone(), policy.clone()),
            inventory: InventoryService::new(store.clone(), policy.clone()),
            requests: RequestService::new(store.clone(), policy),
            store,
            config,
        })
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }
    pub fn donors(&self) -> &DonorService {
        &self.donors
    }
    pub fn inventory(&self) -> &InventoryService {
        &self.inventory
    }
    pub fn requests(&self) -> &RequestService {
        &self.requests
    }

    pub fn flush(&self) -> Result<(), ServiceError> {
        self.store.flush()
    }

    fn caller(&self, authorization: Option<&str>, roles: &[Role]) -> Result<Account, ServiceError> {
        let account = self.auth.authenticate(bearer_token(authorization)?)?;
        require_role(&account, roles)?;
        Ok(account)
    }

    fn respond<T>(&self, result: Result<T, ServiceError>) -> ApiResponse<T> {
        result.map_or_else(
            |err| ApiResponse::failure(err, self.config.expose_error_detail),
            ApiResponse::ok,
        )
    }

    fn respond_list<T>(&self, result: Result<Vec<T>, ServiceError>) -> ApiResponse<Vec<T>> {
        result.map_or_else(
            |err| ApiResponse::failure(err, self.config.expose_error_detail),
            ApiResponse::list,
        )
    }

    fn respond_created<T>(&self, result: Result<T, ServiceError>, message: &str) -> ApiResponse<T> {
        result.map_or_else(
            |err| ApiResponse::failure(err, self.config.expose_error_detail),
            |data| ApiResponse::created(data, message),
        )
    }

    // POST /auth/register
    pub fn register(&self, registration: Registration) -> ApiResponse<Account> {
        self.respond_created(self.auth.register(registration), "User registered successfully")
    }

    // POST /auth/login
    pub fn login(&self, email: &str, password: &str) -> ApiResponse<LoginOutcome> {
        self.respond(self.auth.login(email, password))
            .with_message("Login successful")
    }

    // GET /auth/me
    pub fn me(&self, authorization: Option<&str>) -> ApiResponse<Profile> {
        let result = self
            .caller(authorization, &[Role::Donor, Role::Recipient, Role::Admin])
            .and_then(|account| self.auth.me(account.id));
        self.respond(result)
    }

    // GET /auth/verify/:token
    pub fn verify_email(&self, token: &str) -> ApiResponse<Account> {
        self.respond(self.auth.verify_email(token))
    }

    // POST /auth/logout
    pub fn logout(&self, authorization: Option<&str>) -> ApiResponse<()> {
        let result = bearer_token(authorization).and_then(|token| self.auth.logout(token));
        self.respond(result).with_message("Logged out")
    }

    // DELETE /auth/accounts/:id
    pub fn delete_account(&self, authorization: Option<&str>, account_id: u64) -> ApiResponse<()> {
        let result = self
            .caller(authorization, &[Role::Donor, Role::Recipient, Role::Admin])
            .and_then(|caller| {
                if caller.role != Role::Admin && caller.id != account_id {
                    return Err(ServiceError::Forbidden(
                        "You can only delete your own account".into(),
                    ));
                }
                self.auth.delete_account(account_id)
            });
        self.respond(result)
    }

    // GET /donors/search
    pub fn search_donors(&self, authorization: Option<&str>, filter: &DonorFilter) -> ApiResponse<Vec<DonorView>> {
        let result = self
            .caller(authorization, &[Role::Recipient, Role::Admin])
            .and_then(|_| self.donors.search(filter));
        self.respond_list(result)
    }

    // GET /donors/all
    pub fn all_donors(&self, authorization: Option<&str>, filter: &DonorFilter) -> ApiResponse<Vec<DonorView>> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|_| self.donors.list_all(filter));
        self.respond_list(result)
    }

    // GET /donors/eligible
    pub fn eligible_donors(&self, authorization: Option<&str>) -> ApiResponse<Vec<DonorView>> {
        let result = self
            .caller(authorization, &[Role::Recipient, Role::Admin])
            .and_then(|_| self.donors.eligible());
        self.respond_list(result)
    }

    // GET /donors/:id
    pub fn donor(&self, authorization: Option<&str>, donor_id: u64) -> ApiResponse<DonorView> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|_| self.donors.get(donor_id));
        self.respond(result)
    }

    // PUT /donors/:id
    pub fn update_donor(
        &self,
        authorization: Option<&str>,
        donor_id: u64,
        update: DonorUpdate,
    ) -> ApiResponse<DonorView> {
        let result = self
            .caller(authorization, &[Role::Donor, Role::Admin])
            .and_then(|caller| {
                require_self_or_admin(&caller, donor_id)?;
                if caller.role != Role::Admin && update.last_donation_date.is_some() {
                    return Err(ServiceError::Forbidden(
                        "Only admins can change the last donation date".into(),
                    ));
                }
                self.donors.update_profile(donor_id, update)
            });
        self.respond(result).with_message("Profile updated")
    }

    // PUT /donors/:id/donation-date
    pub fn set_donation_date(
        &self,
        authorization: Option<&str>,
        donor_id: u64,
        date: Option<NaiveDate>,
    ) -> ApiResponse<DonorView> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|_| self.donors.set_donation_date(donor_id, date));
        self.respond(result)
    }

    // GET /donors/:id/history
    pub fn donation_history(&self, authorization: Option<&str>, donor_id: u64) -> ApiResponse<Vec<InventoryUnit>> {
        let result = self
            .caller(authorization, &[Role::Donor, Role::Admin])
            .and_then(|caller| {
                require_self_or_admin(&caller, donor_id)?;
                self.donors.donation_history(donor_id)
            });
        self.respond_list(result)
    }

    // GET /inventory
    pub fn list_inventory(&self, authorization: Option<&str>, filter: &UnitFilter) -> ApiResponse<Vec<UnitView>> {
        let result = self
            .caller(authorization, &[Role::Donor, Role::Recipient, Role::Admin])
            .and_then(|_| self.inventory.list(filter));
        self.respond_list(result)
    }

    // GET /inventory/expiring
    pub fn expiring_units(&self, authorization: Option<&str>) -> ApiResponse<Vec<UnitView>> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|_| self.inventory.expiring());
        self.respond_list(result)
    }

    // GET /inventory/stats
    pub fn stock_stats(&self, authorization: Option<&str>) -> ApiResponse<Vec<StockStat>> {
        let result = self
            .caller(authorization, &[Role::Donor, Role::Recipient, Role::Admin])
            .and_then(|_| self.inventory.stock_stats());
        self.respond(result)
    }

    // POST /inventory
    pub fn add_unit(&self, authorization: Option<&str>, intake: UnitIntake) -> ApiResponse<InventoryUnit> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|_| self.inventory.add_unit(intake));
        self.respond_created(result, "Blood unit added to inventory")
    }

    // PUT /inventory/:id
    pub fn update_unit(
        &self,
        authorization: Option<&str>,
        unit_id: u64,
        update: UnitUpdate,
    ) -> ApiResponse<InventoryUnit> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|_| self.inventory.update(unit_id, update));
        self.respond(result)
    }

    // DELETE /inventory/:id
    pub fn delete_unit(&self, authorization: Option<&str>, unit_id: u64) -> ApiResponse<()> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|_| self.inventory.delete(unit_id));
        self.respond(result).with_message("Blood unit removed")
    }

    // POST /inventory/expire
    pub fn expire_stale_units(&self, authorization: Option<&str>) -> ApiResponse<usize> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|_| self.inventory.expire_stale(policy::today()));
        self.respond(result)
    }

    // GET /requests
    pub fn list_requests(&self, authorization: Option<&str>, filter: &RequestFilter) -> ApiResponse<Vec<RequestView>> {
        let result = self
            .caller(authorization, &[Role::Recipient, Role::Admin])
            .and_then(|caller| {
                let mut filter = filter.clone();
                if caller.role == Role::Recipient {
                    filter.recipient_id = Some(caller.id);
                }
                self.requests.list_views(&filter)
            });
        self.respond_list(result)
    }

    // GET /requests/:id
    pub fn request(&self, authorization: Option<&str>, request_id: u64) -> ApiResponse<BloodRequest> {
        let result = self
            .caller(authorization, &[Role::Recipient, Role::Admin])
            .and_then(|caller| {
                let request = self.requests.get(request_id)?;
                if caller.role == Role::Recipient && request.recipient_id != caller.id {
                    return Err(ServiceError::Forbidden(
                        "You can only view your own requests".into(),
                    ));
                }
                Ok(request)
            });
        self.respond(result)
    }

    // POST /requests
    pub fn create_request(&self, authorization: Option<&str>, new: NewRequest) -> ApiResponse<BloodRequest> {
        let result = self
            .caller(authorization, &[Role::Recipient])
            .and_then(|caller| self.requests.create(caller.id, new));
        self.respond_created(result, "Blood request submitted")
    }

    // PUT /requests/:id/approve
    pub fn approve_request(
        &self,
        authorization: Option<&str>,
        request_id: u64,
        notes: Option<String>,
    ) -> ApiResponse<BloodRequest> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|admin| self.requests.approve(request_id, admin.id, notes));
        self.respond(result).with_message("Request approved and units allocated")
    }

    // PUT /requests/:id/reject
    pub fn reject_request(
        &self,
        authorization: Option<&str>,
        request_id: u64,
        notes: Option<String>,
    ) -> ApiResponse<BloodRequest> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|admin| self.requests.reject(request_id, admin.id, notes));
        self.respond(result).with_message("Request rejected")
    }

    // PUT /requests/:id/fulfill
    pub fn fulfill_request(&self, authorization: Option<&str>, request_id: u64) -> ApiResponse<BloodRequest> {
        let result = self
            .caller(authorization, &[Role::Admin])
            .and_then(|admin| self.requests.fulfill(request_id, admin.id));
        self.respond(result).with_message("Request fulfilled")
    }

    // DELETE /requests/:id
    pub fn cancel_request(&self, authorization: Option<&str>, request_id: u64) -> ApiResponse<BloodRequest> {
        let result = self
            .caller(authorization, &[Role::Recipient])
            .and_then(|caller| self.requests.cancel(request_id, caller.id));
        self.respond(result).with_message("Request cancelled")
    }
}
