//! Accounts, registration, bearer sessions and account deletion
use super::donors::{DonorView, NewDonorProfile};
use super::error::{FieldErrors, ServiceError};
use super::models::{Account, BloodRequest, Credential, DonorProfile, InventoryUnit, Session};
use super::policy::{self, Policy};
use super::store::{self, Store, abort};
use super::types::{Role, TimeStamp};
use super::utils;
use serde::Serialize;
use sled::Transactional;
use sled::transaction::TransactionResult;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub role: Role,
    /// Required when `role` is donor, ignored otherwise.
    pub profile: Option<NewDonorProfile>,
}

#[derive(Serialize, Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub user: Account,
}

/// The caller's own account, with the donor profile for donors.
#[derive(Serialize, Debug, Clone)]
pub struct Profile {
    #[serde(flatten)]
    pub account: Account,
    pub donor_profile: Option<DonorView>,
}

fn normalise_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

impl Registration {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.check(
            looks_like_email(&normalise_email(&self.email)),
            "email",
            "Please provide a valid email address",
        );
        errors.check(
            self.password.chars().count() >= MIN_PASSWORD_LEN,
            "password",
            "Password must be at least 6 characters",
        );
        if self.role == Role::Donor {
            match &self.profile {
                Some(profile) => profile.validate(&mut errors),
                None => errors.push("profile", "Donor registration requires a donor profile"),
            }
        }
        errors.finish()
    }
}

#[derive(Clone)]
pub struct AuthService {
    store: Store,
    policy: Policy,
    session_ttl: chrono::Duration,
}

impl AuthService {
    pub fn new(store: Store, policy: Policy, session_ttl_minutes: i64) -> Self {
        Self {
            store,
            policy,
            session_ttl: chrono::Duration::minutes(session_ttl_minutes),
        }
    }

    /// Create an account, and for donors their profile, in one commit.
    pub fn register(&self, registration: Registration) -> Result<Account, ServiceError> {
        registration.validate()?;

        let id = self.store.next_id()?;
        let email = normalise_email(&registration.email);
        let salt = utils::new_token("salt")?;
        let account = Account {
            id,
            email: email.clone(),
            credential: Credential {
                digest: utils::credential_digest(&salt, &registration.password),
                salt,
            },
            role: registration.role,
            is_verified: false,
            verification_token: Some(utils::new_verification_token()),
            created_at: TimeStamp::new(),
        };
        let profile: Option<DonorProfile> = match registration.role {
            Role::Donor => registration.profile.map(|p| p.into_record(id)),
            _ => None,
        };

        let outcome: TransactionResult<(), ServiceError> = (
            &self.store.accounts,
            &self.store.account_emails,
            &self.store.donors,
        )
            .transaction(|(accounts, emails, donors)| {
                if emails.get(email.as_bytes())?.is_some() {
                    return Err(abort(ServiceError::Conflict("Email already registered".into())));
                }
                emails.insert(email.as_bytes(), store::key(id))?;
                store::tx_write(accounts, id, &account)?;
                if let Some(profile) = &profile {
                    store::tx_write(donors, id, profile)?;
                }
                Ok(())
            });
        outcome?;

        tracing::info!(account_id = id, role = ?account.role, "account registered");
        Ok(account)
    }

    /// Check credentials and open a bearer session.
    pub fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, ServiceError> {
        let rejected = || ServiceError::Unauthorized("Invalid email or password".into());

        let Some(account) = self.store.account_by_email(&normalise_email(email))? else {
            tracing::warn!("login for unknown email");
            return Err(rejected());
        };
        if utils::credential_digest(&account.credential.salt, password) != account.credential.digest {
            tracing::warn!(account_id = account.id, "login with wrong password");
            return Err(rejected());
        }

        let token = utils::new_token("session")?;
        let session = Session {
            account_id: account.id,
            expires_at: (TimeStamp::new().to_datetime_utc() + self.session_ttl).into(),
        };
        self.store
            .sessions
            .insert(token.as_bytes(), store::encode(&session)?)?;

        tracing::info!(account_id = account.id, "session opened");
        Ok(LoginOutcome { token, user: account })
    }

    /// Resolve a bearer token to its account.
    pub fn authenticate(&self, token: &str) -> Result<Account, ServiceError> {
        let Some(bytes) = self.store.sessions.get(token.as_bytes())? else {
            return Err(ServiceError::Unauthorized("Invalid token.".into()));
        };
        let session: Session = store::decode(&bytes)?;
        if session.expires_at < TimeStamp::new() {
            self.store.sessions.remove(token.as_bytes())?;
            return Err(ServiceError::Unauthorized(
                "Token expired. Please login again.".into(),
            ));
        }
        self.store
            .find_account(session.account_id)?
            .ok_or_else(|| ServiceError::Unauthorized("User not found. Token invalid.".into()))
    }

    pub fn logout(&self, token: &str) -> Result<(), ServiceError> {
        self.store.sessions.remove(token.as_bytes())?;
        Ok(())
    }

    pub fn me(&self, account_id: u64) -> Result<Profile, ServiceError> {
        let account = self.store.account(account_id)?;
        let donor_profile = match account.role {
            Role::Donor => self.store.find_donor(account_id)?.map(|profile| {
                let today = policy::today();
                let last = profile.last_donation_date.map(|d| d.date());
                DonorView {
                    email: Some(account.email.clone()),
                    is_verified: account.is_verified,
                    is_eligible: self.policy.is_eligible(last, today),
                    days_until_eligible: self.policy.days_until_eligible(last, today),
                    profile,
                }
            }),
            _ => None,
        };
        Ok(Profile { account, donor_profile })
    }

    /// Mark the account holding `token` as verified. Tokens are single use.
    pub fn verify_email(&self, token: &str) -> Result<Account, ServiceError> {
        let invalid = || ServiceError::validation("token", "Invalid or expired verification token");
        let account = self
            .store
            .accounts()?
            .into_iter()
            .find(|a| a.verification_token.as_deref() == Some(token))
            .ok_or_else(invalid)?;

        let outcome: TransactionResult<Account, ServiceError> =
            self.store.accounts.transaction(|accounts| {
                let mut current: Account = store::tx_read(accounts, account.id)?
                    .ok_or_else(|| abort(invalid()))?;
                if current.verification_token.as_deref() != Some(token) {
                    return Err(abort(invalid()));
                }
                current.is_verified = true;
                current.verification_token = None;
                store::tx_write(accounts, current.id, &current)?;
                Ok(current)
            });
        let account = outcome?;

        tracing::info!(account_id = account.id, "email verified");
        Ok(account)
    }

    /// Remove an account and everything that hangs off it.
    ///
    /// The donor profile, owned requests and sessions go with it; units the
    /// donor gave lose their donor link; requests it approved keep their
    /// status but lose the approver link.
    pub fn delete_account(&self, account_id: u64) -> Result<(), ServiceError> {
        let account = self.store.account(account_id)?;
        let donated: Vec<u64> = self
            .store
            .units()?
            .into_iter()
            .filter(|u| u.donor_id == Some(account_id))
            .map(|u| u.id)
            .collect();
        let requests: Vec<u64> = self
            .store
            .requests()?
            .into_iter()
            .filter(|r| r.recipient_id == account_id || r.approved_by == Some(account_id))
            .map(|r| r.id)
            .collect();
        let mut sessions = Vec::new();
        for entry in self.store.sessions.iter() {
            let (token, bytes) = entry?;
            let session: Session = store::decode(&bytes)?;
            if session.account_id == account_id {
                sessions.push(token);
            }
        }

        let outcome: TransactionResult<(), ServiceError> = (
            &self.store.accounts,
            &self.store.account_emails,
            &self.store.donors,
            &self.store.inventory,
            &self.store.requests,
            &self.store.sessions,
        )
            .transaction(|(accounts, emails, donors, inventory, requests_tx, sessions_tx)| {
                accounts.remove(store::key(account_id))?;
                emails.remove(account.email.as_bytes())?;
                donors.remove(store::key(account_id))?;

                for &unit_id in &donated {
                    if let Some(mut unit) = store::tx_read::<InventoryUnit>(inventory, unit_id)? {
                        if unit.donor_id == Some(account_id) {
                            unit.donor_id = None;
                            store::tx_write(inventory, unit_id, &unit)?;
                        }
                    }
                }
                for &request_id in &requests {
                    let Some(mut request) = store::tx_read::<BloodRequest>(requests_tx, request_id)? else {
                        continue;
                    };
                    if request.recipient_id == account_id {
                        requests_tx.remove(store::key(request_id))?;
                    } else if request.approved_by == Some(account_id) {
                        request.approved_by = None;
                        store::tx_write(requests_tx, request_id, &request)?;
                    }
                }
                for token in &sessions {
                    sessions_tx.remove(token.clone())?;
                }
                Ok(())
            });
        outcome?;

        tracing::info!(
            account_id,
            units_unlinked = donated.len(),
            requests_touched = requests.len(),
            "account deleted"
        );
        Ok(())
    }
}
