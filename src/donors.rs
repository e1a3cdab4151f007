//! Donor profiles: search, eligibility views and profile maintenance
use super::error::{FieldErrors, ServiceError};
use super::models::{DonorProfile, InventoryUnit};
use super::policy::{self, Policy};
use super::store::{self, Store, abort};
use super::types::{BloodGroup, CalendarDate, Gender, MedicalHistory, TimeStamp};
use chrono::NaiveDate;
use serde::Serialize;
use sled::transaction::TransactionResult;

const MIN_AGE: u8 = 18;
const MAX_AGE: u8 = 65;

/// Profile details supplied when a donor registers.
#[derive(Debug, Clone)]
pub struct NewDonorProfile {
    pub full_name: String,
    pub age: u8,
    pub gender: Gender,
    pub blood_group: BloodGroup,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub medical_history: Option<serde_json::Value>,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct DonorUpdate {
    pub full_name: Option<String>,
    pub age: Option<u8>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub medical_history: Option<serde_json::Value>,
    pub last_donation_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct DonorFilter {
    pub blood_group: Option<BloodGroup>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub eligible_only: bool,
    /// Matches name or phone.
    pub search: Option<String>,
}

/// A donor as the API shows it, with eligibility computed for today.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DonorView {
    #[serde(flatten)]
    pub profile: DonorProfile,
    pub email: Option<String>,
    pub is_verified: bool,
    pub is_eligible: bool,
    pub days_until_eligible: u32,
}

fn check_name(errors: &mut FieldErrors, name: &str) {
    let len = name.trim().chars().count();
    errors.check(
        (2..=255).contains(&len),
        "full_name",
        "Name must be between 2 and 255 characters",
    );
}

fn check_age(errors: &mut FieldErrors, age: u8) {
    errors.check(age >= MIN_AGE, "age", "Donor must be at least 18 years old");
    errors.check(age <= MAX_AGE, "age", "Donor must be under 65 years old");
}

fn check_phone(errors: &mut FieldErrors, phone: &str) {
    let phone = phone.trim();
    let valid = !phone.is_empty()
        && phone.len() <= 15
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '));
    errors.check(valid, "phone", "Please provide a valid phone number");
}

fn check_required(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    let value = value.trim();
    if value.is_empty() {
        errors.push(field, &format!("{field} is required"));
    } else if value.chars().count() > max {
        errors.push(field, &format!("{field} must be at most {max} characters"));
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

impl NewDonorProfile {
    pub fn validate(&self, errors: &mut FieldErrors) {
        check_name(errors, &self.full_name);
        check_age(errors, self.age);
        check_phone(errors, &self.phone);
        check_required(errors, "address", &self.address, 1000);
        check_required(errors, "city", &self.city, 100);
        check_required(errors, "state", &self.state, 100);
    }

    pub(crate) fn into_record(self, id: u64) -> DonorProfile {
        DonorProfile {
            id,
            full_name: self.full_name.trim().to_string(),
            age: self.age,
            gender: self.gender,
            blood_group: self.blood_group,
            phone: self.phone.trim().to_string(),
            address: self.address.trim().to_string(),
            city: self.city.trim().to_string(),
            state: self.state.trim().to_string(),
            last_donation_date: None,
            medical_history: self
                .medical_history
                .map(MedicalHistory)
                .unwrap_or_else(MedicalHistory::empty),
            created_at: TimeStamp::new(),
        }
    }
}

impl DonorUpdate {
    pub fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        if let Some(name) = &self.full_name {
            check_name(&mut errors, name);
        }
        if let Some(age) = self.age {
            check_age(&mut errors, age);
        }
        if let Some(phone) = &self.phone {
            check_phone(&mut errors, phone);
        }
        if let Some(address) = &self.address {
            check_required(&mut errors, "address", address, 1000);
        }
        if let Some(city) = &self.city {
            check_required(&mut errors, "city", city, 100);
        }
        if let Some(state) = &self.state {
            check_required(&mut errors, "state", state, 100);
        }
        errors.finish()
    }

    fn apply(&self, donor: &mut DonorProfile) {
        if let Some(name) = &self.full_name {
            donor.full_name = name.trim().to_string();
        }
        if let Some(age) = self.age {
            donor.age = age;
        }
        if let Some(phone) = &self.phone {
            donor.phone = phone.trim().to_string();
        }
        if let Some(address) = &self.address {
            donor.address = address.trim().to_string();
        }
        if let Some(city) = &self.city {
            donor.city = city.trim().to_string();
        }
        if let Some(state) = &self.state {
            donor.state = state.trim().to_string();
        }
        if let Some(history) = &self.medical_history {
            donor.medical_history = MedicalHistory(history.clone());
        }
        if let Some(date) = self.last_donation_date {
            donor.last_donation_date = Some(date.into());
        }
    }
}

impl DonorFilter {
    fn matches(&self, donor: &DonorProfile, policy: &Policy, today: NaiveDate) -> bool {
        if self.blood_group.is_some_and(|group| group != donor.blood_group) {
            return false;
        }
        if let Some(city) = &self.city {
            if !contains_ignore_case(&donor.city, city) {
                return false;
            }
        }
        if let Some(state) = &self.state {
            if !contains_ignore_case(&donor.state, state) {
                return false;
            }
        }
        if let Some(text) = &self.search {
            if !contains_ignore_case(&donor.full_name, text) && !contains_ignore_case(&donor.phone, text) {
                return false;
            }
        }
        if self.eligible_only {
            let last = donor.last_donation_date.map(|d| d.date());
            return policy.is_eligible(last, today);
        }
        true
    }
}

#[derive(Clone)]
pub struct DonorService {
    store: Store,
    policy: Policy,
}

impl DonorService {
    pub fn new(store: Store, policy: Policy) -> Self {
        Self { store, policy }
    }

    fn view(&self, profile: DonorProfile, today: NaiveDate) -> Result<DonorView, ServiceError> {
        let account = self.store.find_account(profile.id)?;
        let last = profile.last_donation_date.map(|d| d.date());
        Ok(DonorView {
            email: account.as_ref().map(|a| a.email.clone()),
            is_verified: account.is_some_and(|a| a.is_verified),
            is_eligible: self.policy.is_eligible(last, today),
            days_until_eligible: self.policy.days_until_eligible(last, today),
            profile,
        })
    }

    pub fn get(&self, donor_id: u64) -> Result<DonorView, ServiceError> {
        let profile = self.store.donor(donor_id)?;
        self.view(profile, policy::today())
    }

    /// Donors matching `filter`, newest registrations first.
    ///
    /// Free-text matching over names and phone numbers is left to
    /// [`DonorService::list_all`]; `filter.search` is ignored here.
    pub fn search(&self, filter: &DonorFilter) -> Result<Vec<DonorView>, ServiceError> {
        self.filtered(&DonorFilter {
            search: None,
            ..filter.clone()
        })
    }

    /// Every donor matching `filter`, free text included. Admin listing.
    pub fn list_all(&self, filter: &DonorFilter) -> Result<Vec<DonorView>, ServiceError> {
        self.filtered(filter)
    }

    fn filtered(&self, filter: &DonorFilter) -> Result<Vec<DonorView>, ServiceError> {
        let today = policy::today();
        self.store
            .donors()?
            .into_iter()
            .rev()
            .filter(|donor| filter.matches(donor, &self.policy, today))
            .map(|donor| self.view(donor, today))
            .collect()
    }

    pub fn eligible(&self) -> Result<Vec<DonorView>, ServiceError> {
        self.filtered(&DonorFilter {
            eligible_only: true,
            ..DonorFilter::default()
        })
    }

    pub fn update_profile(&self, donor_id: u64, update: DonorUpdate) -> Result<DonorView, ServiceError> {
        update.validate()?;

        let outcome: TransactionResult<DonorProfile, ServiceError> =
            self.store.donors.transaction(|donors| {
                let mut donor: DonorProfile = store::tx_read(donors, donor_id)?
                    .ok_or_else(|| abort(ServiceError::not_found("donor", donor_id)))?;
                update.apply(&mut donor);
                store::tx_write(donors, donor_id, &donor)?;
                Ok(donor)
            });
        let donor = outcome?;

        tracing::info!(donor_id, "donor profile updated");
        self.view(donor, policy::today())
    }

    /// Manually set or clear the date eligibility is computed from.
    pub fn set_donation_date(
        &self,
        donor_id: u64,
        date: Option<NaiveDate>,
    ) -> Result<DonorView, ServiceError> {
        let outcome: TransactionResult<DonorProfile, ServiceError> =
            self.store.donors.transaction(|donors| {
                let mut donor: DonorProfile = store::tx_read(donors, donor_id)?
                    .ok_or_else(|| abort(ServiceError::not_found("donor", donor_id)))?;
                donor.last_donation_date = date.map(CalendarDate::from);
                store::tx_write(donors, donor_id, &donor)?;
                Ok(donor)
            });
        let donor = outcome?;

        tracing::info!(donor_id, last_donation_date = ?date, "donation date overridden");
        self.view(donor, policy::today())
    }

    /// Units given by this donor, most recent donation first.
    pub fn donation_history(&self, donor_id: u64) -> Result<Vec<InventoryUnit>, ServiceError> {
        self.store.donor(donor_id)?;

        let mut units: Vec<InventoryUnit> = self
            .store
            .units()?
            .into_iter()
            .filter(|unit| unit.donor_id == Some(donor_id))
            .collect();
        units.sort_by(|a, b| (b.donation_date, b.id).cmp(&(a.donation_date, a.id)));
        Ok(units)
    }
}
