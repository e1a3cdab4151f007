//! Blood unit intake, listing, status maintenance and stock statistics
use super::error::{FieldErrors, ServiceError};
use super::models::{DonorProfile, InventoryUnit};
use super::policy::{self, Policy, StockLevel};
use super::store::{self, Store, abort};
use super::types::{BloodGroup, TimeStamp, UnitStatus};
use chrono::NaiveDate;
use serde::Serialize;
use sled::Transactional;
use sled::transaction::TransactionResult;

const MAX_STORAGE_LOCATION: usize = 100;

// Used for unit intake. Validated before any write happens.
#[derive(Debug, Clone, Default)]
pub struct UnitIntake {
    blood_group: Option<BloodGroup>,
    donation_date: Option<NaiveDate>,
    expiration_date: Option<NaiveDate>,
    donor_id: Option<u64>,
    storage_location: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UnitUpdate {
    pub status: Option<UnitStatus>,
    pub storage_location: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    pub blood_group: Option<BloodGroup>,
    pub status: Option<UnitStatus>,
    pub expiring_soon: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DonorContact {
    pub full_name: String,
    pub phone: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UnitView {
    #[serde(flatten)]
    pub unit: InventoryUnit,
    pub donor: Option<DonorContact>,
    pub expiring_soon: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StockStat {
    pub blood_group: BloodGroup,
    pub available_units: usize,
    pub status: StockLevel,
}

impl UnitIntake {
    /// Construct a new intake form
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_blood_group(mut self, group: BloodGroup) -> Self {
        self.blood_group = Some(group);
        self
    }
    pub fn set_donation_date(mut self, date: NaiveDate) -> Self {
        self.donation_date = Some(date);
        self
    }
    pub fn set_expiration_date(mut self, date: NaiveDate) -> Self {
        self.expiration_date = Some(date);
        self
    }
    pub fn set_donor(mut self, donor_id: u64) -> Self {
        self.donor_id = Some(donor_id);
        self
    }
    pub fn set_storage_location(mut self, location: &str) -> Self {
        self.storage_location = Some(location.to_string());
        self
    }

    // Checks fields and fills in defaults, returns the unit to store under `id`.
    fn finalise(&self, policy: &Policy, today: NaiveDate, id: u64) -> Result<InventoryUnit, ServiceError> {
        let mut errors = FieldErrors::new();
        errors.check(self.blood_group.is_some(), "blood_group", "Blood group is required");

        let location = self.storage_location.as_deref().unwrap_or("").trim();
        errors.check(!location.is_empty(), "storage_location", "Storage location is required");
        errors.check(
            location.chars().count() <= MAX_STORAGE_LOCATION,
            "storage_location",
            "Storage location must be between 1-100 characters",
        );
        errors.check(
            self.donor_id.is_none_or(|id| id > 0),
            "donor_id",
            "Donor ID must be a positive integer",
        );

        let donation_date = self.donation_date.unwrap_or(today);
        let expiration_date = self
            .expiration_date
            .unwrap_or_else(|| policy.compute_expiration(donation_date));
        errors.check(
            expiration_date >= donation_date,
            "expiration_date",
            "Expiration date cannot precede donation date",
        );
        errors.finish()?;

        let Some(blood_group) = self.blood_group else {
            return Err(ServiceError::validation("blood_group", "Blood group is required"));
        };

        Ok(InventoryUnit {
            id,
            blood_group,
            donation_date: donation_date.into(),
            expiration_date: expiration_date.into(),
            status: UnitStatus::Available,
            donor_id: self.donor_id,
            storage_location: location.to_string(),
            created_at: TimeStamp::new(),
        })
    }
}

impl UnitUpdate {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        if let Some(location) = &self.storage_location {
            let len = location.trim().chars().count();
            errors.check(
                (1..=MAX_STORAGE_LOCATION).contains(&len),
                "storage_location",
                "Storage location must be between 1-100 characters",
            );
        }
        errors.finish()
    }
}

#[derive(Clone)]
pub struct InventoryService {
    store: Store,
    policy: Policy,
}

impl InventoryService {
    pub fn new(store: Store, policy: Policy) -> Self {
        Self { store, policy }
    }

    /// Record a donated unit. When a donor is linked, the donor's last
    /// donation date moves to the unit's donation date in the same commit.
    pub fn add_unit(&self, intake: UnitIntake) -> Result<InventoryUnit, ServiceError> {
        let id = self.store.next_id()?;
        let unit = intake.finalise(&self.policy, policy::today(), id)?;

        let outcome: TransactionResult<(), ServiceError> = (&self.store.inventory, &self.store.donors)
            .transaction(|(inventory, donors)| {
                if let Some(donor_id) = unit.donor_id {
                    let mut donor: DonorProfile = store::tx_read(donors, donor_id)?
                        .ok_or_else(|| abort(ServiceError::not_found("donor", donor_id)))?;
                    donor.last_donation_date = Some(unit.donation_date);
                    store::tx_write(donors, donor_id, &donor)?;
                }
                store::tx_write(inventory, unit.id, &unit)?;
                Ok(())
            });
        outcome?;

        tracing::info!(
            unit_id = unit.id,
            blood_group = %unit.blood_group,
            donor_id = ?unit.donor_id,
            expiration_date = %unit.expiration_date,
            "blood unit added"
        );
        Ok(unit)
    }

    pub fn get(&self, unit_id: u64) -> Result<InventoryUnit, ServiceError> {
        self.store.unit(unit_id)
    }

    fn view(&self, unit: InventoryUnit, today: NaiveDate) -> Result<UnitView, ServiceError> {
        let donor = match unit.donor_id {
            Some(donor_id) => self.store.find_donor(donor_id)?.map(|d| DonorContact {
                full_name: d.full_name,
                phone: d.phone,
            }),
            None => None,
        };
        Ok(UnitView {
            expiring_soon: self.policy.is_expiring_soon(unit.expiration_date.date(), today),
            unit,
            donor,
        })
    }

    /// Units matching `filter`, soonest expiration first.
    pub fn list(&self, filter: &UnitFilter) -> Result<Vec<UnitView>, ServiceError> {
        let today = policy::today();
        let mut units: Vec<InventoryUnit> = self
            .store
            .units()?
            .into_iter()
            .filter(|u| filter.blood_group.is_none_or(|g| g == u.blood_group))
            .filter(|u| filter.status.is_none_or(|s| s == u.status))
            .filter(|u| !filter.expiring_soon || self.policy.is_expiring_soon(u.expiration_date.date(), today))
            .collect();
        units.sort_by_key(|u| (u.expiration_date, u.id));

        units.into_iter().map(|u| self.view(u, today)).collect()
    }

    /// Available units inside the expiring-soon window.
    pub fn expiring(&self) -> Result<Vec<UnitView>, ServiceError> {
        self.list(&UnitFilter {
            status: Some(UnitStatus::Available),
            expiring_soon: true,
            ..UnitFilter::default()
        })
    }

    pub fn update(&self, unit_id: u64, update: UnitUpdate) -> Result<InventoryUnit, ServiceError> {
        update.validate()?;

        let outcome: TransactionResult<InventoryUnit, ServiceError> =
            self.store.inventory.transaction(|inventory| {
                let mut unit: InventoryUnit = store::tx_read(inventory, unit_id)?
                    .ok_or_else(|| abort(ServiceError::not_found("blood unit", unit_id)))?;
                if let Some(status) = update.status {
                    unit.status = status;
                }
                if let Some(location) = &update.storage_location {
                    unit.storage_location = location.trim().to_string();
                }
                store::tx_write(inventory, unit_id, &unit)?;
                Ok(unit)
            });
        let unit = outcome?;

        tracing::info!(unit_id, status = ?unit.status, "blood unit updated");
        Ok(unit)
    }

    pub fn delete(&self, unit_id: u64) -> Result<(), ServiceError> {
        if self.store.inventory.remove(store::key(unit_id))?.is_none() {
            return Err(ServiceError::not_found("blood unit", unit_id));
        }
        tracing::info!(unit_id, "blood unit deleted");
        Ok(())
    }

    /// Available-unit counts for every blood group.
    pub fn stock_stats(&self) -> Result<Vec<StockStat>, ServiceError> {
        let units = self.store.units()?;
        Ok(BloodGroup::ALL
            .into_iter()
            .map(|group| {
                let available_units = units
                    .iter()
                    .filter(|u| u.blood_group == group && u.status == UnitStatus::Available)
                    .count();
                StockStat {
                    blood_group: group,
                    available_units,
                    status: self.policy.stock_level(available_units),
                }
            })
            .collect())
    }

    /// Mark every available unit past its expiration as expired. Returns how many changed.
    pub fn expire_stale(&self, today: NaiveDate) -> Result<usize, ServiceError> {
        let stale: Vec<u64> = self
            .store
            .units()?
            .into_iter()
            .filter(|u| u.status == UnitStatus::Available)
            .filter(|u| self.policy.is_expired(u.expiration_date.date(), today))
            .map(|u| u.id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let outcome: TransactionResult<usize, ServiceError> =
            self.store.inventory.transaction(|inventory| {
                let mut changed = 0;
                for &unit_id in &stale {
                    // may have been used or deleted since the scan
                    let Some(mut unit) = store::tx_read::<InventoryUnit>(inventory, unit_id)? else {
                        continue;
                    };
                    if unit.status != UnitStatus::Available {
                        continue;
                    }
                    unit.status = UnitStatus::Expired;
                    store::tx_write(inventory, unit_id, &unit)?;
                    changed += 1;
                }
                Ok(changed)
            });
        let changed = outcome?;

        tracing::info!(changed, %today, "expired stale blood units");
        Ok(changed)
    }
}
