//! Selection of inventory units for a blood request.
//!
//! The allocator only proposes; committing a proposal (marking units used) is
//! the lifecycle's job and happens inside a transaction that re-checks every
//! proposed unit.
use super::error::ServiceError;
use super::models::InventoryUnit;
use super::store::Store;
use super::types::{BloodGroup, UnitStatus};
use std::collections::HashSet;

/// Pick up to `quantity` available units of `group`, soonest expiration first.
///
/// Units expiring on the same day are taken in creation (id) order, so a given
/// snapshot always yields the same proposal. The result may be shorter than
/// `quantity`; deciding what that means is up to the caller.
pub fn propose(units: &[InventoryUnit], group: BloodGroup, quantity: usize) -> Vec<InventoryUnit> {
    let mut candidates: Vec<&InventoryUnit> = units
        .iter()
        .filter(|unit| unit.blood_group == group && unit.status == UnitStatus::Available)
        .collect();
    candidates.sort_by_key(|unit| (unit.expiration_date, unit.id));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|unit| seen.insert(unit.id))
        .take(quantity)
        .cloned()
        .collect()
}

/// Propose from the store's current inventory.
pub fn propose_from_store(
    store: &Store,
    group: BloodGroup,
    quantity: usize,
) -> Result<Vec<InventoryUnit>, ServiceError> {
    let units = store.units()?;
    let proposal = propose(&units, group, quantity);
    tracing::debug!(
        blood_group = %group,
        requested = quantity,
        proposed = proposal.len(),
        "allocation proposal"
    );
    Ok(proposal)
}
