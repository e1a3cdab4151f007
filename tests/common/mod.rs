#![allow(dead_code)]

use blood_bank::auth::Registration;
use blood_bank::donors::NewDonorProfile;
use blood_bank::inventory::{UnitFilter, UnitIntake};
use blood_bank::models::{Account, InventoryUnit};
use blood_bank::policy;
use blood_bank::types::{BloodGroup, Gender, Role};
use blood_bank::{AppConfig, BloodBank};
use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

pub const PASSWORD: &str = "correct-horse";

/// A bank over a fresh database. Keep the `TempDir` alive for the test's duration.
pub fn open_bank() -> anyhow::Result<(TempDir, BloodBank)> {
    // sled locks its directory, so every test gets its own
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("blood_bank.db"))?;
    let bank = BloodBank::with_db(Arc::new(db), AppConfig::default())?;
    Ok((temp_dir, bank))
}

pub fn donor_profile(blood_group: BloodGroup) -> NewDonorProfile {
    NewDonorProfile {
        full_name: "Ada Okafor".into(),
        age: 34,
        gender: Gender::Female,
        blood_group,
        phone: "+1 555 010 2000".into(),
        address: "12 Harbour Road".into(),
        city: "Lagos".into(),
        state: "Lagos".into(),
        medical_history: None,
    }
}

pub fn register(bank: &BloodBank, email: &str, role: Role) -> anyhow::Result<Account> {
    let profile = (role == Role::Donor).then(|| donor_profile(BloodGroup::ONeg));
    Ok(bank.auth().register(Registration {
        email: email.into(),
        password: PASSWORD.into(),
        role,
        profile,
    })?)
}

/// Log in and return a ready `Authorization` header value.
pub fn bearer(bank: &BloodBank, email: &str) -> anyhow::Result<String> {
    let outcome = bank.auth().login(email, PASSWORD)?;
    Ok(format!("Bearer {}", outcome.token))
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Add one available unit per entry, expiring that many days from today.
pub fn stock(bank: &BloodBank, group: BloodGroup, expires_in_days: &[i64]) -> anyhow::Result<Vec<u64>> {
    let today = policy::today();
    expires_in_days
        .iter()
        .map(|days| {
            let unit = bank.inventory().add_unit(
                UnitIntake::new()
                    .set_blood_group(group)
                    .set_donation_date(today)
                    .set_expiration_date(today + Duration::days(*days))
                    .set_storage_location("Fridge A"),
            )?;
            Ok(unit.id)
        })
        .collect()
}

/// Every unit in the bank, soonest expiration first.
pub fn all_units(bank: &BloodBank) -> anyhow::Result<Vec<InventoryUnit>> {
    let views = bank.inventory().list(&UnitFilter::default())?;
    Ok(views.into_iter().map(|view| view.unit).collect())
}
