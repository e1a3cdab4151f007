//! End to end run: a donor gives blood, a recipient asks for it, an admin approves.
//!
//! Run with `BLOOD_BANK_LOG=blood_bank=debug cargo run --example walkthrough`
//! to see the allocation proposals as well.
use anyhow::Context;
use blood_bank::auth::Registration;
use blood_bank::donors::NewDonorProfile;
use blood_bank::inventory::UnitIntake;
use blood_bank::requests::NewRequest;
use blood_bank::types::{BloodGroup, Gender, Role, Urgency};
use blood_bank::{AppConfig, BloodBank, logging};
use chrono::Duration;
use tempfile::tempdir;

const PASSWORD: &str = "walkthrough-pass";

fn main() -> anyhow::Result<()> {
    logging::init();

    // the db is created on temp for simplified cleanup
    let temp_dir = tempdir()?;
    let config = AppConfig {
        db_path: temp_dir.path().join("walkthrough.db"),
        ..AppConfig::load_from_env_and_defaults()?
    };
    let bank = BloodBank::open(config)?;

    let mut accounts = Vec::new();
    for (email, role) in [
        ("admin@bank.org", Role::Admin),
        ("ngozi@donors.org", Role::Donor),
        ("ward4@hospital.org", Role::Recipient),
    ] {
        let profile = (role == Role::Donor).then(|| NewDonorProfile {
            full_name: "Ngozi Adeyemi".into(),
            age: 29,
            gender: Gender::Female,
            blood_group: BloodGroup::ONeg,
            phone: "+234 801 555 01".into(),
            address: "4 Marina Street".into(),
            city: "Lagos".into(),
            state: "Lagos".into(),
            medical_history: None,
        });
        let response = bank.register(Registration {
            email: email.into(),
            password: PASSWORD.into(),
            role,
            profile,
        });
        accounts.push(response.data.context("registration failed")?);
    }
    let donor = &accounts[1];

    let login = |email: &str| -> anyhow::Result<String> {
        let outcome = bank.login(email, PASSWORD).data.context("login failed")?;
        Ok(format!("Bearer {}", outcome.token))
    };
    let admin = login("admin@bank.org")?;
    let ward = login("ward4@hospital.org")?;

    // one unit from the donor plus two older units already on the shelf
    let today = blood_bank::policy::today();
    bank.add_unit(
        Some(&admin),
        UnitIntake::new()
            .set_blood_group(BloodGroup::ONeg)
            .set_donor(donor.id)
            .set_storage_location("Fridge A, shelf 1"),
    );
    for days_ago in [30, 20] {
        bank.add_unit(
            Some(&admin),
            UnitIntake::new()
                .set_blood_group(BloodGroup::ONeg)
                .set_donation_date(today - Duration::days(days_ago))
                .set_storage_location("Fridge A, shelf 2"),
        );
    }
    println!("{:#}", bank.stock_stats(Some(&admin)).to_json());

    let request = bank
        .create_request(
            Some(&ward),
            NewRequest {
                blood_group: BloodGroup::ONeg,
                units_needed: 2,
                urgency: Urgency::High,
                hospital_location: "St. Mary's, Ward 4".into(),
            },
        )
        .data
        .context("request failed")?;

    let approved = bank.approve_request(Some(&admin), request.id, Some("theatre 2".into()));
    println!("{:#}", approved.to_json());

    let eligibility = bank.donor(Some(&admin), donor.id);
    println!("{:#}", eligibility.to_json());

    bank.flush()?;
    Ok(())
}
