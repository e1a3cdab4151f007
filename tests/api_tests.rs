mod common;

use blood_bank::auth::Registration;
use blood_bank::donors::{DonorFilter, DonorUpdate};
use blood_bank::inventory::{UnitFilter, UnitIntake, UnitUpdate};
use blood_bank::policy::StockLevel;
use blood_bank::requests::{NewRequest, RequestFilter};
use blood_bank::types::{BloodGroup, RequestStatus, Role, UnitStatus, Urgency};
use blood_bank::{AppConfig, BloodBank};
use chrono::Duration;
use common::{bearer, day, donor_profile, open_bank, register, stock, PASSWORD};
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn new_request(units_needed: u8) -> NewRequest {
    NewRequest {
        blood_group: BloodGroup::ONeg,
        units_needed,
        urgency: Urgency::Medium,
        hospital_location: "City General".into(),
    }
}

#[test]
fn protected_routes_need_a_token() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;

    let missing = bank.stock_stats(None);
    assert_eq!(missing.status, 401);
    assert_eq!(
        missing.to_json(),
        json!({
            "success": false,
            "message": "Authentication required. No token provided.",
            "error": "Authentication required. No token provided."
        })
    );

    let unknown = bank.me(Some("Bearer session1nothinghere"));
    assert_eq!(unknown.status, 401);
    Ok(())
}

#[test]
fn roles_are_enforced() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    register(&bank, "donor@bank.org", Role::Donor)?;
    register(&bank, "rec@bank.org", Role::Recipient)?;
    let donor = bearer(&bank, "donor@bank.org")?;
    let recipient = bearer(&bank, "rec@bank.org")?;

    // only admins take in units
    let intake = UnitIntake::new()
        .set_blood_group(BloodGroup::APos)
        .set_storage_location("Fridge A");
    assert_eq!(bank.add_unit(Some(&recipient), intake).status, 403);

    // donors cannot file requests or browse other donors
    assert_eq!(bank.create_request(Some(&donor), new_request(1)).status, 403);
    assert_eq!(bank.search_donors(Some(&donor), &DonorFilter::default()).status, 403);

    // but anyone signed in sees stock
    assert_eq!(bank.stock_stats(Some(&donor)).status, 200);
    Ok(())
}

#[test]
fn registration_and_login() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;

    let created = bank.register(Registration {
        email: "  New.Donor@Bank.org".into(),
        password: PASSWORD.into(),
        role: Role::Donor,
        profile: Some(donor_profile(BloodGroup::BPos)),
    });
    assert_eq!(created.status, 201);
    let account = created.data.expect("account returned");
    assert_eq!(account.email, "new.donor@bank.org");
    assert!(!account.is_verified);

    // credential material never leaves the service
    let body = bank
        .register(Registration {
            email: "second@bank.org".into(),
            password: PASSWORD.into(),
            role: Role::Recipient,
            profile: None,
        })
        .to_json();
    assert!(body["data"].get("credential").is_none());
    assert!(body["data"].get("verification_token").is_none());

    let duplicate = bank.register(Registration {
        email: "new.donor@bank.org".into(),
        password: PASSWORD.into(),
        role: Role::Recipient,
        profile: None,
    });
    assert_eq!(duplicate.status, 400);
    assert_eq!(duplicate.error.as_deref(), Some("Email already registered"));

    let wrong = bank.login("new.donor@bank.org", "not-the-password");
    assert_eq!(wrong.status, 401);
    assert_eq!(wrong.error.as_deref(), Some("Invalid email or password"));
    let nobody = bank.login("ghost@bank.org", PASSWORD);
    assert_eq!(nobody.error, wrong.error);

    let login = bank.login("NEW.DONOR@bank.org", PASSWORD);
    assert_eq!(login.status, 200);
    let token = login.data.expect("token issued").token;

    let me = bank.me(Some(&format!("Bearer {token}")));
    let profile = me.data.expect("profile returned");
    assert_eq!(profile.account.id, account.id);
    let donor = profile.donor_profile.expect("donors carry a profile");
    assert_eq!(donor.profile.blood_group, BloodGroup::BPos);
    assert!(donor.is_eligible);
    assert_eq!(donor.days_until_eligible, 0);
    Ok(())
}

#[test]
fn invalid_registration_reports_every_field() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;

    let mut profile = donor_profile(BloodGroup::APos);
    profile.age = 16;
    let response = bank.register(Registration {
        email: "not-an-email".into(),
        password: "123".into(),
        role: Role::Donor,
        profile: Some(profile),
    });

    assert_eq!(response.status, 400);
    let fields: Vec<String> = response
        .errors
        .expect("field errors")
        .into_iter()
        .map(|e| e.field)
        .collect();
    assert_eq!(fields, vec!["email", "password", "age"]);
    Ok(())
}

#[test]
fn verification_and_logout() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    let account = register(&bank, "rec@bank.org", Role::Recipient)?;
    let token = account.verification_token.clone().expect("token issued at registration");

    let verified = bank.verify_email(&token);
    assert_eq!(verified.status, 200);
    assert!(verified.data.expect("account").is_verified);
    // tokens are single use
    assert_eq!(bank.verify_email(&token).status, 400);

    let header = bearer(&bank, "rec@bank.org")?;
    assert_eq!(bank.me(Some(&header)).status, 200);
    assert_eq!(bank.logout(Some(&header)).status, 200);
    assert_eq!(bank.me(Some(&header)).status, 401);
    Ok(())
}

#[test]
fn expired_sessions_are_refused() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("expired_sessions.db"))?;
    let config = AppConfig {
        session_ttl_minutes: -1,
        ..AppConfig::default()
    };
    let bank = BloodBank::with_db(Arc::new(db), config)?;
    register(&bank, "rec@bank.org", Role::Recipient)?;

    let header = bearer(&bank, "rec@bank.org")?;
    let response = bank.me(Some(&header));
    assert_eq!(response.status, 401);
    assert_eq!(response.error.as_deref(), Some("Token expired. Please login again."));
    Ok(())
}

#[test]
fn stock_stats_bucket_every_group() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    let admin = bearer(&bank, "admin@bank.org")?;
    stock(&bank, BloodGroup::APos, &[10; 4])?;
    stock(&bank, BloodGroup::OPos, &[10; 5])?;
    stock(&bank, BloodGroup::ONeg, &[10; 10])?;

    let stats = bank.stock_stats(Some(&admin)).data.expect("stats");
    assert_eq!(stats.len(), 8);
    let level = |group: BloodGroup| {
        stats
            .iter()
            .find(|s| s.blood_group == group)
            .map(|s| (s.available_units, s.status))
    };
    assert_eq!(level(BloodGroup::APos), Some((4, StockLevel::Low)));
    assert_eq!(level(BloodGroup::OPos), Some((5, StockLevel::Medium)));
    assert_eq!(level(BloodGroup::ONeg), Some((10, StockLevel::Good)));
    assert_eq!(level(BloodGroup::ABNeg), Some((0, StockLevel::Low)));

    let body = bank.stock_stats(Some(&admin)).to_json();
    assert_eq!(body["data"][0], json!({ "blood_group": "A+", "available_units": 4, "status": "low" }));
    Ok(())
}

#[test]
fn recipients_see_only_their_requests() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    register(&bank, "one@bank.org", Role::Recipient)?;
    register(&bank, "two@bank.org", Role::Recipient)?;
    let admin = bearer(&bank, "admin@bank.org")?;
    let one = bearer(&bank, "one@bank.org")?;
    let two = bearer(&bank, "two@bank.org")?;

    let mine = bank.create_request(Some(&one), new_request(2));
    assert_eq!(mine.status, 201);
    let mine = mine.data.expect("request");
    bank.create_request(Some(&two), new_request(1));

    let listed = bank.list_requests(Some(&one), &RequestFilter::default());
    assert_eq!(listed.count, Some(1));
    let row = &listed.data.expect("requests")[0];
    assert_eq!(row.recipient_email.as_deref(), Some("one@bank.org"));
    assert_eq!(row.admin_email, None);
    assert_eq!(
        bank.list_requests(Some(&one), &RequestFilter::default()).to_json()["data"][0]["recipient_email"],
        json!("one@bank.org")
    );
    assert_eq!(bank.list_requests(Some(&admin), &RequestFilter::default()).count, Some(2));

    assert_eq!(bank.request(Some(&two), mine.id).status, 403);
    assert_eq!(bank.cancel_request(Some(&two), mine.id).status, 403);
    assert_eq!(bank.cancel_request(Some(&one), mine.id).status, 200);
    Ok(())
}

#[test]
fn approval_through_the_api() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    register(&bank, "rec@bank.org", Role::Recipient)?;
    let admin = bearer(&bank, "admin@bank.org")?;
    let recipient = bearer(&bank, "rec@bank.org")?;
    stock(&bank, BloodGroup::ONeg, &[2, 10, 5])?;

    let request = bank
        .create_request(Some(&recipient), new_request(4))
        .data
        .expect("request");

    let short = bank.approve_request(Some(&admin), request.id, None);
    assert_eq!(short.status, 400);
    assert_eq!(short.error.as_deref(), Some("Insufficient stock. Available: 3, Needed: 4"));

    assert_eq!(bank.approve_request(Some(&recipient), request.id, None).status, 403);

    let rejected = bank.reject_request(Some(&admin), request.id, Some("Not enough O- stock".into()));
    assert_eq!(rejected.status, 200);
    let rejected = rejected.data.expect("request");
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.admin_notes.as_deref(), Some("Not enough O- stock"));

    let missing = bank.approve_request(Some(&admin), 424_242, None);
    assert_eq!(missing.status, 404);
    Ok(())
}

#[test]
fn donors_edit_only_their_own_profile() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    let ada = register(&bank, "ada@bank.org", Role::Donor)?;
    let ben = register(&bank, "ben@bank.org", Role::Donor)?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    let ada_header = bearer(&bank, "ada@bank.org")?;
    let admin = bearer(&bank, "admin@bank.org")?;

    let update = DonorUpdate {
        city: Some("Abuja".into()),
        ..DonorUpdate::default()
    };
    assert_eq!(bank.update_donor(Some(&ada_header), ben.id, update.clone()).status, 403);

    let updated = bank.update_donor(Some(&ada_header), ada.id, update);
    assert_eq!(updated.status, 200);
    assert_eq!(updated.data.expect("donor").profile.city, "Abuja");

    // the eligibility date is an admin override
    let sneaky = DonorUpdate {
        last_donation_date: Some(day(2020, 1, 1)),
        ..DonorUpdate::default()
    };
    assert_eq!(bank.update_donor(Some(&ada_header), ada.id, sneaky).status, 403);

    let today = blood_bank::policy::today();
    let overridden = bank.set_donation_date(Some(&admin), ada.id, Some(today));
    let view = overridden.data.expect("donor");
    assert!(!view.is_eligible);
    assert_eq!(view.days_until_eligible, 56);

    let eligible = bank.eligible_donors(Some(&admin)).data.expect("donors");
    assert_eq!(eligible.iter().map(|d| d.profile.id).collect::<Vec<_>>(), vec![ben.id]);
    Ok(())
}

/// Deleting a donor account unlinks their units and removes what they owned.
#[test]
fn account_deletion_cascades() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    let donor = register(&bank, "donor@bank.org", Role::Donor)?;
    let recipient = register(&bank, "rec@bank.org", Role::Recipient)?;
    let admin = register(&bank, "admin@bank.org", Role::Admin)?;
    let admin_header = bearer(&bank, "admin@bank.org")?;
    let donor_header = bearer(&bank, "donor@bank.org")?;

    let unit = bank.inventory().add_unit(
        UnitIntake::new()
            .set_blood_group(BloodGroup::ONeg)
            .set_donor(donor.id)
            .set_storage_location("Fridge C"),
    )?;
    let request = bank.requests().create(recipient.id, new_request(1))?;
    bank.requests().approve(request.id, admin.id, None)?;

    // someone else cannot delete the donor
    let recipient_header = bearer(&bank, "rec@bank.org")?;
    assert_eq!(bank.delete_account(Some(&recipient_header), donor.id).status, 403);

    assert_eq!(bank.delete_account(Some(&admin_header), donor.id).status, 200);
    assert_eq!(bank.inventory().get(unit.id)?.donor_id, None);
    assert_eq!(bank.me(Some(&donor_header)).status, 401);
    assert_eq!(bank.donor(Some(&admin_header), donor.id).status, 404);
    // the address can be registered again
    register(&bank, "donor@bank.org", Role::Donor)?;

    // an approving admin going away keeps the request, minus the link
    bank.auth().delete_account(admin.id)?;
    let kept = bank.requests().get(request.id)?;
    assert_eq!(kept.status, RequestStatus::Approved);
    assert_eq!(kept.approved_by, None);

    // a recipient's requests go with them
    bank.auth().delete_account(recipient.id)?;
    assert!(bank.requests().get(request.id).is_err());
    Ok(())
}

#[test]
fn approving_admin_email_is_joined_into_listing() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    register(&bank, "rec@bank.org", Role::Recipient)?;
    let admin = bearer(&bank, "admin@bank.org")?;
    let recipient = bearer(&bank, "rec@bank.org")?;
    stock(&bank, BloodGroup::ONeg, &[9])?;

    let request = bank.create_request(Some(&recipient), new_request(1)).data.expect("request");
    assert_eq!(bank.approve_request(Some(&admin), request.id, None).status, 200);

    let rows = bank
        .list_requests(Some(&admin), &RequestFilter::default())
        .data
        .expect("requests");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].request.id, request.id);
    assert_eq!(rows[0].recipient_email.as_deref(), Some("rec@bank.org"));
    assert_eq!(rows[0].admin_email.as_deref(), Some("admin@bank.org"));
    Ok(())
}

/// Free-text donor search belongs to the admin listing only.
#[test]
fn admin_listing_searches_free_text() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    register(&bank, "ada@bank.org", Role::Donor)?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    register(&bank, "rec@bank.org", Role::Recipient)?;
    bank.auth().register(Registration {
        email: "ben@bank.org".into(),
        password: PASSWORD.into(),
        role: Role::Donor,
        profile: Some(blood_bank::donors::NewDonorProfile {
            full_name: "Ben Musa".into(),
            phone: "+1 555 020 3000".into(),
            ..donor_profile(BloodGroup::APos)
        }),
    })?;
    let admin = bearer(&bank, "admin@bank.org")?;
    let recipient = bearer(&bank, "rec@bank.org")?;
    let by_name = DonorFilter {
        search: Some("ada".into()),
        ..DonorFilter::default()
    };

    assert_eq!(bank.all_donors(Some(&recipient), &DonorFilter::default()).status, 403);

    let found = bank.all_donors(Some(&admin), &by_name);
    assert_eq!(found.status, 200);
    let names: Vec<String> = found
        .data
        .expect("donors")
        .into_iter()
        .map(|d| d.profile.full_name)
        .collect();
    assert_eq!(names, vec!["Ada Okafor"]);

    let by_phone = DonorFilter {
        search: Some("020".into()),
        ..DonorFilter::default()
    };
    assert_eq!(bank.all_donors(Some(&admin), &by_phone).count, Some(1));

    // the recipient search route ignores free text and keeps the other filters
    let searched = bank.search_donors(Some(&recipient), &by_name);
    assert_eq!(searched.count, Some(2));
    let by_group = DonorFilter {
        blood_group: Some(BloodGroup::APos),
        search: Some("ada".into()),
        ..DonorFilter::default()
    };
    assert_eq!(bank.search_donors(Some(&recipient), &by_group).count, Some(1));
    Ok(())
}

#[test]
fn donor_by_id_is_admin_only() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    let donor = register(&bank, "donor@bank.org", Role::Donor)?;
    register(&bank, "rec@bank.org", Role::Recipient)?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    let own = bearer(&bank, "donor@bank.org")?;
    let recipient = bearer(&bank, "rec@bank.org")?;
    let admin = bearer(&bank, "admin@bank.org")?;

    assert_eq!(bank.donor(Some(&own), donor.id).status, 403);
    assert_eq!(bank.donor(Some(&recipient), donor.id).status, 403);
    assert_eq!(bank.donor(Some(&admin), donor.id).status, 200);
    assert_eq!(bank.donor(Some(&admin), 424_242).status, 404);
    Ok(())
}

#[test]
fn inventory_maintenance_routes() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    register(&bank, "rec@bank.org", Role::Recipient)?;
    let admin = bearer(&bank, "admin@bank.org")?;
    let recipient = bearer(&bank, "rec@bank.org")?;
    let ids = stock(&bank, BloodGroup::BPos, &[20, 25])?;

    let update = UnitUpdate {
        status: Some(UnitStatus::Discarded),
        storage_location: Some("Quarantine bay".into()),
    };
    assert_eq!(bank.update_unit(Some(&recipient), ids[0], update.clone()).status, 403);
    assert_eq!(bank.delete_unit(Some(&recipient), ids[1]).status, 403);

    let updated = bank.update_unit(Some(&admin), ids[0], update.clone());
    assert_eq!(updated.status, 200);
    let unit = updated.data.expect("unit");
    assert_eq!(unit.status, UnitStatus::Discarded);
    assert_eq!(unit.storage_location, "Quarantine bay");
    assert_eq!(bank.inventory().get(ids[0])?, unit);

    let blank = UnitUpdate {
        storage_location: Some("   ".into()),
        ..UnitUpdate::default()
    };
    assert_eq!(bank.update_unit(Some(&admin), ids[0], blank).status, 400);

    assert_eq!(bank.delete_unit(Some(&admin), ids[1]).status, 200);
    assert!(bank.inventory().get(ids[1]).is_err());
    assert_eq!(bank.delete_unit(Some(&admin), ids[1]).status, 404);
    assert_eq!(bank.update_unit(Some(&admin), ids[1], update).status, 404);

    let listed = bank.list_inventory(Some(&recipient), &UnitFilter::default());
    assert_eq!(listed.count, Some(1));
    Ok(())
}

/// Units already past their date are not "expiring soon", on either route.
#[test]
fn expiring_filter_skips_expired_units() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    register(&bank, "rec@bank.org", Role::Recipient)?;
    let admin = bearer(&bank, "admin@bank.org")?;
    let recipient = bearer(&bank, "rec@bank.org")?;

    let today = blood_bank::policy::today();
    let past = bank.inventory().add_unit(
        UnitIntake::new()
            .set_blood_group(BloodGroup::ONeg)
            .set_donation_date(today - Duration::days(40))
            .set_storage_location("Fridge A"),
    )?;
    let soon = stock(&bank, BloodGroup::ONeg, &[0, 7])?;
    let later = stock(&bank, BloodGroup::ONeg, &[8])?;

    let filter = UnitFilter {
        expiring_soon: true,
        ..UnitFilter::default()
    };
    let listed: Vec<u64> = bank
        .list_inventory(Some(&recipient), &filter)
        .data
        .expect("units")
        .into_iter()
        .map(|view| view.unit.id)
        .collect();
    assert_eq!(listed, soon);
    assert!(!listed.contains(&past.id));
    assert!(!listed.contains(&later[0]));

    assert_eq!(bank.expiring_units(Some(&recipient)).status, 403);
    let expiring = bank.expiring_units(Some(&admin));
    assert_eq!(expiring.count, Some(2));
    assert!(expiring.data.expect("units").iter().all(|view| view.expiring_soon));
    Ok(())
}

/// The sweep route always uses the server's date.
#[test]
fn expire_sweep_route_uses_today() -> anyhow::Result<()> {
    let (_dir, bank) = open_bank()?;
    register(&bank, "admin@bank.org", Role::Admin)?;
    register(&bank, "rec@bank.org", Role::Recipient)?;
    let admin = bearer(&bank, "admin@bank.org")?;
    let recipient = bearer(&bank, "rec@bank.org")?;

    let today = blood_bank::policy::today();
    let stale = bank.inventory().add_unit(
        UnitIntake::new()
            .set_blood_group(BloodGroup::ABPos)
            .set_donation_date(today - Duration::days(40))
            .set_storage_location("Fridge D"),
    )?;
    let fresh = stock(&bank, BloodGroup::ABPos, &[0, 30])?;

    assert_eq!(bank.expire_stale_units(Some(&recipient)).status, 403);
    let swept = bank.expire_stale_units(Some(&admin));
    assert_eq!(swept.data, Some(1));
    assert_eq!(bank.inventory().get(stale.id)?.status, UnitStatus::Expired);
    for id in fresh {
        assert_eq!(bank.inventory().get(id)?.status, UnitStatus::Available);
    }
    Ok(())
}
