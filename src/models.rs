//! Persistent records. Each is stored CBOR-encoded under its big-endian id.
use super::types::{
    BloodGroup, CalendarDate, Gender, MedicalHistory, RequestStatus, Role, TimeStamp, UnitStatus,
    Urgency,
};
use serde::Serialize;

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    #[n(0)]
    pub salt: String, // bech32, hrp "salt"
    #[n(1)]
    pub digest: String, // sha256 hex of salt and secret
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Account {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub email: String,
    #[n(2)]
    #[serde(skip)]
    pub credential: Credential,
    #[n(3)]
    pub role: Role,
    #[n(4)]
    pub is_verified: bool,
    #[n(5)]
    #[serde(skip)]
    pub verification_token: Option<String>,
    #[n(6)]
    pub created_at: TimeStamp,
}

// Keyed by the owning account's id, there is no separate donor id.
#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq)]
pub struct DonorProfile {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub full_name: String,
    #[n(2)]
    pub age: u8,
    #[n(3)]
    pub gender: Gender,
    #[n(4)]
    pub blood_group: BloodGroup,
    #[n(5)]
    pub phone: String,
    #[n(6)]
    pub address: String,
    #[n(7)]
    pub city: String,
    #[n(8)]
    pub state: String,
    #[n(9)]
    pub last_donation_date: Option<CalendarDate>,
    #[n(10)]
    pub medical_history: MedicalHistory,
    #[n(11)]
    pub created_at: TimeStamp,
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InventoryUnit {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub blood_group: BloodGroup,
    #[n(2)]
    pub donation_date: CalendarDate,
    #[n(3)]
    pub expiration_date: CalendarDate,
    #[n(4)]
    pub status: UnitStatus,
    #[n(5)]
    pub donor_id: Option<u64>, // cleared when the donor account is deleted
    #[n(6)]
    pub storage_location: String,
    #[n(7)]
    pub created_at: TimeStamp,
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BloodRequest {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub recipient_id: u64,
    #[n(2)]
    pub blood_group: BloodGroup,
    #[n(3)]
    pub units_needed: u8,
    #[n(4)]
    pub urgency: Urgency,
    #[n(5)]
    pub hospital_location: String,
    #[n(6)]
    pub status: RequestStatus,
    #[n(7)]
    pub admin_notes: Option<String>,
    #[n(8)]
    pub approved_by: Option<u64>,
    #[n(9)]
    pub approved_at: Option<TimeStamp>,
    #[n(10)]
    pub allocated_units: Vec<u64>, // soonest-expiring first
    #[n(11)]
    pub created_at: TimeStamp,
    #[n(12)]
    pub updated_at: TimeStamp,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Session {
    #[n(0)]
    pub account_id: u64,
    #[n(1)]
    pub expires_at: TimeStamp,
}
