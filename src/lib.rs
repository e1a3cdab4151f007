//! Blood bank backend: donors, inventory intake, request approval with
//! allocation, accounts and bearer sessions, all over an embedded sled store.
pub mod allocator;
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod donors;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod models;
pub mod policy;
pub mod requests;
pub mod store;
pub mod types;
pub mod utils;

pub use app::BloodBank;
pub use config::AppConfig;
pub use error::ServiceError;
