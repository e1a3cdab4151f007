//! Entity store over sled.
//!
//! One tree per record kind, keyed by big-endian ids so that iteration order
//! is creation order. Multi-record writes go through sled transactions using
//! the `tx_*` helpers; plain reads use the methods on [`Store`].
use super::error::ServiceError;
use super::models::{Account, BloodRequest, DonorProfile, InventoryUnit};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::{IVec, Tree};
use std::sync::Arc;

const ACCOUNTS: &str = "accounts";
const ACCOUNT_EMAILS: &str = "account_emails";
const DONORS: &str = "donors";
const INVENTORY: &str = "inventory";
const REQUESTS: &str = "requests";
const SESSIONS: &str = "sessions";

#[derive(Clone)]
pub struct Store {
    instance: Arc<sled::Db>,
    pub(crate) accounts: Tree,
    pub(crate) account_emails: Tree, // email -> account id
    pub(crate) donors: Tree,
    pub(crate) inventory: Tree,
    pub(crate) requests: Tree,
    pub(crate) sessions: Tree, // bearer token -> session
}

pub fn key(id: u64) -> IVec {
    IVec::from(&id.to_be_bytes()[..])
}

pub fn id_from_key(bytes: &[u8]) -> Result<u64, ServiceError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ServiceError::Internal("malformed record key".into()))?;
    Ok(u64::from_be_bytes(raw))
}

pub fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, ServiceError> {
    Ok(minicbor::to_vec(value)?)
}

pub fn decode<'b, T: minicbor::Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T, ServiceError> {
    Ok(minicbor::decode(bytes)?)
}

/// Abort the surrounding transaction with `err`.
pub fn abort(err: ServiceError) -> ConflictableTransactionError<ServiceError> {
    ConflictableTransactionError::Abort(err)
}

/// Read and decode a record inside a transaction.
pub fn tx_read<T>(tree: &TransactionalTree, id: u64) -> ConflictableTransactionResult<Option<T>, ServiceError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key(id))? {
        Some(bytes) => decode(&bytes).map(Some).map_err(abort),
        None => Ok(None),
    }
}

/// Encode and write a record inside a transaction.
pub fn tx_write<T>(tree: &TransactionalTree, id: u64, value: &T) -> ConflictableTransactionResult<(), ServiceError>
where
    T: minicbor::Encode<()>,
{
    let bytes = encode(value).map_err(abort)?;
    tree.insert(key(id), bytes)?;
    Ok(())
}

impl Store {
    pub fn open(instance: Arc<sled::Db>) -> Result<Self, ServiceError> {
        Ok(Self {
            accounts: instance.open_tree(ACCOUNTS)?,
            account_emails: instance.open_tree(ACCOUNT_EMAILS)?,
            donors: instance.open_tree(DONORS)?,
            inventory: instance.open_tree(INVENTORY)?,
            requests: instance.open_tree(REQUESTS)?,
            sessions: instance.open_tree(SESSIONS)?,
            instance,
        })
    }

    /// Fresh record id. Monotonic across the whole database and never zero.
    pub fn next_id(&self) -> Result<u64, ServiceError> {
        Ok(self.instance.generate_id()? + 1)
    }

    pub fn flush(&self) -> Result<(), ServiceError> {
        self.instance.flush()?;
        Ok(())
    }

    fn fetch<T>(&self, tree: &Tree, id: u64) -> Result<Option<T>, ServiceError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T>(&self, tree: &Tree) -> Result<Vec<T>, ServiceError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        tree.iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    pub fn account(&self, id: u64) -> Result<Account, ServiceError> {
        self.fetch(&self.accounts, id)?
            .ok_or(ServiceError::not_found("account", id))
    }

    pub fn find_account(&self, id: u64) -> Result<Option<Account>, ServiceError> {
        self.fetch(&self.accounts, id)
    }

    pub fn account_by_email(&self, email: &str) -> Result<Option<Account>, ServiceError> {
        match self.account_emails.get(email.as_bytes())? {
            Some(id) => self.find_account(id_from_key(&id)?),
            None => Ok(None),
        }
    }

    pub fn accounts(&self) -> Result<Vec<Account>, ServiceError> {
        self.scan(&self.accounts)
    }

    pub fn donor(&self, id: u64) -> Result<DonorProfile, ServiceError> {
        self.fetch(&self.donors, id)?
            .ok_or(ServiceError::not_found("donor", id))
    }

    pub fn find_donor(&self, id: u64) -> Result<Option<DonorProfile>, ServiceError> {
        self.fetch(&self.donors, id)
    }

    pub fn donors(&self) -> Result<Vec<DonorProfile>, ServiceError> {
        self.scan(&self.donors)
    }

    pub fn unit(&self, id: u64) -> Result<InventoryUnit, ServiceError> {
        self.fetch(&self.inventory, id)?
            .ok_or(ServiceError::not_found("blood unit", id))
    }

    /// Every unit, in creation order.
    pub fn units(&self) -> Result<Vec<InventoryUnit>, ServiceError> {
        self.scan(&self.inventory)
    }

    pub fn request(&self, id: u64) -> Result<BloodRequest, ServiceError> {
        self.fetch(&self.requests, id)?
            .ok_or(ServiceError::not_found("request", id))
    }

    pub fn requests(&self) -> Result<Vec<BloodRequest>, ServiceError> {
        self.scan(&self.requests)
    }
}
