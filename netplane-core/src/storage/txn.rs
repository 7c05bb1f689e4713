//! Multi-table write transactions
//!
//! [`Store::write`] hands a [`StoreTxn`] to a closure; everything it touches
//! commits together, or not at all when the closure fails.

use super::store::{decode, encode, Record, Store};
use crate::error::NetplaneResult;
use crate::storage::tables::SEQUENCE_TABLE;
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Typed view of one redb write transaction
pub struct StoreTxn {
    txn: WriteTransaction,
}

impl StoreTxn {
    pub fn find<T: Record>(&self, id: u64) -> NetplaneResult<Option<T>> {
        let table = self.txn.open_table(T::TABLE)?;
        let bytes = table.get(id)?.map(|data| data.value().to_vec());
        bytes.map(|bytes| decode(T::KIND, &bytes)).transpose()
    }

    pub fn persist<T: Record>(&self, record: &T) -> NetplaneResult<()> {
        let data = encode(T::KIND, record)?;
        let mut table = self.txn.open_table(T::TABLE)?;
        table.insert(record.key(), data.as_slice())?;
        Ok(())
    }

    pub fn find_keyed<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> NetplaneResult<Option<T>> {
        let table = self.txn.open_table(table)?;
        let bytes = table.get(key)?.map(|data| data.value().to_vec());
        bytes.map(|bytes| decode(key, &bytes)).transpose()
    }

    pub fn put_keyed<T: Serialize>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
        value: &T,
    ) -> NetplaneResult<()> {
        let data = encode(key, value)?;
        let mut table = self.txn.open_table(table)?;
        table.insert(key, data.as_slice())?;
        Ok(())
    }

    pub fn remove_keyed(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> NetplaneResult<bool> {
        let mut table = self.txn.open_table(table)?;
        let removed = table.remove(key)?;
        Ok(removed.is_some())
    }

    /// See [`Store::next_id`]
    pub fn next_id(&self, sequence: &str) -> NetplaneResult<u64> {
        let mut table = self.txn.open_table(SEQUENCE_TABLE)?;
        let current = table.get(sequence)?.map(|v| v.value()).unwrap_or(0);
        let next = current.saturating_add(1);
        table.insert(sequence, next)?;
        Ok(next)
    }
}

impl Store {
    /// Run `work` in one write transaction, committed when it returns `Ok`
    pub fn write<R, F>(&self, operation: &str, work: F) -> NetplaneResult<R>
    where
        F: FnOnce(&StoreTxn) -> NetplaneResult<R>,
    {
        let txn = StoreTxn {
            txn: self.database().begin_write()?,
        };
        match work(&txn) {
            Ok(result) => {
                txn.txn.commit()?;
                debug!(operation, "Committed write transaction");
                Ok(result)
            }
            Err(e) => {
                txn.txn.abort()?;
                Err(e)
            }
        }
    }
}
