use crate::error::{NetplaneError, NetplaneResult};
use crate::state_machine::{StatefulRecord, TransitionToken};
use crate::storage::tables::{ID_TABLES, KEYED_TABLES, SEQUENCE_TABLE};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A value persisted in one of the id-keyed tables
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: TableDefinition<'static, u64, &'static [u8]>;

    /// Human readable kind used in logs and errors
    const KIND: &'static str;

    fn key(&self) -> u64;
}

/// Handle to the shared redb store; cheap to clone
#[derive(Clone, Debug)]
pub struct Store {
    database: Arc<Database>,
}

impl Store {
    /// Open (or create) the store at `path` and make sure all tables exist
    pub fn open(path: impl AsRef<Path>) -> NetplaneResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let database = Database::create(path)?;
        info!(path = %path.display(), "Opened shared store");
        Self::with_database(database)
    }

    /// Store backed by memory only; contents vanish on drop
    pub fn in_memory() -> NetplaneResult<Self> {
        let database = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::with_database(database)
    }

    fn with_database(database: Database) -> NetplaneResult<Self> {
        let store = Self {
            database: Arc::new(database),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> NetplaneResult<()> {
        let write_txn = self.database.begin_write()?;
        for table in ID_TABLES {
            let _ = write_txn.open_table(*table)?;
        }
        for table in KEYED_TABLES {
            let _ = write_txn.open_table(*table)?;
        }
        let _ = write_txn.open_table(SEQUENCE_TABLE)?;
        write_txn.commit()?;
        Ok(())
    }

    pub(super) fn database(&self) -> &Database {
        &self.database
    }

    pub fn find<T: Record>(&self, id: u64) -> NetplaneResult<Option<T>> {
        let read_txn = self.database.begin_read()?;
        let table = read_txn.open_table(T::TABLE)?;
        match table.get(id)? {
            Some(data) => Ok(Some(decode(T::KIND, data.value())?)),
            None => Ok(None),
        }
    }

    /// Read a row, optionally under the store's write lock.
    ///
    /// With `for_update` the read happens inside a write transaction, so it
    /// waits for every in-flight writer and sees their committed result.
    pub fn lock_row<T: Record>(&self, id: u64, for_update: bool) -> NetplaneResult<Option<T>> {
        if !for_update {
            return self.find(id);
        }
        let write_txn = self.database.begin_write()?;
        let table = write_txn.open_table(T::TABLE)?;
        let row = table.get(id)?.map(|data| data.value().to_vec());
        drop(table);
        write_txn.abort()?;
        match row {
            Some(bytes) => Ok(Some(decode(T::KIND, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`Store::find`] but a missing row is a `NotFound` error
    pub fn get<T: Record>(&self, id: u64) -> NetplaneResult<T> {
        self.find(id)?
            .ok_or_else(|| NetplaneError::not_found(format!("{} {}", T::KIND, id)))
    }

    /// All records of one kind in key order
    pub fn list<T: Record>(&self) -> NetplaneResult<Vec<T>> {
        let read_txn = self.database.begin_read()?;
        let table = read_txn.open_table(T::TABLE)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(decode(T::KIND, value.value())?);
        }
        Ok(records)
    }

    /// Insert or overwrite a record
    pub fn persist<T: Record>(&self, record: &T) -> NetplaneResult<()> {
        let data = encode(T::KIND, record)?;
        let write_txn = self.database.begin_write()?;
        {
            let mut table = write_txn.open_table(T::TABLE)?;
            table.insert(record.key(), data.as_slice())?;
        }
        write_txn.commit()?;
        debug!(kind = T::KIND, id = record.key(), "Persisted record");
        Ok(())
    }

    /// Delete a record; returns whether it existed
    pub fn remove<T: Record>(&self, id: u64) -> NetplaneResult<bool> {
        let write_txn = self.database.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(T::TABLE)?;
            let removed = table.remove(id)?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Next value of a durable, strictly increasing sequence (starts at 1)
    pub fn next_id(&self, sequence: &str) -> NetplaneResult<u64> {
        let write_txn = self.database.begin_write()?;
        let next = {
            let mut table = write_txn.open_table(SEQUENCE_TABLE)?;
            let current = table.get(sequence)?.map(|v| v.value()).unwrap_or(0);
            let next = current.saturating_add(1);
            table.insert(sequence, next)?;
            next
        };
        write_txn.commit()?;
        Ok(next)
    }

    /// Read, mutate and conditionally write one record atomically.
    ///
    /// `mutate` returns whether the change should be written. Returns the
    /// written record, or `None` when the row is missing or `mutate` declined.
    pub fn update_if<T, F>(&self, id: u64, mutate: F) -> NetplaneResult<Option<T>>
    where
        T: Record,
        F: FnOnce(&mut T) -> bool,
    {
        let write_txn = self.database.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(T::TABLE)?;
            let current = table.get(id)?.map(|data| data.value().to_vec());
            match current {
                None => None,
                Some(bytes) => {
                    let mut record: T = decode(T::KIND, &bytes)?;
                    if mutate(&mut record) {
                        let data = encode(T::KIND, &record)?;
                        table.insert(id, data.as_slice())?;
                        Some(record)
                    } else {
                        None
                    }
                }
            }
        };

        if updated.is_some() {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(updated)
    }

    /// Conditional state update: `UPDATE .. SET state = to WHERE id = ? AND state = expected`.
    ///
    /// The record's token check and transition hook run inside the same write
    /// transaction. Returns the updated record when exactly one row changed.
    pub fn update_state<T: StatefulRecord>(
        &self,
        id: u64,
        expected: T::State,
        event: T::Event,
        to: T::State,
        token: Option<&TransitionToken>,
    ) -> NetplaneResult<Option<T>> {
        self.update_if::<T, _>(id, |record| {
            if record.state() != expected || !record.accepts_token(token) {
                return false;
            }
            record.on_transition(expected, event, to, token);
            record.set_state(to);
            record.bump_version();
            true
        })
    }

    /// Read a row of a name-keyed table
    pub fn find_keyed<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> NetplaneResult<Option<T>> {
        let read_txn = self.database.begin_read()?;
        let table = read_txn.open_table(table)?;
        match table.get(key)? {
            Some(data) => Ok(Some(decode(key, data.value())?)),
            None => Ok(None),
        }
    }

    /// All rows of a name-keyed table
    pub fn list_keyed<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> NetplaneResult<Vec<(String, T)>> {
        let read_txn = self.database.begin_read()?;
        let table = read_txn.open_table(table)?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let key = key.value().to_string();
            let record = decode(&key, value.value())?;
            rows.push((key, record));
        }
        Ok(rows)
    }

    /// Atomically rewrite one row of a name-keyed table.
    ///
    /// `mutate` sees the current row (if any) and may replace or clear it. The
    /// resulting value is written back (or the row removed) in the same
    /// transaction. A row left as it was is not written at all.
    pub fn mutate_keyed<T, R, F>(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
        mutate: F,
    ) -> NetplaneResult<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Option<T>) -> R,
    {
        let write_txn = self.database.begin_write()?;
        let (result, changed) = {
            let mut table = write_txn.open_table(table)?;
            let current = table.get(key)?.map(|data| data.value().to_vec());
            let mut row: Option<T> = match &current {
                Some(bytes) => Some(decode(key, bytes)?),
                None => None,
            };
            let result = mutate(&mut row);
            let updated = row.map(|value| encode(key, &value)).transpose()?;
            let changed = updated != current;
            if changed {
                match updated {
                    Some(data) => {
                        table.insert(key, data.as_slice())?;
                    }
                    None => {
                        table.remove(key)?;
                    }
                }
            }
            (result, changed)
        };

        if changed {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(result)
    }
}

pub(super) fn encode<T: Serialize + ?Sized>(what: &str, value: &T) -> NetplaneResult<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| NetplaneError::serialization(format!("encode {}", what), e))
}

pub(super) fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> NetplaneResult<T> {
    bincode::deserialize(bytes)
        .map_err(|e| NetplaneError::serialization(format!("decode {}", what), e))
}
