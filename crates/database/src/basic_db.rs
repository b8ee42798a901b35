use libmdbx::{Database, DatabaseOptions, WriteMap, WriteFlags, TableFlags};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::path::Path;

#[derive(Clone)]
pub struct InnerDatabase {
    db: Arc<Mutex<Database<WriteMap>>>,
}

/// Key-value access to the ledger tables.
///
/// Every method runs inside its own libmdbx transaction. Writers are
/// serialised through the mutex, so `compare_and_swap` and
/// `write_if_absent` observe and replace the stored value atomically.
pub trait SafeDatabase: Clone + Send + Sync + 'static {

    fn new<P: AsRef<Path>>(path: P) -> Result<Self, libmdbx::Error> where Self: Sized;

    fn write(&self, key: &str, value: &str, table: &str) -> Result<(), libmdbx::Error>;

    fn read(&self, key: &str, table: &str) -> Result<Option<Vec<u8>>, libmdbx::Error>;

    fn read_all(&self, table: &str) -> Result<HashMap<Vec<u8>, Vec<u8>>, libmdbx::Error>;

    /// Entries whose key starts with `prefix`, in key order.
    fn read_prefix(&self, prefix: &str, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, libmdbx::Error>;

    fn batch_write<K, V>(&self, items: &[(K, V)], table: &str) -> Result<(), libmdbx::Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>;

    /// Replaces the value under `key` only when it currently equals `expected`
    /// (`None` meaning "absent"). Returns whether the write happened.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        table: &str,
    ) -> Result<bool, libmdbx::Error>;

    /// Writes only when no value exists under `key`.
    fn write_if_absent(&self, key: &str, value: &str, table: &str) -> Result<bool, libmdbx::Error> {
        self.compare_and_swap(key, None, value, table)
    }
}

impl InnerDatabase {
    // poison 상태여도 트랜잭션 단위로 커밋되므로 데이터는 일관됨
    fn lock(&self) -> MutexGuard<'_, Database<WriteMap>> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}


impl SafeDatabase for InnerDatabase{

    fn new<P: AsRef<Path>>(path: P) -> Result<Self, libmdbx::Error> {
        let mut options = DatabaseOptions::default();
        options.max_tables = Some(100);
        let db = Database::<WriteMap>::open_with_options(path, options)?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }


    fn write(&self, key: &str, value: &str, table: &str) -> Result<(), libmdbx::Error> {
        let db = self.lock();
        let transaction = db.begin_rw_txn()?;
        let table = transaction.create_table(Some(table), TableFlags::default())?;

        transaction.put(&table, key, value, WriteFlags::default())?;
        transaction.commit()?;
        Ok(())
    }


    fn read(&self, key: &str, table: &str) -> Result<Option<Vec<u8>>, libmdbx::Error> {
        let db = self.lock();
        let transaction = db.begin_ro_txn()?;

        if let Ok(table) = transaction.open_table(Some(table)) {
            let result = transaction.get(&table, key.as_bytes())?;
            return Ok(result);
        }

        Ok(None)
    }

    fn read_all(&self, table: &str) -> Result<HashMap<Vec<u8>, Vec<u8>>, libmdbx::Error> {
        let mut map = HashMap::new();
        let db = self.lock();
        let transaction = db.begin_ro_txn()?;

        if let Ok(table) = transaction.open_table(Some(table)) {
            let cursor = transaction.cursor(&table)?;

            for item in cursor {
                let (key, value) = item?;
                let key_owned = key.to_vec();
                let value_owned = value.to_vec();
                map.insert(key_owned, value_owned);
            }
        }

        Ok(map)
    }

    fn read_prefix(&self, prefix: &str, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, libmdbx::Error> {
        let mut entries = Vec::new();
        let db = self.lock();
        let transaction = db.begin_ro_txn()?;

        if let Ok(table) = transaction.open_table(Some(table)) {
            let cursor = transaction.cursor(&table)?;

            for item in cursor {
                let (key, value) = item?;
                if key.starts_with(prefix.as_bytes()) {
                    entries.push((key.to_vec(), value.to_vec()));
                }
            }
        }

        // cursor 순서는 키 순서와 같지만 명시적으로 정렬
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }


    fn batch_write<K, V>(&self, items: &[(K, V)], table: &str) -> Result<(), libmdbx::Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let db = self.lock();
        let transaction = db.begin_rw_txn()?;
        let table = transaction.create_table(Some(table), TableFlags::default())?;

        for (key, value) in items {
            transaction.put(&table, key, value, WriteFlags::default())?;
        }

        transaction.commit()?;
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        table: &str,
    ) -> Result<bool, libmdbx::Error> {
        let db = self.lock();
        let transaction = db.begin_rw_txn()?;
        let table = transaction.create_table(Some(table), TableFlags::default())?;

        let current: Option<Vec<u8>> = transaction.get(&table, key.as_bytes())?;
        if current.as_deref() != expected.map(str::as_bytes) {
            // 다른 writer가 먼저 바꿨음, 아무것도 쓰지 않고 종료
            return Ok(false);
        }

        transaction.put(&table, key, value, WriteFlags::default())?;
        transaction.commit()?;
        Ok(true)
    }
}
