//! Contains the data storage interface in which the service stores all internal data.
//!
//! As a special concession we use String to keep epoch millisecond time due to Sqlite's
//! limitation in using only i64. We want most epoch millisecond representations to instead
//! just be u64.
//!
//! ## Transactions
//!
//! Transactions are handled by calling `transaction` on a write connection:
//!
//! ```ignore
//! let mut conn = db.write_conn()?;
//! let tx = conn.transaction()?;
//! some_db_call(&tx)?;
//! some_other_db_call(&tx)?;
//! tx.commit()?; // Make sure you call commit or changes made inside the transaction are lost.
//! ```
//!
//! Sqlite tuning with help from: https://kerkour.com/sqlite-for-servers

pub mod events;
pub mod namespaces;
pub mod object_store_pipeline_keys;
pub mod object_store_run_keys;
pub mod pipeline_configs;
pub mod pipeline_metadata;
pub mod runs;
pub mod secret_store_global_keys;
pub mod secret_store_pipeline_keys;
pub mod task_runs;
pub mod tasks;
pub mod tokens;

use anyhow::Result;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::{fs::File, io, path::Path};

const MIGRATIONS: &str = include_str!("./migrations.sql");

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StorageError {
    #[error("could not establish connection to database; {0}")]
    Connection(String),

    #[error("requested entity not found")]
    NotFound,

    #[error("entity already exists")]
    Exists,

    #[error("request did not update any fields")]
    NoFieldsUpdated,

    #[error("did not find required foreign key for query; {0}")]
    ForeignKeyViolation(String),

    #[error(
        "unexpected storage error occurred; code: {code:?}; message: {message}; query: {query}"
    )]
    GenericDBError {
        code: Option<String>,
        message: String,
        query: String,
    },
}

/// Sqlite errors are determined by the database error code. We map these to specific variants
/// so that when we come back with a database error we can detect which one happened.
/// See the codes here: https://www.sqlite.org/rescode.html
pub fn map_rusqlite_error(e: rusqlite::Error, query: &str) -> StorageError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound,
        rusqlite::Error::SqliteFailure(err, message) => match err.extended_code {
            // SQLITE_CONSTRAINT_PRIMARYKEY and SQLITE_CONSTRAINT_UNIQUE
            1555 | 2067 => StorageError::Exists,
            // SQLITE_CONSTRAINT_FOREIGNKEY
            787 => StorageError::ForeignKeyViolation(message.unwrap_or_default()),
            _ => StorageError::GenericDBError {
                code: Some(err.extended_code.to_string()),
                message: message.unwrap_or_default(),
                query: query.into(),
            },
        },
        _ => StorageError::GenericDBError {
            code: None,
            message: e.to_string(),
            query: query.into(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct Db {
    read_pool: Pool<SqliteConnectionManager>,
    write_pool: Pool<SqliteConnectionManager>,
}

// Create file if not exists.
fn touch_file(path: &Path) -> io::Result<()> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        File::create(path)?;
    }

    Ok(())
}

impl Db {
    pub fn new(path: &str) -> Result<Self> {
        let path = Path::new(path);
        touch_file(path)?;

        // The PRAGMA settings here control various sqlite settings that are required for a
        // working and performant sqlite database. In order:
        // * journal_mode: Turns on WAL mode which increases concurrency and reliability.
        // * synchronous: Tells sqlite to not sync to disk as often and specifically only focus
        //   on syncing at critical junctures. This makes sqlite speedier and also has no
        //   downside because we have WAL mode.
        // * foreign_keys: Turns on relational style foreign keys. A must have.
        // * busy_timeout: How long a sqlite query will try before it returns an error. Very
        //   helpful to avoid sqlite "database busy/database is locked" errors.
        // * cache_size(-1048576): The amount of memory sqlite will use as a cache. The
        //   negative sign means the value is in kilobytes. In total it means use 1GB.
        // * temp_store: Tells sqlite to store temporary objects in memory rather than disk.
        let init_pragmas = |conn: &mut rusqlite::Connection| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA cache_size = -1048576;
                 PRAGMA temp_store = MEMORY;",
            )
        };

        let read_manager = SqliteConnectionManager::file(path).with_init(init_pragmas);
        let write_manager = SqliteConnectionManager::file(path).with_init(init_pragmas);

        // We create two different pools of connections. The read pool has many connections and
        // is high concurrency. The write pool is essentially a single connection in which only
        // one write can be made at a time. Not using this paradigm may result in sqlite
        // "database is locked(error: 5)" errors because of the manner in which sqlite handles
        // transactions.
        let read_pool = r2d2::Pool::builder().build(read_manager)?;
        let write_pool = r2d2::Pool::builder().max_size(1).build(write_manager)?;

        let conn = write_pool.get()?;
        conn.execute_batch(MIGRATIONS)?;
        drop(conn);

        Ok(Db {
            read_pool,
            write_pool,
        })
    }

    pub fn read_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.read_pool
            .get()
            .map_err(|e| StorageError::Connection(format!("{:?}", e)))
    }

    pub fn write_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.write_pool
            .get()
            .map_err(|e| StorageError::Connection(format!("{:?}", e)))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use rand::prelude::*;
    use std::ops::Deref;

    pub struct TestHarness {
        pub db: Db,
        pub storage_path: String,
    }

    impl TestHarness {
        pub fn new() -> Self {
            let mut rng = rand::thread_rng();
            let append_num: u16 = rng.gen();
            let storage_path = format!("/tmp/gofer_tests_storage{}.db", append_num);

            let db = Db::new(&storage_path).unwrap();

            Self { db, storage_path }
        }
    }

    impl Deref for TestHarness {
        type Target = Db;

        fn deref(&self) -> &Self::Target {
            &self.db
        }
    }

    impl Drop for TestHarness {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.storage_path);
            let _ = std::fs::remove_file(format!("{}{}", &self.storage_path, "-shm"));
            let _ = std::fs::remove_file(format!("{}{}", &self.storage_path, "-wal"));
        }
    }
}
