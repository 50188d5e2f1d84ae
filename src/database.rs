use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use log::info;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Transaction, TransactionBehavior};

use crate::error::VmSqlError;
use crate::functions::{register_functions, FunctionSettings};

const DB_FILENAME: &str = "vmsql.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Pool of connections that all have the SQL functions and collations
/// registered.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path, settings: FunctionSettings) -> Result<Self, VmSqlError> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            if !dir.is_dir() {
                return Err(VmSqlError::NotFound(format!(
                    "Database folder '{}' does not exist or is not a directory",
                    dir.display()
                )));
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            register_functions(conn, &settings)
        });

        let pool = Pool::builder().build(manager)?;
        info!("Database opened at: {}", path.display());

        Ok(Database {
            pool,
            path: path.to_owned(),
        })
    }

    /// Default database location: `vmsql.db` in the app's data directory.
    pub fn default_path(project_dirs: &ProjectDirs) -> PathBuf {
        project_dirs.data_local_dir().join(DB_FILENAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> Result<DbConnection, VmSqlError> {
        Ok(self.pool.get()?)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction, committing on success.
    ///
    /// The write lock is taken up front, so a name chosen by `uniquify` cannot
    /// be claimed by another writer before `f` inserts it.
    pub fn immediate_transaction<F, T>(&self, f: F) -> Result<T, VmSqlError>
    where
        F: FnOnce(&Transaction) -> Result<T, VmSqlError>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = f(&tx)?;
        tx.commit()?;

        Ok(result)
    }
}
