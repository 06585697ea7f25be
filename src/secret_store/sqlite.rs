use super::{SecretStore, SecretStoreError};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead},
    Aes256Gcm, KeyInit,
};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;
use std::path::Path;

const NONCE_SIZE: usize = 12; // Standard nonce size for AES-GCM

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    pub path: String,

    /// Must be 32 characters long.
    pub encryption_key: String,
}

#[derive(Debug, Clone)]
pub struct Engine {
    pool: Pool<SqliteConnectionManager>,
    encryption_key: String,
}

fn map_rusqlite_error(e: rusqlite::Error) -> SecretStoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => SecretStoreError::NotFound,
        rusqlite::Error::SqliteFailure(err, message) => match err.extended_code {
            1555 | 2067 => SecretStoreError::Exists,
            _ => SecretStoreError::Internal(format!(
                "Error occurred while running secret store query; [{}] {}",
                err.extended_code,
                message.unwrap_or_default()
            )),
        },
        _ => SecretStoreError::Internal(format!(
            "Error occurred while running secret store query; {e}"
        )),
    }
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self, SecretStoreError> {
        if config.encryption_key.len() != 32 {
            return Err(SecretStoreError::FailedInitPrecondition(
                "secret_store.sqlite.encryption_key must be exactly 32 characters".into(),
            ));
        }

        let path = Path::new(&config.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SecretStoreError::FailedInitPrecondition(format!(
                    "could not create secret store directory; {e}"
                ))
            })?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;",
            )
        });

        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| SecretStoreError::Internal(format!("{e}")))?;

        let conn = pool
            .get()
            .map_err(|e| SecretStoreError::Internal(format!("{e}")))?;

        conn.execute_batch(
            r#"CREATE TABLE IF NOT EXISTS secrets (
    key   TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (key)
) STRICT;"#,
        )
        .map_err(map_rusqlite_error)?;

        drop(conn);

        Ok(Engine {
            pool,
            encryption_key: config.encryption_key.clone(),
        })
    }

    fn conn(
        &self,
    ) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, SecretStoreError> {
        self.pool
            .get()
            .map_err(|e| SecretStoreError::Internal(format!("{e}")))
    }
}

/// Encrypt a plaintext value. The random nonce is prepended to the resulting ciphertext so
/// decryption is self-contained.
fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SecretStoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SecretStoreError::FailedEncryption(format!("{e}")))?;

    let mut n = vec![0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut n);
    let nonce = GenericArray::from_slice(&n);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SecretStoreError::FailedEncryption(format!("{e}")))?;

    let mut result = n;
    result.extend(ciphertext);

    Ok(result)
}

fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, SecretStoreError> {
    if ciphertext.len() < NONCE_SIZE {
        return Err(SecretStoreError::FailedEncryption(
            "ciphertext too short to contain nonce".into(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SecretStoreError::FailedEncryption(format!("{e}")))?;

    let (n, ciphertext) = ciphertext.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(n);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| SecretStoreError::FailedEncryption(format!("{e}")))
}

#[async_trait]
impl SecretStore for Engine {
    async fn get(&self, key: &str) -> Result<Vec<u8>, SecretStoreError> {
        let conn = self.conn()?;

        let value: Vec<u8> = conn
            .query_row("SELECT value FROM secrets WHERE key = ?1;", [key], |row| {
                row.get(0)
            })
            .map_err(map_rusqlite_error)?;

        decrypt(self.encryption_key.as_bytes(), &value)
    }

    async fn put(&self, key: &str, value: &str, overwrite: bool) -> Result<(), SecretStoreError> {
        let encrypted = encrypt(self.encryption_key.as_bytes(), value.as_bytes())?;

        let conn = self.conn()?;

        let sql = if overwrite {
            "INSERT OR REPLACE INTO secrets (key, value) VALUES (?1, ?2);"
        } else {
            "INSERT INTO secrets (key, value) VALUES (?1, ?2);"
        };

        conn.execute(sql, rusqlite::params![key, encrypted])
            .map_err(map_rusqlite_error)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        let conn = self.conn()?;

        conn.execute("DELETE FROM secrets WHERE key = ?1;", [key])
            .map_err(map_rusqlite_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(&Config {
            path: dir
                .path()
                .join("secrets.db")
                .to_string_lossy()
                .to_string(),
            encryption_key: "changemechangemechangemechangeme".into(),
        })
        .unwrap();

        (dir, engine)
    }

    #[tokio::test]
    async fn values_round_trip_through_encryption() {
        let (_dir, engine) = test_engine();

        engine
            .put("default_simple_api_key", "hunter2", false)
            .await
            .unwrap();

        let value = engine.get("default_simple_api_key").await.unwrap();
        assert_eq!(String::from_utf8_lossy(&value), "hunter2");

        // The raw row must not contain the plaintext.
        let conn = engine.conn().unwrap();
        let raw: Vec<u8> = conn
            .query_row(
                "SELECT value FROM secrets WHERE key = 'default_simple_api_key';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(raw, b"hunter2".to_vec());
    }

    #[tokio::test]
    async fn put_without_overwrite_collides() {
        let (_dir, engine) = test_engine();

        engine
            .put("default_simple_api_key", "hunter2", false)
            .await
            .unwrap();

        assert_eq!(
            engine
                .put("default_simple_api_key", "other", false)
                .await
                .unwrap_err(),
            SecretStoreError::Exists
        );
    }

    #[tokio::test]
    async fn missing_keys_return_not_found() {
        let (_dir, engine) = test_engine();

        assert_eq!(
            engine.get("missing").await.unwrap_err(),
            SecretStoreError::NotFound
        );
    }
}
