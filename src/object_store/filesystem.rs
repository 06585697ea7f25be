use super::{ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{local::LocalFileSystem, ObjectStore as ObjStore};
use serde::Deserialize;

impl From<object_store::Error> for ObjectStoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => ObjectStoreError::NotFound,
            object_store::Error::AlreadyExists { .. } => ObjectStoreError::Exists,
            _ => ObjectStoreError::Internal(format!("{err}")),
        }
    }
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// The path of the directory that should contain the object files.
    pub path: String,
}

#[derive(Debug)]
pub struct Engine(LocalFileSystem);

impl Engine {
    pub async fn new(config: &Config) -> Result<Self, ObjectStoreError> {
        std::fs::create_dir_all(&config.path).map_err(|e| {
            ObjectStoreError::FailedInitPrecondition(format!(
                "could not create object store directory; {e}"
            ))
        })?;

        let store = LocalFileSystem::new_with_prefix(&config.path).map_err(|e| {
            ObjectStoreError::FailedInitPrecondition(format!(
                "could not open object store directory; {e}"
            ))
        })?;

        Ok(Engine(store))
    }
}

#[async_trait]
impl ObjectStore for Engine {
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = object_store::path::Path::from(key);

        match self.0.head(&path).await {
            Ok(_) => Ok(true),
            Err(e) => {
                if let object_store::Error::NotFound { .. } = e {
                    Ok(false)
                } else {
                    Err(ObjectStoreError::from(e))
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = object_store::path::Path::from(key);

        let result = self.0.get(&path).await?;
        let content = result
            .bytes()
            .await
            .map_err(|e| ObjectStoreError::Internal(format!("{e}")))?;

        Ok(content)
    }

    async fn put(
        &self,
        key: &str,
        content: Bytes,
        overwrite: bool,
    ) -> Result<(), ObjectStoreError> {
        let path = object_store::path::Path::from(key);

        if !overwrite && self.exists(key).await? {
            return Err(ObjectStoreError::Exists);
        }

        self.0.put(&path, content.into()).await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = object_store::path::Path::from(key);

        self.0.delete(&path).await?;

        Ok(())
    }
}
