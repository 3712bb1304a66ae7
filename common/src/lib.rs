use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

#[macro_use]
pub mod macros;
pub mod log_setup;

#[derive(Clone, Debug)]
pub struct Shared<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, T> {
        self.inner.lock().await
    }

    pub async fn lock_owned(&self) -> tokio::sync::OwnedMutexGuard<T> {
        self.inner.clone().lock_owned().await
    }

    pub fn try_lock(&self) -> Result<tokio::sync::MutexGuard<'_, T>, tokio::sync::TryLockError> {
        self.inner.try_lock()
    }

    pub fn get_mut(&mut self) -> &mut T {
        Arc::get_mut(&mut self.inner)
            .expect("Shared::get_mut requires unique ownership of the inner Arc")
            .get_mut()
    }

    pub fn arc(&self) -> Arc<Mutex<T>> {
        Arc::clone(&self.inner)
    }
}

impl<T> std::ops::Deref for Shared<T> {
    type Target = Arc<Mutex<T>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T> From<Arc<Mutex<T>>> for Shared<T> {
    fn from(inner: Arc<Mutex<T>>) -> Self {
        Self { inner }
    }
}

impl<T> Default for Shared<T>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse {path} as JSON: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Read a JSON document from disk into a typed value.
pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> DocumentResult<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| DocumentError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Doc {
        name: String,
        count: i64,
    }

    #[test]
    fn read_json_parses_typed_documents() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"name": "composite", "count": 3}"#)?;

        let read: Doc = read_json(&path)?;
        assert_eq!(
            read,
            Doc {
                name: "composite".to_string(),
                count: 3,
            }
        );

        Ok(())
    }

    #[test]
    fn read_json_missing_file_errors() {
        let err = read_json::<Doc, _>("no/such/file.json").unwrap_err();
        assert!(matches!(err, DocumentError::Read { .. }));
    }

    #[tokio::test]
    async fn shared_lock() {
        let shared = Shared::new(1i64);
        *shared.lock().await += 1;
        assert_eq!(*shared.lock().await, 2);
    }
}
