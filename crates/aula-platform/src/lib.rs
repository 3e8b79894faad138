use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

/// Credential key of the bearer token used for REST calls and the
/// notification channel.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Credential key of the token exchanged for a fresh access token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialStoreError {
    #[error("credential not found")]
    NotFound,
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

pub trait CredentialStore: Send + Sync {
    fn set_credential(
        &self,
        service: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError>;

    fn get_credential(&self, service: &str, key: &str) -> Result<String, CredentialStoreError>;

    fn delete_credential(&self, service: &str, key: &str) -> Result<(), CredentialStoreError>;
}

/// Source of the session's bearer tokens.
///
/// A missing token is an ordinary answer (`None`), not an error.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String> {
        None
    }

    /// Persist a freshly issued access token.
    fn replace_access_token(&self, _token: &str) -> Result<(), CredentialStoreError> {
        Err(CredentialStoreError::Unavailable(
            "token provider is read-only".to_owned(),
        ))
    }

    /// Forget every token of the session.
    fn clear_session(&self) -> Result<(), CredentialStoreError> {
        Ok(())
    }
}

/// Process-local store, handy for tests and throwaway sessions.
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    slots: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryCredentialStore {
    // Service and key names never contain NUL.
    fn slot(service: &str, key: &str) -> String {
        format!("{service}\0{key}")
    }

    fn with_slots<T>(
        &self,
        apply: impl FnOnce(&mut HashMap<String, String>) -> Result<T, CredentialStoreError>,
    ) -> Result<T, CredentialStoreError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| CredentialStoreError::Backend("in-memory store lock poisoned".to_owned()))?;
        apply(&mut slots)
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn set_credential(
        &self,
        service: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError> {
        self.with_slots(|slots| {
            slots.insert(Self::slot(service, key), value.to_owned());
            Ok(())
        })
    }

    fn get_credential(&self, service: &str, key: &str) -> Result<String, CredentialStoreError> {
        self.with_slots(|slots| {
            slots
                .get(&Self::slot(service, key))
                .cloned()
                .ok_or(CredentialStoreError::NotFound)
        })
    }

    fn delete_credential(&self, service: &str, key: &str) -> Result<(), CredentialStoreError> {
        self.with_slots(|slots| {
            slots
                .remove(&Self::slot(service, key))
                .map(drop)
                .ok_or(CredentialStoreError::NotFound)
        })
    }
}

/// Credentials kept in one JSON file, `{"<service>": {"<key>": "<value>"}}`.
///
/// Writes go through a temp file and a rename so a crash never leaves a
/// half-written file behind.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Arc<RwLock<()>>,
}

type CredentialFile = HashMap<String, HashMap<String, String>>;

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<CredentialFile, CredentialStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CredentialFile::new());
            }
            Err(err) => {
                return Err(CredentialStoreError::Unavailable(format!(
                    "failed reading {}: {err}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&raw).map_err(|err| {
            CredentialStoreError::Backend(format!(
                "failed parsing {}: {err}",
                self.path.display()
            ))
        })
    }

    fn save(&self, contents: &CredentialFile) -> Result<(), CredentialStoreError> {
        let encoded = serde_json::to_vec_pretty(contents)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        write_atomically(&self.path, &encoded).map_err(|err| {
            CredentialStoreError::Unavailable(format!(
                "failed writing {}: {err}",
                self.path.display()
            ))
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn set_credential(
        &self,
        service: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        let mut contents = self.load()?;
        contents
            .entry(service.to_owned())
            .or_default()
            .insert(key.to_owned(), value.to_owned());
        self.save(&contents)
    }

    fn get_credential(&self, service: &str, key: &str) -> Result<String, CredentialStoreError> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        self.load()?
            .get(service)
            .and_then(|entries| entries.get(key))
            .cloned()
            .ok_or(CredentialStoreError::NotFound)
    }

    fn delete_credential(&self, service: &str, key: &str) -> Result<(), CredentialStoreError> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        let mut contents = self.load()?;
        let removed = contents
            .get_mut(service)
            .and_then(|entries| entries.remove(key));
        if removed.is_none() {
            return Err(CredentialStoreError::NotFound);
        }
        if contents.get(service).is_some_and(HashMap::is_empty) {
            contents.remove(service);
        }
        self.save(&contents)
    }
}

/// Replace `path` with `bytes` without ever exposing a partial file.
///
/// Missing parent directories are created. The bytes go to a sibling temp
/// file that is flushed and then renamed over the target.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let stem = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_owned());
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos());
    let staging = dir.join(format!(".{stem}.{}.{nonce}.partial", std::process::id()));

    let staged = fs::File::create(&staging).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(err) = staged {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }

    let mut renamed = fs::rename(&staging, path);
    if renamed.is_err() && path.exists() {
        // Rename cannot replace an existing file on every platform.
        renamed = fs::remove_file(path).and_then(|()| fs::rename(&staging, path));
    }
    if renamed.is_err() {
        let _ = fs::remove_file(&staging);
    }
    renamed
}

/// Store backed by the platform keychain (Keychain, Credential Manager or
/// Secret Service).
#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct OsKeyringCredentialStore;

#[cfg(feature = "os-keyring")]
impl OsKeyringCredentialStore {
    fn entry(service: &str, key: &str) -> Result<keyring::Entry, CredentialStoreError> {
        keyring::Entry::new(service, key).map_err(keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
fn keyring_error(err: keyring::Error) -> CredentialStoreError {
    match err {
        keyring::Error::NoEntry => CredentialStoreError::NotFound,
        keyring::Error::NoStorageAccess(inner) | keyring::Error::PlatformFailure(inner) => {
            CredentialStoreError::Unavailable(inner.to_string())
        }
        other => CredentialStoreError::Backend(other.to_string()),
    }
}

#[cfg(feature = "os-keyring")]
impl CredentialStore for OsKeyringCredentialStore {
    fn set_credential(
        &self,
        service: &str,
        key: &str,
        value: &str,
    ) -> Result<(), CredentialStoreError> {
        Self::entry(service, key)?
            .set_password(value)
            .map_err(keyring_error)
    }

    fn get_credential(&self, service: &str, key: &str) -> Result<String, CredentialStoreError> {
        Self::entry(service, key)?.get_password().map_err(keyring_error)
    }

    fn delete_credential(&self, service: &str, key: &str) -> Result<(), CredentialStoreError> {
        Self::entry(service, key)?
            .delete_credential()
            .map_err(keyring_error)
    }
}

/// Session tokens of one service kept in a [`CredentialStore`].
#[derive(Clone)]
pub struct SessionTokens<S: CredentialStore> {
    inner: S,
    service: String,
}

impl<S: CredentialStore> SessionTokens<S> {
    pub fn new(inner: S, service: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
        }
    }

    /// Store both tokens of a fresh login.
    pub fn store(&self, access: &str, refresh: Option<&str>) -> Result<(), CredentialStoreError> {
        self.inner
            .set_credential(&self.service, ACCESS_TOKEN_KEY, access)?;
        match refresh {
            Some(refresh) => self
                .inner
                .set_credential(&self.service, REFRESH_TOKEN_KEY, refresh),
            None => ignore_missing(self.inner.delete_credential(&self.service, REFRESH_TOKEN_KEY)),
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.inner
            .get_credential(&self.service, key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

impl<S: CredentialStore> TokenProvider for SessionTokens<S> {
    fn access_token(&self) -> Option<String> {
        self.lookup(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Option<String> {
        self.lookup(REFRESH_TOKEN_KEY)
    }

    fn replace_access_token(&self, token: &str) -> Result<(), CredentialStoreError> {
        self.inner
            .set_credential(&self.service, ACCESS_TOKEN_KEY, token)
    }

    fn clear_session(&self) -> Result<(), CredentialStoreError> {
        ignore_missing(self.inner.delete_credential(&self.service, ACCESS_TOKEN_KEY))?;
        ignore_missing(self.inner.delete_credential(&self.service, REFRESH_TOKEN_KEY))
    }
}

/// Token handed over from the environment; never refreshed or persisted.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|value| !value.trim().is_empty()))
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

fn ignore_missing(result: Result<(), CredentialStoreError>) -> Result<(), CredentialStoreError> {
    match result {
        Err(CredentialStoreError::NotFound) => Ok(()),
        other => other,
    }
}
