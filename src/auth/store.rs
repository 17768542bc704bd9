use std::{
    path::PathBuf,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{CloudError, auth::Token, config::ConfigFile, error};

/// Where the session reads its token from and writes refreshed tokens to.
pub trait CredentialStore: Send + Sync + 'static {
    fn load(&self) -> Result<Option<Token>, CloudError>;

    fn save(&self, token: &Token) -> Result<(), CloudError>;
}

/// Keeps the token in process memory. Counts saves so callers can observe
/// how many times a token was persisted.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<Token>>,
    saves: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new(token: Option<Token>) -> Self {
        Self {
            token: Mutex::new(token),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Token>, CloudError> {
        let guard = self
            .token
            .lock()
            .map_err(|_| error!("credential store lock poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, token: &Token) -> Result<(), CloudError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|_| error!("credential store lock poisoned"))?;
        *guard = Some(token.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Stores the token under the `token` key of the CLI config file, leaving
/// the other keys as they are.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Token>, CloudError> {
        Ok(ConfigFile::load(&self.path)?.token)
    }

    fn save(&self, token: &Token) -> Result<(), CloudError> {
        ConfigFile::update(&self.path, |cfg| cfg.token = Some(token.clone()))?;
        Ok(())
    }
}
