use super::{SecretManager, SecretString};
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Memoizes resolved secrets so hot paths never touch the keychain.
///
/// Providers hold a clone and call [`SecretCache::get_secret`] per request.
#[derive(Clone)]
pub struct SecretCache {
    manager: Arc<SecretManager>,
    cache: Arc<RwLock<HashMap<String, SecretString>>>,
}

impl SecretCache {
    pub fn new(manager: Arc<SecretManager>) -> Self {
        Self {
            manager,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Cache pre-filled with fixed values, ahead of any environment lookup
    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let cache = Self::new(Arc::new(SecretManager::new("sakhi-fixed")));
        {
            let mut map = cache.cache.write().unwrap_or_else(|e| e.into_inner());
            for (k, v) in values {
                map.insert(k.to_string(), SecretString::new(v));
            }
        }
        cache
    }

    pub fn get_secret(&self, key: &str) -> Result<SecretString, EngineError> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(secret) = cache.get(key) {
                return Ok(secret.clone());
            }
        }

        let secret = SecretString::new(self.manager.get_secret(key)?);

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), secret.clone());

        Ok(secret)
    }

    /// Resolve `keys` up front so a missing credential fails at startup
    pub fn preload(&self, keys: &[&str]) -> Result<(), EngineError> {
        for key in keys {
            self.get_secret(key)?;
        }
        Ok(())
    }
}
