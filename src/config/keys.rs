use std::collections::HashMap;
use std::fmt;

/// Prefix of the versioned encryption secrets, e.g. `_APP_OPENSSL_KEY_V1`.
pub const KEY_ENV_PREFIX: &str = "_APP_OPENSSL_KEY_V";

/// Versioned encryption secrets used to open encrypted uploads.
#[derive(Clone, Default)]
pub struct KeyRing {
    keys: HashMap<String, String>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let keys = vars
            .into_iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(KEY_ENV_PREFIX)
                    .filter(|version| !version.is_empty())
                    .map(|version| (version.to_string(), value))
            })
            .collect();
        Self { keys }
    }

    pub fn with_key(mut self, version: impl Into<String>, secret: impl Into<String>) -> Self {
        self.keys.insert(version.into(), secret.into());
        self
    }

    pub fn get(&self, version: &str) -> Option<&str> {
        self.keys.get(version).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// Secrets never reach the logs.
impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut versions: Vec<&String> = self.keys.keys().collect();
        versions.sort();
        f.debug_struct("KeyRing").field("versions", &versions).finish()
    }
}
