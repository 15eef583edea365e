use crate::error::KvRelError;
use std::sync::Arc;
use zeroize::Zeroizing;

pub const DEFAULT_URL: &str = "http://localhost:8079";
pub const DEFAULT_BATCH_CHUNK_ROWS: usize = 1_000;
pub const MAX_BATCH_CHUNK_ROWS: usize = 50_000;

pub const ENV_URL: &str = "KVREL_URL";
pub const ENV_TOKEN: &str = "KVREL_TOKEN";
pub const ENV_KEY_PREFIX: &str = "KVREL_KEY_PREFIX";
pub const ENV_BATCH_CHUNK_ROWS: &str = "KVREL_BATCH_CHUNK_ROWS";

/// Connection and tuning options recognized when a store is opened.
#[derive(Clone)]
pub struct StoreConfig {
    /// Backend endpoint.
    pub url: String,
    /// Auth credential, zeroized when the last copy of the config drops.
    pub token: Arc<Zeroizing<String>>,
    /// Prepended to every physical key so several stores can share a backend.
    pub key_prefix: Option<String>,
    /// Rows written per backend round trip in `batch_insert`.
    pub batch_chunk_rows: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            token: Arc::new(Zeroizing::new(String::new())),
            key_prefix: None,
            batch_chunk_rows: DEFAULT_BATCH_CHUNK_ROWS,
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("key_prefix", &self.key_prefix)
            .field("batch_chunk_rows", &self.batch_chunk_rows)
            .finish()
    }
}

impl StoreConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: Arc::new(Zeroizing::new(token.into())),
            ..Self::default()
        }
    }

    /// Builds a config from `KVREL_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, KvRelError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, KvRelError> {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_URL) {
            config.url = url;
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            config.token = Arc::new(Zeroizing::new(token));
        }
        config.key_prefix = lookup(ENV_KEY_PREFIX).filter(|p| !p.is_empty());
        if let Some(raw) = lookup(ENV_BATCH_CHUNK_ROWS) {
            config.batch_chunk_rows =
                raw.trim()
                    .parse::<usize>()
                    .map_err(|e| KvRelError::InvalidConfig {
                        message: format!("{ENV_BATCH_CHUNK_ROWS}='{raw}' is not a number: {e}"),
                    })?;
        }
        Ok(config)
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_batch_chunk_rows(mut self, rows: usize) -> Self {
        self.batch_chunk_rows = rows;
        self
    }

    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }
}

pub(crate) fn validate_config(config: &StoreConfig) -> Result<(), KvRelError> {
    let url = config.url.trim();
    if url.is_empty() {
        return Err(KvRelError::InvalidConfig {
            message: "url must not be empty".into(),
        });
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(KvRelError::InvalidConfig {
            message: format!("url '{url}' must use http:// or https://"),
        });
    }
    if config.batch_chunk_rows == 0 || config.batch_chunk_rows > MAX_BATCH_CHUNK_ROWS {
        return Err(KvRelError::InvalidConfig {
            message: format!("batch_chunk_rows must be in 1..={MAX_BATCH_CHUNK_ROWS}"),
        });
    }
    if let Some(prefix) = &config.key_prefix
        && (prefix.is_empty() || prefix.starts_with("__"))
    {
        return Err(KvRelError::InvalidConfig {
            message: "key_prefix must be non-empty and must not start with '__'".into(),
        });
    }
    Ok(())
}
