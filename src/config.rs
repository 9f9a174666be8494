//! Configuration options for prefixkv.
//!
//! Options can be built in code, loaded from a JSON file, or patched from a
//! comma-separated `key=value` string such as
//! `"scan_batch_size=512,timeout_ms=2000"`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default number of entries fetched per backend scan page.
pub const DEFAULT_SCAN_BATCH_SIZE: u32 = 256;

/// The backend a database connects to when opened with [`DB::open`](crate::DB::open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A fresh in-process [`MemoryBackend`](crate::backend::MemoryBackend).
    #[default]
    Memory,

    /// A TiKV cluster reached through its placement driver endpoints.
    Tikv,
}

impl BackendKind {
    /// Parses a backend name (`"memory"` or `"tikv"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "memory" => Some(BackendKind::Memory),
            "tikv" => Some(BackendKind::Tikv),
            _ => None,
        }
    }
}

/// Configuration options for opening a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Backend to connect to.
    /// Default: BackendKind::Memory
    pub backend: BackendKind,

    /// Placement driver addresses of the TiKV cluster.
    /// Default: empty
    pub pd_endpoints: Vec<String>,

    /// Entries fetched per scan request by paging backends.
    /// Default: 256
    pub scan_batch_size: u32,

    /// Request timeout in milliseconds for remote backends.
    /// Default: None (client default)
    pub timeout_ms: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            pd_endpoints: Vec::new(),
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            timeout_ms: None,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backend.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the placement driver endpoints.
    pub fn pd_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.pd_endpoints = endpoints;
        self
    }

    /// Sets the scan page size.
    pub fn scan_batch_size(mut self, size: u32) -> Self {
        self.scan_batch_size = size;
        self
    }

    /// Sets the request timeout in milliseconds.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Parses options from a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Options = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Applies a comma-separated `key=value` option string.
    ///
    /// Recognized keys: `backend`, `pd_endpoints` (`;`-separated),
    /// `scan_batch_size`, `timeout_ms`. An empty string changes nothing.
    pub fn apply_opt_params(mut self, params: &str) -> Result<Self> {
        for (key, value) in parse_opt_params(params)? {
            match key.as_str() {
                "backend" => {
                    self.backend = BackendKind::from_name(&value).ok_or_else(|| {
                        Error::invalid_argument(format!("unknown backend '{}'", value))
                    })?;
                }
                "pd_endpoints" => {
                    self.pd_endpoints = value
                        .split(';')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect();
                }
                "scan_batch_size" => self.scan_batch_size = parse_number(&key, &value)?,
                "timeout_ms" => self.timeout_ms = Some(parse_number(&key, &value)?),
                _ => {
                    return Err(Error::invalid_argument(format!("unknown option '{}'", key)));
                }
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.scan_batch_size == 0 {
            return Err(Error::invalid_argument("scan_batch_size must be > 0"));
        }
        if self.backend == BackendKind::Tikv && self.pd_endpoints.is_empty() {
            return Err(Error::invalid_argument("tikv backend requires pd_endpoints"));
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::invalid_argument("timeout_ms must be > 0"));
        }
        Ok(())
    }
}

/// Splits `"a=1,b=2"` into a map. Whitespace around keys and values is
/// trimmed.
pub fn parse_opt_params(params: &str) -> Result<HashMap<String, String>> {
    let mut opts = HashMap::new();
    if params.trim().is_empty() {
        return Ok(opts);
    }
    for pair in params.split(',') {
        let mut parts = pair.split('=');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) if !key.trim().is_empty() => {
                opts.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => {
                return Err(Error::invalid_argument(format!(
                    "invalid option '{}', expected 'key=value,key=value'",
                    pair
                )));
            }
        }
    }
    Ok(opts)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::invalid_argument(format!("option '{}' expects a number", key)))
}
