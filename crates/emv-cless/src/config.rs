//! Terminal configuration
//!
//! Loaded from JSON and validated once at start-up. Everything the decision
//! flow reads from the terminal menu lives here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use emv_ca_keys::{CaKeyError, CaKeyStore};
use emv_card::PresentmentPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::black_list::{BlackList, BlackListEntry, BlackListError};

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    BlackList(#[from] BlackListError),
    #[error(transparent)]
    CaKeys(#[from] CaKeyError),
}

/// Where the kernel's blocking transaction call runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Dedicated worker thread, peripherals scanned concurrently
    #[default]
    Forked,
    /// On the calling thread, no peripheral scanning
    Inline,
}

/// Card re-presentment bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentmentConfig {
    pub max_cycles: u32,
    pub detect_timeout_ms: u64,
}

impl Default for PresentmentConfig {
    fn default() -> Self {
        Self {
            max_cycles: 20,
            detect_timeout_ms: 1000,
        }
    }
}

impl PresentmentConfig {
    pub fn policy(&self) -> PresentmentPolicy {
        PresentmentPolicy {
            max_cycles: self.max_cycles,
            detect_timeout: Duration::from_millis(self.detect_timeout_ms),
        }
    }
}

/// Online PIN entry timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub first_key_timeout_ms: u64,
    pub inter_key_timeout_ms: u64,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            first_key_timeout_ms: 30_000,
            inter_key_timeout_ms: 10_000,
        }
    }
}

/// Terminal configuration for the contactless flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Merchant display language, two letters
    pub merchant_language: String,

    /// Languages offered to the cardholder, in preference order
    pub supported_languages: Vec<String>,

    /// Deny list checked during the black-list customisation step
    pub black_list: Vec<BlackListEntry>,

    /// Tab-separated CA public key list
    pub ca_keys_file: Option<PathBuf>,

    /// Application type the kernel calls back for customisation
    pub application_type: u16,

    /// Service the kernel calls back for customisation
    pub customisation_service_id: u16,

    /// Regional mode: a kernel error restarts without contactless
    /// instead of showing an error
    pub alternate_region_mode: bool,

    /// Alternate GUI sequences (available amount, KO sequence)
    pub asia_gui_mode: bool,

    /// Unattended test loop: signatures are accepted automatically
    pub loop_mode: bool,

    /// Dump the exchange buffer after the kernel returns
    pub dump_transaction_data: bool,

    /// Dump the whole kernel database after each finished transaction
    pub dump_database: bool,

    pub presentment: PresentmentConfig,

    pub pin: PinConfig,

    pub execution: ExecutionMode,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            merchant_language: "en".to_string(),
            supported_languages: vec!["en".to_string(), "fr".to_string()],
            black_list: Vec::new(),
            ca_keys_file: None,
            application_type: 0x0001,
            customisation_service_id: 0x0100,
            alternate_region_mode: false,
            asia_gui_mode: false,
            loop_mode: false,
            dump_transaction_data: false,
            dump_database: false,
            presentment: PresentmentConfig::default(),
            pin: PinConfig::default(),
            execution: ExecutionMode::default(),
        }
    }
}

impl TerminalConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_language_code(&self.merchant_language) {
            return Err(ConfigError::Invalid(format!(
                "merchant_language must be two ASCII letters, got {:?}",
                self.merchant_language
            )));
        }
        if let Some(code) = self
            .supported_languages
            .iter()
            .find(|code| !is_language_code(code))
        {
            return Err(ConfigError::Invalid(format!(
                "supported_languages entries must be two ASCII letters, got {code:?}"
            )));
        }
        if self.presentment.max_cycles == 0 {
            return Err(ConfigError::Invalid(
                "presentment.max_cycles must be > 0".to_string(),
            ));
        }
        if self.presentment.detect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "presentment.detect_timeout_ms must be > 0".to_string(),
            ));
        }
        BlackList::new(self.black_list.clone())?;
        Ok(())
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Build the deny list
    pub fn build_black_list(&self) -> Result<BlackList, ConfigError> {
        Ok(BlackList::new(self.black_list.clone())?)
    }

    /// Load the configured CA keys, or an empty store if none are configured
    pub fn load_ca_keys(&self) -> Result<CaKeyStore, ConfigError> {
        match &self.ca_keys_file {
            Some(path) => Ok(CaKeyStore::from_file(path)?),
            None => Ok(CaKeyStore::empty()),
        }
    }

    /// Supported languages as written into the kernel tag
    pub fn supported_languages_bytes(&self) -> Vec<u8> {
        self.supported_languages
            .iter()
            .flat_map(|code| code.to_ascii_lowercase().into_bytes())
            .collect()
    }
}

fn is_language_code(code: &str) -> bool {
    code.len() == 2 && code.bytes().all(|b| b.is_ascii_alphabetic())
}
