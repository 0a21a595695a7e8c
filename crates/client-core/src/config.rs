//! Client configuration
//!
//! [`Settings`] carries everything the orchestration layer needs to know
//! about the local account and the filesystem layout for persisted
//! artifacts. It derives serde so the binary can load it from a TOML file,
//! and offers builder-style `with_` methods for programmatic construction.
//!
//! # Examples
//!
//! ```rust
//! use sipterm_client_core::config::{AccountSettings, Settings};
//!
//! let settings = Settings::new()
//!     .with_account(AccountSettings::new("alice", "example.com"))
//!     .with_download_directory("/tmp/downloads")
//!     .with_accept_timeout(30);
//!
//! assert_eq!(settings.account.user, "alice");
//! assert_eq!(settings.accept_timeout_secs, 30);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{AccountId, SipAddress};

/// Identity of the local account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    /// User part of the account address
    pub user: String,
    /// Host part of the account address
    pub host: String,
    /// Signaling port, if not the protocol default
    pub port: Option<u16>,
    /// Display name shown to remote parties
    pub display_name: Option<String>,
    /// Whether the account registers with the engine on startup
    pub register: bool,
}

impl AccountSettings {
    /// Create account settings for `user@host`
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port: None,
            display_name: None,
            register: true,
        }
    }

    /// Set the display name
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// The account identity as `user@host`
    pub fn id(&self) -> AccountId {
        AccountId(format!("{}@{}", self.user, self.host))
    }

    /// The account identity as an address, including display name and port
    pub fn address(&self) -> SipAddress {
        SipAddress {
            user: self.user.clone(),
            host: self.host.clone(),
            port: self.port,
            display: self.display_name.clone(),
        }
    }
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self::new("anonymous", "localhost")
    }
}

/// Trace categories enabled at startup
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    /// Dump signaling protocol traffic
    pub sip: bool,
    /// Dump media/data channel traffic
    pub media: bool,
    /// Print engine event notifications
    pub events: bool,
}

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Local account identity
    pub account: AccountSettings,
    /// Directory where incoming file transfers are stored
    pub download_directory: PathBuf,
    /// Root directory for per-identity chat history logs
    pub history_directory: PathBuf,
    /// Deadline for accepting an incoming session, in seconds
    pub accept_timeout_secs: u64,
    /// Trace categories enabled at startup
    pub trace: TraceSettings,
}

impl Settings {
    /// Create settings with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local account
    pub fn with_account(mut self, account: AccountSettings) -> Self {
        self.account = account;
        self
    }

    /// Set the download directory
    pub fn with_download_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.download_directory = dir.as_ref().to_path_buf();
        self
    }

    /// Set the history log root directory
    pub fn with_history_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.history_directory = dir.as_ref().to_path_buf();
        self
    }

    /// Set the incoming-session accept deadline, in seconds
    pub fn with_accept_timeout(mut self, seconds: u64) -> Self {
        self.accept_timeout_secs = seconds;
        self
    }

    /// The accept deadline as a [`Duration`]
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            account: AccountSettings::default(),
            download_directory: PathBuf::from("downloads"),
            history_directory: PathBuf::from("history"),
            accept_timeout_secs: 30,
            trace: TraceSettings::default(),
        }
    }
}
