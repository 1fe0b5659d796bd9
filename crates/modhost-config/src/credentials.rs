//! Git credentials: the `[git]` TOML table and its resolved form.
//!
//! Password resolution order:
//! 1. Environment variable named by `password_env`
//! 2. Plaintext `password` (warned about at load time)

use serde::{Deserialize, Serialize};

/// Credentials as written in config, either globally (`[git]`) or per module
/// (`[modules.git]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Environment variable holding the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    /// Disable TLS certificate verification for this source.
    pub insecure: bool,
}

impl GitCredentials {
    /// Whether any field is set. An all-empty override table falls back to
    /// the global default.
    pub fn is_set(&self) -> bool {
        self.username.is_some()
            || self.password.is_some()
            || self.password_env.is_some()
            || self.insecure
    }

    pub fn has_plaintext_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Credentials {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Credentials {
        let from_env = self
            .password_env
            .as_deref()
            .and_then(&lookup)
            .filter(|v| !v.is_empty());
        Credentials {
            username: self.username.clone().filter(|u| !u.is_empty()),
            secret: from_env.or_else(|| self.password.clone().filter(|p| !p.is_empty())),
            insecure: self.insecure,
        }
    }
}

/// Resolved credentials handed to the source fetcher.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub secret: Option<String>,
    pub insecure: bool,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() && self.secret.is_none()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("insecure", &self.insecure)
            .finish()
    }
}
