//! Session credentials with memory-safe handling and masking
//!
//! Token acquisition is done elsewhere (keystone, a CLI login, a CI secret).
//! This module only carries the resulting token, using the `secrecy` crate
//! so it cannot leak into logs or `Debug` output.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;

/// Environment variable holding a pre-issued token
pub const TOKEN_ENV_VAR: &str = "OS_AUTH_TOKEN";

/// Credentials attached to every catalog and object-store request
#[derive(Clone, Default)]
pub struct Credentials {
    token: Option<SecretString>,
}

impl Credentials {
    /// No token; requests go out unauthenticated
    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            token: Some(SecretString::new(token.into())),
        }
    }

    /// Read the token from `OS_AUTH_TOKEN` in `env`; blank values count as absent
    ///
    /// # Examples
    ///
    /// ```
    /// use image_publisher::security::Credentials;
    /// use std::collections::HashMap;
    ///
    /// let env = HashMap::from([("OS_AUTH_TOKEN".to_string(), "gAAAAABk-token".to_string())]);
    /// assert!(Credentials::from_env(&env).has_token());
    /// assert!(!Credentials::from_env(&HashMap::new()).has_token());
    /// ```
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        match env.get(TOKEN_ENV_VAR).map(|t| t.trim()) {
            Some(token) if !token.is_empty() => Self::with_token(token),
            _ => Self::anonymous(),
        }
    }

    pub fn token(&self) -> Option<&SecretString> {
        self.token.as_ref()
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Masked form of the token, safe for logs
    pub fn masked(&self) -> String {
        match &self.token {
            Some(token) => mask_token(token.expose_secret()),
            None => "<none>".to_string(),
        }
    }

    /// Replace every occurrence of the token in `text` with its masked form
    pub fn mask_in(&self, text: &str) -> String {
        match &self.token {
            Some(token) if !token.expose_secret().is_empty() => {
                let secret = token.expose_secret();
                text.replace(secret, &mask_token(secret))
            }
            _ => text.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.masked())
            .finish()
    }
}

/// Masks a token for safe logging
///
/// Shows only the first 3 and last 3 characters for identification purposes.
/// Tokens shorter than 10 characters are fully masked as "****".
pub fn mask_token(token: &str) -> String {
    if token.chars().count() < 10 {
        return "****".to_string();
    }

    let chars: Vec<char> = token.chars().collect();
    let prefix: String = chars[..3].iter().collect();
    let suffix: String = chars[chars.len() - 3..].iter().collect();
    format!("{}...{}", prefix, suffix)
}
