use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base64 encoding of `{}`, what the Docker CLI sends when it has no credentials for a registry.
pub static EMPTY_JSON_AUTH: &str = "e30=";

/// Wrapper for secret strings (passwords, tokens) that prints "<REDACTED, length {n}>" for Debug/Display
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        SecretString(s)
    }

    /// Access the raw secret if explicitly needed
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<REDACTED, length {}>", self.0.len())
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Registry credentials in the `X-Registry-Auth` wire encoding used by the Docker Engine API.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedAuth(SecretString);

#[derive(Serialize)]
struct AuthConfig<'a> {
    username: &'a str,
    password: &'a str,
    serveraddress: &'a str,
}

impl EncodedAuth {
    pub fn new(encoded: impl Into<String>) -> Self {
        EncodedAuth(SecretString::new(encoded.into()))
    }

    pub fn empty() -> Self {
        Self::new(EMPTY_JSON_AUTH)
    }

    pub fn from_credentials(
        username: &str,
        password: &SecretString,
        server_address: &str,
    ) -> serde_json::Result<Self> {
        let json = serde_json::to_vec(&AuthConfig {
            username,
            password: password.expose_secret(),
            serveraddress: server_address,
        })?;
        Ok(Self::new(URL_SAFE.encode(json)))
    }

    /// True when the payload only encodes an empty JSON object.
    pub fn is_empty_json(&self) -> bool {
        self.0.expose_secret() == EMPTY_JSON_AUTH
    }

    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for EncodedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedAuth({:?})", self.0)
    }
}
