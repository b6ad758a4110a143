//! Server descriptor and username normalization
//!
//! A [`ServerDescriptor`] holds the connection parameters for one remote
//! host. Descriptors written as JSON by older tooling may carry the
//! username under either `username` or `userName`; [`ServerDescriptor::normalize`]
//! folds the two spellings into the canonical `username` field once, at the
//! boundary, before any connection is attempted.

use serde::Deserialize;

/// Connection parameters for one remote server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerDescriptor {
    /// Remote hostname or IP address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Canonical username for authentication
    pub username: Option<String>,

    /// Accepted alias for `username`; consulted only by `normalize()`
    #[serde(rename = "userName")]
    pub user_name: Option<String>,

    /// Password for password authentication (also answers sudo prompts)
    pub password: Option<String>,

    /// Private key content in OpenSSH format (not a path)
    #[serde(rename = "privateKey")]
    pub private_key: Option<String>,

    /// Passphrase for an encrypted private key
    #[serde(rename = "passphrase")]
    pub key_passphrase: Option<String>,
}

impl Default for ServerDescriptor {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: None,
            user_name: None,
            password: None,
            private_key: None,
            key_passphrase: None,
        }
    }
}

impl ServerDescriptor {
    /// Create a new descriptor for the given host, with defaults elsewhere
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the canonical username
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the username through its accepted alias field
    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set private key authentication (key content, not path)
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Set the passphrase for an encrypted private key
    pub fn with_key_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.key_passphrase = Some(passphrase.into());
        self
    }

    /// Populate the canonical `username` field from whichever spelling is
    /// present, preferring `username`. No other field is altered; a
    /// descriptor missing both spellings passes through unchanged and is
    /// rejected later by authentication. Idempotent.
    pub fn normalize(&mut self) {
        if self.username.is_none() {
            self.username = self.user_name.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let server = ServerDescriptor::new("192.168.1.1")
            .with_port(2222)
            .with_username("admin")
            .with_password("secret");

        assert_eq!(server.host, "192.168.1.1");
        assert_eq!(server.port, 2222);
        assert_eq!(server.username, Some("admin".to_string()));
        assert!(server.private_key.is_none());
    }

    #[test]
    fn test_normalize_prefers_canonical_field() {
        let mut server = ServerDescriptor::new("h")
            .with_username("canonical")
            .with_user_name("alias");
        server.normalize();
        assert_eq!(server.username, Some("canonical".to_string()));
    }

    #[test]
    fn test_normalize_falls_back_to_alias() {
        let mut server = ServerDescriptor::new("h").with_user_name("alias");
        server.normalize();
        assert_eq!(server.username, Some("alias".to_string()));
        // the alias field itself is left untouched
        assert_eq!(server.user_name, Some("alias".to_string()));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut server = ServerDescriptor::new("h").with_username("admin");
        let before = server.clone();
        server.normalize();
        server.normalize();
        assert_eq!(server.username, before.username);
        assert_eq!(server.user_name, before.user_name);
    }

    #[test]
    fn test_normalize_passes_missing_username_through() {
        let mut server = ServerDescriptor::new("h");
        server.normalize();
        assert!(server.username.is_none());
    }

    #[test]
    fn test_deserialize_user_name_alias() {
        let server: ServerDescriptor =
            serde_json::from_str(r#"{"host":"h","userName":"admin","password":"p"}"#)
                .expect("valid descriptor json");
        let mut server = server;
        server.normalize();
        assert_eq!(server.username, Some("admin".to_string()));
        assert_eq!(server.port, 22);
    }

    #[test]
    fn test_deserialize_ignores_unknown_transport_options() {
        let server: ServerDescriptor = serde_json::from_str(
            r#"{"host":"h","username":"u","readyTimeout":20000,"keepaliveInterval":1000}"#,
        )
        .expect("unknown fields tolerated");
        assert_eq!(server.host, "h");
    }
}
