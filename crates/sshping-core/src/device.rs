//! Resolved devices.

use std::path::PathBuf;

use crate::config::FeatureToggles;
use crate::transport::ssh::SshOptions;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// How the transport authenticates against a device.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password {
        username: String,
        password: String,
    },
    /// Public key authentication. `None` uses the client's default identities.
    Key {
        username: String,
        key_file: Option<PathBuf>,
    },
}

impl AuthMethod {
    pub fn username(&self) -> &str {
        match self {
            AuthMethod::Password { username, .. } | AuthMethod::Key { username, .. } => username,
        }
    }

    /// Writes the credentials into a transport option set.
    pub fn apply(&self, options: &mut SshOptions) {
        options.username = self.username().to_string();
        match self {
            AuthMethod::Password { password, .. } => {
                options.password = Some(password.clone());
                options.identity_file = None;
            }
            AuthMethod::Key { key_file, .. } => {
                options.password = None;
                options.identity_file = key_file.clone();
            }
        }
    }
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AuthMethod::Key { username, key_file } => f
                .debug_struct("Key")
                .field("username", username)
                .field("key_file", key_file)
                .finish(),
        }
    }
}

/// A device to probe. Immutable once built; owned by a configuration generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub host: String,
    pub port: u16,
    pub auth: AuthMethod,
    /// Effective toggles (global merged with the device's overrides).
    pub features: FeatureToggles,
}

impl Device {
    /// Password-authenticated device with every feature inheriting defaults.
    pub fn with_password(host: impl Into<String>, username: &str, password: &str) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            auth: AuthMethod::Password {
                username: username.to_string(),
                password: password.to_string(),
            },
            features: FeatureToggles::default(),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let device = Device::with_password("sw1", "netops", "hunter2");
        let rendered = format!("{:?}", device);
        assert!(rendered.contains("netops"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_apply_switches_auth_kind() {
        let mut options = SshOptions::default();
        AuthMethod::Password {
            username: "a".to_string(),
            password: "pw".to_string(),
        }
        .apply(&mut options);
        assert_eq!(options.password.as_deref(), Some("pw"));

        AuthMethod::Key {
            username: "b".to_string(),
            key_file: Some(PathBuf::from("/keys/id")),
        }
        .apply(&mut options);
        assert_eq!(options.username, "b");
        assert!(options.password.is_none());
        assert_eq!(options.identity_file, Some(PathBuf::from("/keys/id")));
    }
}
