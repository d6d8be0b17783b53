use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// The recognized keys of a cluster's credentials secret. At least one of
/// `hcloud_token` or `{hetzner_robot_user, hetzner_robot_password}` must be
/// present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsSecret {
    pub hcloud_token: Option<String>,
    pub hetzner_robot_user: Option<String>,
    pub hetzner_robot_password: Option<String>,
    pub ssh_key: Option<String>,
}

impl CredentialsSecret {
    /// Parse from a raw secret data map (as delivered by the Kubernetes API:
    /// base64-decoded byte values, here already decoded to UTF-8 strings by
    /// the caller).
    pub fn from_data(data: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let secret = CredentialsSecret {
            hcloud_token: data.get("hcloudToken").cloned(),
            hetzner_robot_user: data.get("hetznerRobotUser").cloned(),
            hetzner_robot_password: data.get("hetznerRobotPassword").cloned(),
            ssh_key: data.get("sshKey").cloned(),
        };
        secret.validate()?;
        Ok(secret)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_hcloud = self.hcloud_token.as_deref().is_some_and(|s| !s.is_empty());
        let has_robot = self.hetzner_robot_user.as_deref().is_some_and(|s| !s.is_empty())
            && self.hetzner_robot_password.as_deref().is_some_and(|s| !s.is_empty());
        if !has_hcloud && !has_robot {
            return Err(ConfigError::Credentials(
                "at least one of hcloudToken or hetznerRobotUser+hetznerRobotPassword must be set"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn robot_credentials(&self) -> Option<(&str, &str)> {
        match (&self.hetzner_robot_user, &self.hetzner_robot_password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

/// The recognized keys of an SSH secret referenced by a host's rescue/OS key
/// fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSecret {
    pub key_name: Option<String>,
    pub private_key: String,
    pub public_key: String,
}

impl SshSecret {
    pub fn from_data(data: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let private_key = data.get("ssh-privatekey").cloned().ok_or_else(|| {
            ConfigError::Credentials("ssh secret missing ssh-privatekey".into())
        })?;
        let public_key = data.get("ssh-publickey").cloned().ok_or_else(|| {
            ConfigError::Credentials("ssh secret missing ssh-publickey".into())
        })?;
        Ok(SshSecret { key_name: data.get("sshkey-name").cloned(), private_key, public_key })
    }

    /// SHA-256 hex digest of the concatenated private+public key bytes — the
    /// value persisted as `SecretStatus.data_hash` and compared every
    /// reconcile to detect rotation.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.private_key.as_bytes());
        hasher.update(self.public_key.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn credentials_requires_hcloud_or_robot_pair() {
        let empty = map(&[]);
        assert!(CredentialsSecret::from_data(&empty).is_err());

        let hcloud_only = map(&[("hcloudToken", "tok")]);
        assert!(CredentialsSecret::from_data(&hcloud_only).is_ok());

        let robot_incomplete = map(&[("hetznerRobotUser", "u")]);
        assert!(CredentialsSecret::from_data(&robot_incomplete).is_err());

        let robot_full = map(&[("hetznerRobotUser", "u"), ("hetznerRobotPassword", "p")]);
        assert!(CredentialsSecret::from_data(&robot_full).is_ok());
    }

    #[test]
    fn ssh_secret_digest_changes_with_key_material() {
        let a = SshSecret {
            key_name: None,
            private_key: "priv-a".into(),
            public_key: "pub-a".into(),
        };
        let b = SshSecret { private_key: "priv-b".into(), ..a.clone() };
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn ssh_secret_digest_stable_for_same_material() {
        let a = SshSecret { key_name: Some("n".into()), private_key: "p".into(), public_key: "q".into() };
        let b = SshSecret { key_name: Some("different-name".into()), private_key: "p".into(), public_key: "q".into() };
        // key_name (a label) doesn't affect key-material identity.
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn ssh_secret_requires_both_keys() {
        let missing_pub = map(&[("ssh-privatekey", "x")]);
        assert!(SshSecret::from_data(&missing_pub).is_err());
    }
}
