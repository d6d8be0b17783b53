use std::collections::HashMap;
use std::path::{Path, PathBuf};

use caph_domain::NamespacedName;

use crate::error::ConfigError;
use crate::secret::{CredentialsSecret, SshSecret};

/// Loads a secret's key-value data from disk, mirroring the layout a
/// Kubernetes mounted-secret volume projects: `<root>/<namespace>/<name>/<key>`,
/// one file per key, file contents the raw value. There is no Kubernetes API
/// client here — this resolver is the boundary a real deployment would
/// replace with a `kube`-backed one without changing any reconciler code.
pub struct SecretResolver {
    root: PathBuf,
}

impl SecretResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_dir_data(&self, secret: &NamespacedName) -> Result<HashMap<String, String>, ConfigError> {
        let dir = self.root.join(secret.namespace.as_str()).join(secret.name.as_str());
        let entries = std::fs::read_dir(&dir).map_err(|e| ConfigError::Io { path: dir.display().to_string(), source: e })?;

        let mut data = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| ConfigError::Io { path: dir.display().to_string(), source: e })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(key) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let value = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io { path: path.display().to_string(), source: e })?;
            data.insert(key.to_string(), value.trim_end_matches('\n').to_string());
        }
        Ok(data)
    }

    pub fn credentials(&self, secret: &NamespacedName) -> Result<CredentialsSecret, ConfigError> {
        CredentialsSecret::from_data(&self.read_dir_data(secret)?)
    }

    /// Read one raw key's value out of an arbitrary secret — used for the
    /// bootstrap-supplied user-data payload, which carries no fixed key
    /// naming convention of its own the way credentials/SSH secrets do.
    pub fn raw_key(&self, secret: &NamespacedName, key: &str) -> Result<Vec<u8>, ConfigError> {
        let path = self.root.join(secret.namespace.as_str()).join(secret.name.as_str()).join(key);
        std::fs::read(&path).map_err(|e| ConfigError::Io { path: path.display().to_string(), source: e })
    }

    pub fn ssh_secret(&self, secret: &NamespacedName) -> Result<SshSecret, ConfigError> {
        SshSecret::from_data(&self.read_dir_data(secret)?)
    }
}

/// True if `dir` looks like a valid secret directory for `name` under this
/// resolver's root — used by the manager at startup to fail fast rather
/// than discover a missing mount partway through the first reconcile.
pub fn secret_dir_exists(root: &Path, secret: &NamespacedName) -> bool {
    root.join(secret.namespace.as_str()).join(secret.name.as_str()).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use caph_domain::NamespacedName;

    fn write(dir: &Path, key: &str, value: &str) {
        std::fs::write(dir.join(key), value).unwrap();
    }

    #[test]
    fn reads_credentials_from_mounted_secret_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let secret_dir = tmp.path().join("default").join("hetzner-creds");
        std::fs::create_dir_all(&secret_dir).unwrap();
        write(&secret_dir, "hetznerRobotUser", "bob");
        write(&secret_dir, "hetznerRobotPassword", "secret");

        let resolver = SecretResolver::new(tmp.path());
        let name = NamespacedName::new("default", "hetzner-creds");
        let creds = resolver.credentials(&name).unwrap();
        assert_eq!(creds.robot_credentials(), Some(("bob", "secret")));
    }

    #[test]
    fn missing_secret_directory_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = SecretResolver::new(tmp.path());
        let name = NamespacedName::new("default", "does-not-exist");
        assert!(resolver.credentials(&name).is_err());
        assert!(!secret_dir_exists(tmp.path(), &name));
    }

    #[test]
    fn reads_ssh_secret_and_trims_trailing_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let secret_dir = tmp.path().join("default").join("rescue-key");
        std::fs::create_dir_all(&secret_dir).unwrap();
        write(&secret_dir, "ssh-privatekey", "PRIVATE\n");
        write(&secret_dir, "ssh-publickey", "PUBLIC\n");

        let resolver = SecretResolver::new(tmp.path());
        let name = NamespacedName::new("default", "rescue-key");
        let secret = resolver.ssh_secret(&name).unwrap();
        assert_eq!(secret.private_key, "PRIVATE");
        assert_eq!(secret.public_key, "PUBLIC");
    }

    #[test]
    fn raw_key_reads_arbitrary_secret_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let secret_dir = tmp.path().join("default").join("user-data");
        std::fs::create_dir_all(&secret_dir).unwrap();
        write(&secret_dir, "userData", "#!/bin/sh\necho hi\n");

        let resolver = SecretResolver::new(tmp.path());
        let name = NamespacedName::new("default", "user-data");
        let bytes = resolver.raw_key(&name, "userData").unwrap();
        assert_eq!(bytes, b"#!/bin/sh\necho hi\n");
    }
}
