mod error;
mod flags;
mod resolver;
mod secret;
mod validate;

pub use error::ConfigError;
pub use flags::Flags;
pub use resolver::{secret_dir_exists, SecretResolver};
pub use secret::{CredentialsSecret, SshSecret};
pub use validate::validate_command_path;

impl Flags {
    /// Startup-time validation: command paths, if set, must pass
    /// [`validate_command_path`]. A failure here is a configuration error
    /// that must map to process exit code 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.pre_provision_command {
            validate_command_path(path)?;
        }
        if let Some(path) = &self.hcloud_image_url_command {
            validate_command_path(path)?;
        }
        Ok(())
    }
}
