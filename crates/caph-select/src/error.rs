use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no storage device found matching root device hints")]
    NoStorageDeviceFound,

    #[error("no available host matches selector")]
    NoAvailableHost,
}
