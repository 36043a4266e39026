pub mod control;
pub mod video;

use crate::vehicle;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    VehicleError(#[from] vehicle::Error),

    #[error("No command received for {0:?}")]
    IdleTimeout(std::time::Duration),

    #[error("Client did not accept a frame within {0:?}")]
    SendTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
