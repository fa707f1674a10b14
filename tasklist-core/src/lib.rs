pub mod checksum;
pub mod errors;
pub mod models;
pub mod protocol;

pub use errors::SyncError;

pub type SyncResult<T> = Result<T, SyncError>;
