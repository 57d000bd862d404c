pub mod device;
pub mod local;
pub mod s3;

pub use device::{StorageDevice, StorageError, StorageResult};
pub use local::LocalDevice;
pub use s3::{S3Device, StorageService};
