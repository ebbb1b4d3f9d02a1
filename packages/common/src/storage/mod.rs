mod error;
mod traits;

pub mod local;
pub mod object;

pub use error::StorageError;
pub use local::LocalProvider;
pub use object::{ObjectStoreConfig, ObjectStoreProvider};
pub use traits::{BoxReader, StorageProvider};
