pub mod mirror;
pub mod models;
pub mod repository;
pub mod serializer;

pub use mirror::MirrorFile;
pub use repository::{Repository, StorageError};
pub use serializer::WriteSerializer;
