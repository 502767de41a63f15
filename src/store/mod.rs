//! Object storage.
//!
//! - [`ObjectStore`] - The trait every store provider implements
//! - [`InMemoryObjectStore`] - Process-local store with fault injection
//! - [`FilesystemObjectStore`] - Store laid out on a local directory tree

mod filesystem;
pub mod memory;
mod traits;

pub use filesystem::FilesystemObjectStore;
pub use memory::InMemoryObjectStore;
pub use traits::{ArcObjectStore, ObjectStore};
