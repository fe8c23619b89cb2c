pub mod interfaces;

pub use interfaces::{StorageBackend, TimeProvider};
