//! Backend handles.
//!
//! [`Store`] is the contract every backend implements. [`MemoryStore`] backs
//! the built-in `array` driver.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{Store, StoreStats};
