//! Evolving memory of past task runs
//!
//! One [`MemoryRecord`] is appended per completed run. Lookups rank past
//! records by how many salient terms their task shares with the new one and
//! hand the best matches to the generator as lessons.

mod lessons;
mod memory;
mod record;
pub mod similarity;
mod storage;

pub use lessons::format_lessons;
pub use memory::{EvolvingMemory, MemoryStats};
pub use record::{Lesson, MemoryRecord};
pub use storage::MemoryStorage;
