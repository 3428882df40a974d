//! Storage abstraction layer.
//!
//! Persisted indexes are written through the [`Storage`] trait so the same
//! save/load code targets a directory on disk ([`FileStorage`]) or an
//! in-memory map ([`MemoryStorage`]). [`StructWriter`] and [`StructReader`]
//! provide the little-endian record encoding with a CRC32 footer.

pub mod file;
pub mod memory;
pub mod structured;
pub mod traits;

pub use file::*;
pub use memory::*;
pub use structured::*;
pub use traits::*;
