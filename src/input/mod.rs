//! ELF sources and access traits
//!
//! This module provides traits and implementations for pulling ELF bytes,
//! whether they are stored in memory or in files, so the image parser can
//! handle both uniformly.

#[cfg(feature = "std")]
pub use backend::ElfFile;
pub use backend::ElfBinary;
pub use traits::{ElfReader, IntoElfReader};

mod backend;
mod traits;
