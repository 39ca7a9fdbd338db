//! Reference protocols

#[cfg(feature = "fipa")]
pub mod fipa;
