//! Common utilities and data structures shared by the divert crates
//!
//! This crate holds the geometry kernel used by the navigation mesh and its
//! query engine, plus the error type used when decoding tile data.

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid tile data: {0}")]
    InvalidTileData(String),

    #[error("tile data has wrong magic number {0:#010x}")]
    WrongMagic(u32),

    #[error("tile data has unsupported version {0}")]
    WrongVersion(u32),

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for divert-common operations
pub type Result<T> = std::result::Result<T, Error>;
