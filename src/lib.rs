//! In-memory, cache-aware ordered key-value stores built around the
//! Packed Memory Array family: a dense, gap-tolerant sorted array
//! partitioned into fixed-size segments, indexed by a companion
//! separator tree, and resized through virtual-memory rewiring rather
//! than block copy.
//!
//! The public entry point is [`pma::PackedMemoryArray`]. Everything else
//! is exposed for composing alternate configurations (a different
//! separator index or predictor variant) and for testing.

pub mod config;
pub mod density;
pub mod error;
pub mod index;
pub mod iter;
pub mod partition;
pub mod pma;
pub mod predictor;
pub mod rebalance;
pub mod rewiring;
pub mod stats;
pub mod storage;

pub use config::PmaConfig;
pub use error::{PmaError, Result};
pub use pma::{IndexKind, PackedMemoryArray, PredictorKind};
