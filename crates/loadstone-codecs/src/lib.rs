//! Typed, context-sensitive conversion between external representations
//! and CQL values.
//!
//! The [`context::ConversionContext`] is built once from settings and never
//! mutated; the [`registry::CodecRegistry`] derives codecs from it on
//! demand and caches them. Everything here is pure: no I/O, no shared
//! mutable state, freely shareable across operator tasks.

pub mod context;
pub mod geo;
pub mod json;
pub mod number;
pub mod registry;
pub mod temporal;
pub mod text;
pub mod uuid_gen;

pub use context::ConversionContext;
pub use registry::{Codec, CodecLookup, CodecRegistry};
