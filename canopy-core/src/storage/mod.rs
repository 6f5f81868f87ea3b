//! Single-file persistence for built forests.
//!
//! This module provides:
//! - The on-disk layout: fixed header, root array, flat fixed-stride vector
//!   and node arrays (offset arithmetic only, no pointer walking)
//! - Atomic save via a sibling temp file renamed on completion
//! - A read-only memory-mapped view serving queries with zero copies

pub mod file;
pub mod format;
