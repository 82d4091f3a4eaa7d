//! # astral-common
//!
//! Shared foundation types for the Astral kernel crates.
//!
//! This crate is `#![no_std]` and has zero dependencies, making it suitable
//! as a foundation crate that every other Astral crate can depend on.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;

// Re-export commonly used types
pub use addr::{PhysAddr, VirtAddr};
