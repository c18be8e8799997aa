//! This crate implements various types and utilities used across the Vantage
//! navigation runtime.
//!
//! It is lightweight so it can be used by the engine host and by tooling
//! without pulling in the full navigation stack.

pub mod fkey;
pub mod ids;
pub mod params;
pub mod path;
pub mod tunables;
