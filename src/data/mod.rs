//! Data loading and dataset implementations
//!
//! This module provides implementations of the Dataset trait for the
//! dense formats the command-line front end reads and writes.

pub mod csv;

pub use self::csv::*;
