//! Scoped privilege elevation.
//!
//! Operations such as defining a class into a sandbox or reading the current
//! engine context require an explicit elevation frame on the calling thread.

mod privilege;

pub use privilege::{AccessController, Permission};

#[cfg(test)]
mod privilege_test;
