//! Testing utilities and mock implementations
//!
//! Lets the hub client be exercised without an IoT hub or a synchronized clock.

pub mod mocks;

pub use mocks::*;
