//! Testing utilities and mock implementations
//!
//! Scripted transports for exercising the publisher without a broker.

pub mod mocks;

pub use mocks::*;
