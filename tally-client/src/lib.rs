//! TALLY Client - Remote Result Generator
//!
//! The generator is the external service that computes a user's periodic
//! result on demand. This crate defines the [`ResultGenerator`] seam the
//! cache consumes and [`GeneratorClient`], its HTTP implementation.

pub mod client;
pub mod generator;
pub mod response;

pub use client::GeneratorClient;
pub use generator::ResultGenerator;
