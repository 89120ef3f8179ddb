//! SURGE Test Harness - simulated fleets for coordinator testing
//!
//! This crate provides:
//! - Simulated worker nodes speaking the wire protocol over real TCP
//! - Seeded QoE report profiles
//! - A fleet builder connecting many workers at once

pub mod profile;
pub mod worker;
pub mod fleet;

pub use profile::*;
pub use worker::*;
pub use fleet::*;
