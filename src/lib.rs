//! Deej GW - serial fader controller to OS volume mixer bridge
//!
//! Reads slider positions from a microcontroller over a serial link,
//! smooths and filters them, and routes significant changes to master,
//! device and per-application volume controls.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod mixer;
pub mod paths;
pub mod router;
pub mod serial;
pub mod signal;
