//! portkeep: Command-line interface
//!
//! Provides the `portkeep` binary for opening, listing and closing
//! background port-forward tunnels, plus the hidden worker entry point
//! each tunnel runs under.

pub mod commands;
pub mod output;
