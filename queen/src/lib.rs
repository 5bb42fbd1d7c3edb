//! Queen, the central fleet controller.
//!
//! Dispatches commands to the drone fleet over the message bus, collects
//! correlated responses, and keeps the fleet reconciled against the master
//! drone manifest.

pub mod commands;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod monitor;
pub mod returns;
pub mod shell;
pub mod stores;
