//! Autolycus - admin tool for Hercules servers
//!
//! Edits the server configuration in place, starts and stops the map, char
//! and login servers, and prepares their MySQL database.

/// Config file lookup and in-place editing
pub mod conf;
/// Layout of a Hercules installation
pub mod install;
/// Settings of the tool itself (`conf/autolycus.yaml`)
pub mod settings;
/// Server process control
pub mod supervisor;
/// MySQL access: connection, accounts, SQL import, upgrades
pub mod database;
/// CLI commands
pub mod admin;
/// Console log format
pub mod logging;
