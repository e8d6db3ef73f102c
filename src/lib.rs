// ABOUTME: Library root for fastssh - a convenience layer over russh.
// ABOUTME: The command-line tool is in main.rs.

pub mod config;
pub mod error;
pub mod ssh;
