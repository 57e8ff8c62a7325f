//! colmeia: asynchronous multi-agent coordination behind a polled job API.

pub mod agents;
pub mod anthropic;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod retrieval;
pub mod server;
pub mod telemetry;
pub mod ui;

#[cfg(test)]
mod testing;
