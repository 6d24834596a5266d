pub mod app;
pub mod backend;
pub mod command;
pub mod config;
pub mod devices;
pub mod error;
pub mod history;
pub mod remote;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod testutil;
