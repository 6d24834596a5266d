mod client;
mod command;

pub use client::*;
