pub mod cli;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod notify;
pub mod service;
pub mod setup;
pub mod sync;
