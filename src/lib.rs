pub mod client;
pub mod config;
pub mod messages;
pub mod motor;
pub mod perception;
pub mod runtime;
pub mod server;
pub mod service;
