// Public API for integration tests and bot processes using the client

pub mod api;
pub mod auth;
pub mod broker;
pub mod callback;
pub mod client;
pub mod config;
pub mod connections;
pub mod framing;
pub mod protocol;
pub mod upstream;
pub mod webhook;
