pub mod app;
pub mod auth;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notify;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;
