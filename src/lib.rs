pub mod app;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod modules;
pub mod routes;
pub mod state;
pub mod workers;
