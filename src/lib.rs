pub mod api;
pub mod broker;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod fanout;
pub mod geo;
pub mod hub;
pub mod models;
pub mod observability;
pub mod persistence;
pub mod state;
pub mod store;
pub mod tracking;
