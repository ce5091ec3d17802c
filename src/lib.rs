pub mod auth;
pub mod config;
pub mod engine;
pub mod forward;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sql;
pub mod wire;
