//! Library crate for vulndash-rs: asynchronous scan jobs behind a small dashboard API.
pub mod config;
pub mod context;
pub mod dispatch;
pub mod parser;
pub mod queue;
pub mod scanner;
pub mod server;
pub mod store;
pub mod tracker;
pub mod types;
pub mod worker;
