pub mod app;
pub mod binder;
pub mod channel;
pub mod client;
pub mod config;
pub mod dom;
pub mod page;
pub mod patch;
pub mod protocol;
pub mod telemetry;
