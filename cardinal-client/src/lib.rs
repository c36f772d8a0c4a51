pub mod app;
pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod directives;
pub mod host;
pub mod net;
pub mod persist;
pub mod reactions;
pub mod settings;
pub mod store;
pub mod surface;
