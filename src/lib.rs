#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod embed;
pub mod engine;
pub mod feed;
pub mod logging;
pub mod rss;
pub mod source;
pub mod store;
pub mod subscription;
pub mod timefmt;
pub mod timer;
pub mod ui;
pub mod view;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
