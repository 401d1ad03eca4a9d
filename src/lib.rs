#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod config;
pub mod data;
pub mod error;
pub mod feed;
pub mod feed_view;
pub mod gate;
pub mod interaction;
pub mod pagination;
pub mod session;
pub mod storage;

use std::io::Write;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, Command};
pub use error::{Error, ErrorKind};
pub use feed_view::{FeedEvent, FeedView};

/// Logs to stderr, `warn` and above unless `RUST_LOG` says otherwise.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}
