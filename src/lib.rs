//! Session font loading for ASS/SSA subtitle scripts.
//!
//! Given subtitle files or directories, this crate extracts every referenced
//! font face, resolves each face against an index of the font files found in
//! a font directory, registers the matching files with the embedding host,
//! and unregisters them once the session is dismissed. The index is persisted
//! as a small binary cache so later sessions skip the directory scan.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::{mpsc, Arc};
//! use subfont::session::{Command, Controller, Flags, Host, SessionConfig};
//!
//! # struct NullHost;
//! # impl Host for NullHost {
//! #     fn register(&mut self, _: &std::path::Path) -> bool { true }
//! #     fn unregister(&mut self, _: &std::path::Path) {}
//! #     fn show_status(&mut self, _: &str, _: &str) {}
//! # }
//! let config = SessionConfig {
//!     sub_paths: vec!["episode-01.ass".into()],
//!     ..SessionConfig::default()
//! };
//! let (commands, rx) = mpsc::channel::<Command>();
//! drop(commands); // a closed channel dismisses the session at `Done`
//!
//! let mut controller = Controller::new(config, Arc::new(Flags::default()));
//! let mut host = NullHost;
//! controller.run(&mut host, &rx).unwrap();
//! ```

use std::io;

use thiserror::Error;

pub mod arena;
pub mod ass;
pub mod font;
pub mod index;
pub mod session;
pub mod walk;

/// Failure cases shared across the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    /// Structural validation failed; the payload names the offending part.
    #[error("corrupt {0}")]
    Corrupt(&'static str),
    /// The data is recognizably not something this crate handles.
    #[error("unsupported font container")]
    Unsupported,
    #[error("out of memory")]
    Oom,
    /// The user asked for the current operation to stop.
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
