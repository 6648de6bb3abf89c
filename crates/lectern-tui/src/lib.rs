//! Terminal UI for Lectern
//!
//! A thin shell over [`lectern_app::Runtime`] that provides terminal-specific
//! I/O. All connection management lives in the session and the runtime; this
//! crate only handles keys and rendering, plus an optional demo classmate.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod input;
pub mod peer;
pub mod terminal;
pub mod ui;

pub use input::{InputState, KeyInput};
pub use peer::Classmate;
pub use terminal::{ChatTerminal, TerminalError};
