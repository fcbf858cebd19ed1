//! Oracle-guided exploration of login flows.
//!
//! For every URL, the explorer enumerates combinations of the page's
//! dropdown-like controls and runs one interaction loop per combination: it
//! captures the page, asks an external oracle where to click, applies the
//! click, and records each step until the oracle reports no target, the
//! loop gets stuck, or the click ceiling is reached.

pub mod artifacts;
pub mod browser;
pub mod cli;
pub mod error;
pub mod explorer;
pub mod oracle;
pub mod trace;

pub use error::{ErrorKind, ExplorerError, Result};
