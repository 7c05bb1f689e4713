//! Error handling for netplane
//!
//! Every fallible operation in the crate returns [`NetplaneResult`]. Errors fall
//! into four classes that decide how a caller reacts:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Netplane Error Taxonomy                      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Validation           │  ResourceUnavailable  │  Conflict        │
//! │  • bad parameters     │  • router unreachable │  • CAS lost      │
//! │  • NoTransition       │  • transport timeout  │  • op in flight  │
//! │  • Unsupported rule   │  • store unavailable  │                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Fatal: serialization failures, unknown dispatcher, internal bugs │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation errors are never retried automatically. ResourceUnavailable
//! errors may be retried by the caller's workflow; the core itself does not
//! retry. Conflicts require the caller to re-fetch and recompute intent. Fatal
//! errors mark the owning job `Failed` with the error captured in its result.

pub mod constructors;
pub mod conversions;
pub mod types;

pub use types::{format_errors, ErrorCategory, NetplaneError, NetplaneResult, Result};
