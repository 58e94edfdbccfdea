//! Policy Module
//!
//! Session and operator policy: the enable/disable toggle, per-session
//! thresholds, allow/deny overrides and session history.
//!
//! ## Structure
//! - `overrides`: compiled allow/deny command patterns
//! - `session`: session state file and store
//! - `state`: `PolicyState`, the process-wide policy object
//!
//! ## Usage
//! ```ignore
//! use crate::logic::policy::PolicyState;
//!
//! let policy = PolicyState::new(config, audit, diagnostics)?;
//! let cp = policy.begin_command(&session_id, raw);
//! if !cp.enabled {
//!     return pass_through();
//! }
//! ```

pub mod overrides;
pub mod session;
pub mod state;

pub use overrides::{OverrideHit, OverrideKind, OverrideList};
pub use session::{command_key, derive_session_id, SessionState, SessionStore, MAX_TRACKED_COMMANDS};
pub use state::{CommandPolicy, PolicyState};
