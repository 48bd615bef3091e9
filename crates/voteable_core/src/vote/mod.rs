//! Vote transition protocol.
//!
//! # Responsibility
//! - `transition`: pure guard/mutation resolution per intent.
//! - `executor`: the single guarded write against the votee.
//! - `propagation`: best-effort cascading to ancestors.
//!
//! # Invariants
//! - Data flows resolver -> executor -> propagation; nothing calls back up.
//! - Propagation runs only after the guarded write reported success.

pub mod executor;
pub mod propagation;
pub mod transition;
