//! Alert lifecycle engine: state machine, urgency scoring, and escalation.
//!
//! Alert mutations are pure transition functions over an
//! [`nestmon_common::types::AlertRecord`] (see [`machine`]); persistence is
//! a separate compare-and-set write performed by [`service::AlertService`].
//! The [`escalation::EscalationEvaluator`] sweeps open alerts on a fixed
//! interval, fires at most one escalation rule per alert per pass, and
//! emits notification dispatch requests for the targeted role.

pub mod error;
pub mod escalation;
pub mod machine;
pub mod record;
pub mod service;
pub mod urgency;


pub use error::{AlertError, Result};
