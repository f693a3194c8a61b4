//! Shared domain model for the nestmon childcare-safety alert engine.
//!
//! Defines the [`types::AlertRecord`] and [`types::NotificationRecord`]
//! entities, the enums governing their lifecycles, and snowflake-based
//! record ID generation. Business rules live in `nestmon-alert` and
//! `nestmon-notify`; this crate only carries data.

pub mod id;
pub mod types;
