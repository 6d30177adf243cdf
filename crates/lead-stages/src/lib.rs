//! Lead lifecycle stage engagement.
//!
//! Feature modules register stage actions once at startup; visitor activity is
//! then fed through [`workflows::stages::EngagementEngine::trigger`], which
//! fires matching published actions at most once per lead and records the
//! resulting stage changes.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
