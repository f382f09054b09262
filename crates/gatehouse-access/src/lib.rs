//! Multi-tenant access control for gatehouse.
//!
//! [`AccessEngine`] answers "may this user do this here?" for workspaces and
//! projects, computes which users can be assigned work in a project, drives
//! the workspace invite life cycle and records every permission-relevant
//! change to the audit trail.

mod access;
mod assignability;
mod config;
mod engine;
mod error;
mod groupings;
pub mod hierarchy;
mod invites;
mod members;
mod recorder;
mod snapshot;

pub use access::Scope;
pub use assignability::AssignmentChange;
pub use config::{AccessPolicyConfig, ConfigError, EngineConfig, MAX_INVITE_TTL_HOURS};
pub use engine::AccessEngine;
pub use error::{AccessError, Result};
pub use invites::InviteView;
pub use recorder::AuditRecorder;
