//! Type definitions for gatehouse storage.

mod groupings;
mod ids;
mod invites;
mod projects;
mod roles;
mod users;
mod workspaces;

// Re-export all types from submodules
pub use groupings::*;
pub use ids::*;
pub use invites::*;
pub use projects::*;
pub use roles::*;
pub use users::*;
pub use workspaces::*;
