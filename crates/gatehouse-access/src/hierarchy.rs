//! Role hierarchy resolution shared by workspace and project scope.
//!
//! `VIEWER < MEMBER < ADMIN < OWNER`. A requirement set is satisfied when the
//! actual role ranks at least as high as the weakest role in the set.

use gatehouse_storage::Role;

pub fn rank(role: Role) -> u8 {
    role.rank()
}

/// Rank of a role name; unknown names rank 0.
pub fn rank_of(name: &str) -> u8 {
    name.trim()
        .to_ascii_lowercase()
        .parse::<Role>()
        .map_or(0, Role::rank)
}

/// An empty requirement set is never satisfied.
pub fn satisfies(actual: Role, required: &[Role]) -> bool {
    required.iter().any(|r| actual.includes(*r))
}

/// Name-based variant for callers holding raw role strings.
///
/// An unknown name on either side fails the check.
pub fn satisfies_named(actual: &str, required: &[&str]) -> bool {
    let actual = rank_of(actual);
    if actual == 0 {
        return false;
    }
    let mut min = None;
    for name in required {
        match rank_of(name) {
            0 => return false,
            r => min = Some(min.map_or(r, |m: u8| m.min(r))),
        }
    }
    min.is_some_and(|m| actual >= m)
}
