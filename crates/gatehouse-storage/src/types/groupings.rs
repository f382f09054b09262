//! Project grouping ("ProjectSpace") types.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GroupingId, UserId, WorkspaceId};

/// Name of the grouping lazily created for every workspace.
pub const DEFAULT_GROUPING_NAME: &str = "General";

/// Who is eligible for assignment inside a grouping's projects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Every workspace member
    Public,
    /// Only the explicit member list (plus project members and controllers)
    Targeted,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Targeted => "targeted",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "targeted" => Ok(Visibility::Targeted),
            _ => Err(format!("invalid visibility: {}", s)),
        }
    }
}

/// Project grouping record
#[derive(Clone, Debug)]
pub struct ProjectGrouping {
    pub id: GroupingId,
    pub workspace_id: WorkspaceId,
    pub name: String, // Unique within the workspace
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

/// Grouping membership record (binary, no role)
#[derive(Clone, Debug)]
pub struct GroupingMember {
    pub grouping_id: GroupingId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a grouping
#[derive(Clone, Debug)]
pub struct CreateGroupingParams {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub visibility: Visibility,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_parse() {
        assert_eq!("public".parse::<Visibility>().unwrap(), Visibility::Public);
        assert_eq!(
            "targeted".parse::<Visibility>().unwrap(),
            Visibility::Targeted
        );
        assert!("private".parse::<Visibility>().is_err());
    }
}
