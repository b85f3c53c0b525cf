use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use crate::database::DatabaseError;

/// Access level of an account inside one workspace, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }

    pub fn can_edit(&self) -> bool {
        *self >= Role::Editor
    }
}

impl FromStr for Role {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            _ => Err(DatabaseError::InvalidRole(s.to_string())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account's membership in a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub workspace_id: Uuid,
    pub account_id: Uuid,
    pub role: Role,
}

/// Raw row from the `members` table; `level` is stored as text.
#[derive(Debug, FromRow)]
pub(crate) struct MemberRow {
    pub workspace_id: Uuid,
    pub account_id: Uuid,
    pub level: String,
}

impl TryFrom<MemberRow> for Membership {
    type Error = DatabaseError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        Ok(Membership {
            workspace_id: row.workspace_id,
            account_id: row.account_id,
            role: row.level.parse()?,
        })
    }
}
