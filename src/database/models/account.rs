use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Row from the `accounts` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub disabled: bool,
}
