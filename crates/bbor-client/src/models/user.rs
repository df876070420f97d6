use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(alias = "_id")]
    pub id: String,
    pub abbr: String,
}

/// Profile of the authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub group: Group,
    #[serde(default)]
    pub disabled: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_profile() {
        let user: User = serde_json::from_value(serde_json::json!({
            "_id": "u1",
            "name": "alice",
            "group": {"id": "g1", "abbr": "QB"},
            "created_at": "2025-01-01T00:00:00",
            "updated_at": "2025-01-02T00:00:00Z"
        }))
        .expect("user");
        assert_eq!(user.id, "u1");
        assert_eq!(user.group.abbr, "QB");
        assert!(!user.disabled);
    }
}
