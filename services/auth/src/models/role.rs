//! Role model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Role entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Direct permission ids
    pub permissions: BTreeSet<Uuid>,
    /// Single parent; the relation forms a forest
    pub inherits_from: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New role creation payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: BTreeSet<Uuid>,
    #[serde(default)]
    pub inherits_from: Option<Uuid>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Role update payload
///
/// `inherits_from: Some(None)` detaches the role from its parent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRole {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<BTreeSet<Uuid>>,
    #[serde(default, with = "double_option")]
    pub inherits_from: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
}

/// Role together with its derived effective permissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleView {
    #[serde(flatten)]
    pub role: Role,
    pub effective_permissions: BTreeSet<Uuid>,
}

/// Node of the inheritance forest
#[derive(Debug, Clone, Serialize)]
pub struct RoleNode {
    #[serde(flatten)]
    pub view: RoleView,
    pub children: Vec<RoleNode>,
}

/// Distinguishes an absent field from an explicit `null`
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_distinguishes_missing_and_null_parent() {
        let missing: UpdateRole = serde_json::from_str(r#"{"name":"Ops"}"#).unwrap();
        assert_eq!(missing.inherits_from, None);

        let null: UpdateRole = serde_json::from_str(r#"{"inheritsFrom":null}"#).unwrap();
        assert_eq!(null.inherits_from, Some(None));
    }
}
