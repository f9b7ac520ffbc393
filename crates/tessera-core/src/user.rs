//! Normalized user profile.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuthError;

const DEFAULT_ROLE: &str = "user";
const DEFAULT_TIER: &str = "free";

/// The signed-in user as the rest of the application sees it.
///
/// Server payloads vary between deployments (numeric or string ids, `name`
/// instead of `full_name`, missing optional fields); [`User::from_payload`]
/// folds them into this single shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub subscription_tier: String,
    pub is_active: bool,
    pub created_at: Option<String>,
    pub last_login: Option<String>,
}

impl User {
    /// Normalize a server user payload, filling defaults for absent fields.
    ///
    /// # Errors
    ///
    /// Returns a malformed-response error if the payload is not an object or
    /// carries neither `id` nor `user_id`.
    pub fn from_payload(payload: &Value) -> Result<Self, AuthError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| AuthError::malformed("User profile is not a JSON object."))?;

        let text = |keys: &[&str]| -> Option<String> {
            keys.iter().find_map(|k| match obj.get(*k) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        };

        let email = text(&["email"]).unwrap_or_default();
        let id = text(&["id", "user_id"]).ok_or_else(|| {
            AuthError::malformed("User profile does not identify the user.")
        })?;
        let username = text(&["username"])
            .or_else(|| (!email.is_empty()).then(|| email.clone()))
            .unwrap_or_else(|| id.clone());

        let permissions = obj
            .get("permissions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id,
            username,
            email,
            full_name: text(&["full_name", "name", "display_name"]).unwrap_or_default(),
            role: text(&["role"]).unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            permissions,
            subscription_tier: text(&["subscription_tier", "tier", "plan"])
                .unwrap_or_else(|| DEFAULT_TIER.to_string()),
            is_active: obj.get("is_active").and_then(Value::as_bool).unwrap_or(true),
            created_at: text(&["created_at"]),
            last_login: text(&["last_login"]),
        })
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthErrorKind;
    use serde_json::json;

    #[test]
    fn fills_defaults() {
        let user = User::from_payload(&json!({"id": 7, "username": "trader"})).unwrap();
        assert_eq!(user.id, "7");
        assert_eq!(user.username, "trader");
        assert_eq!(user.role, "user");
        assert_eq!(user.subscription_tier, "free");
        assert!(user.is_active);
        assert!(user.permissions.is_empty());
        assert_eq!(user.email, "");
    }

    #[test]
    fn accepts_alternate_field_names() {
        let user = User::from_payload(&json!({
            "user_id": "u-1",
            "email": "ops@desk.example",
            "name": "Ops Desk",
            "plan": "pro",
            "permissions": ["reports:read", 5, "users:write"],
            "is_active": false
        }))
        .unwrap();
        assert_eq!(user.id, "u-1");
        assert_eq!(user.username, "ops@desk.example");
        assert_eq!(user.full_name, "Ops Desk");
        assert_eq!(user.subscription_tier, "pro");
        assert_eq!(user.permissions, vec!["reports:read", "users:write"]);
        assert!(user.has_permission("users:write"));
        assert!(!user.is_active);
    }

    #[test]
    fn username_falls_back_to_id() {
        let user = User::from_payload(&json!({"id": 12})).unwrap();
        assert_eq!(user.username, "12");
    }

    #[test]
    fn username_alone_does_not_identify_the_user() {
        let err = User::from_payload(&json!({"username": "trader"})).unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::MalformedResponse);
    }

    #[test]
    fn rejects_anonymous_payload() {
        let err = User::from_payload(&json!({"role": "admin"})).unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::MalformedResponse);
        assert!(User::from_payload(&json!(["not", "an", "object"])).is_err());
    }
}
