use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool's request for user approval, before an id has been allocated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatePermissionRequest {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub description: String,
    pub action: String,
    pub params: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl CreatePermissionRequest {
    pub fn with_id(self, id: String) -> PermissionRequest {
        PermissionRequest {
            id,
            session_id: self.session_id,
            tool_call_id: self.tool_call_id,
            tool_name: self.tool_name,
            description: self.description,
            action: self.action,
            params: self.params,
            path: self.path,
        }
    }
}

/// A pending approval shown to the user. Transient: never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub description: String,
    pub action: String,
    pub params: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// Published once a request has been resolved, whichever way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionNotification {
    pub tool_call_id: String,
    pub granted: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub denied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    Allow,
    AllowSession,
    Deny,
}

/// The UI's answer to a pending permission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub permission: PermissionRequest,
    pub action: PermissionAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSkipRequest {
    pub skip: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grant_action_tags() {
        let g = PermissionGrant {
            permission: PermissionRequest::default(),
            action: PermissionAction::AllowSession,
        };
        let v = serde_json::to_value(&g).unwrap();
        assert_eq!(v["action"], "allow_session");
    }

    #[test]
    fn request_round_trips_arbitrary_params() {
        let req = PermissionRequest {
            id: "p1".into(),
            session_id: "sess_1".into(),
            tool_call_id: "t1".into(),
            tool_name: "bash".into(),
            description: "run a command".into(),
            action: "execute".into(),
            params: json!({"command": "echo hi", "timeout": 5}),
            path: "/tmp/w".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: PermissionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }
}
