use serde::{Deserialize, Serialize};

/// An ordered transcript of messages between a user and the agent, plus
/// aggregated usage and cost. Summary sessions point back at the
/// conversation they summarize through `parent_session_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub title: String,
    pub message_count: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_message_id: Option<String>,
    pub cost: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_omitted_when_empty() {
        let s = Session {
            id: "sess_1".into(),
            title: "Hello".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("parent_session_id"));
        assert!(!json.contains("summary_message_id"));

        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
