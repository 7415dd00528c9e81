use serde::{Deserialize, Serialize};

/// Caller identity extracted from request headers, recorded in audit trails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub user_name: Option<String>,
}

impl UserContext {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            user_name: None,
        }
    }

    pub fn with_name(user_id: String, name: Option<String>) -> Self {
        Self {
            user_id,
            user_name: name,
        }
    }

    /// Identity used when a request carries no user headers
    pub fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            user_name: None,
        }
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::anonymous()
    }
}
