use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub emails: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        name.trim().to_string()
    }

    /// Name if known, otherwise the first email.
    pub fn display_name(&self) -> String {
        let name = self.full_name();
        if name.is_empty() {
            self.emails.first().cloned().unwrap_or_default()
        } else {
            name
        }
    }

    pub fn main_email(&self) -> Option<&str> {
        self.emails.first().map(|s| s.as_str())
    }
}
