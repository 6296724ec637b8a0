//! Inbound generation requests.
//!
//! A `GenerationRequest` is validated once at the edge (query trimmed and
//! non-empty, session id defaulted) and is immutable afterwards.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The audience the answer is framed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Instructor,
    Staff,
    Learner,
    /// Absent or unrecognised role tags. Framed as a learner.
    Guest,
}

impl UserRole {
    /// Parse a client-supplied role tag. Never fails.
    ///
    /// Tags match exactly; anything else, including a differently cased
    /// known tag, is a guest.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("instructor") => Self::Instructor,
            Some("staff") => Self::Staff,
            Some("learner") => Self::Learner,
            _ => Self::Guest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instructor => "instructor",
            Self::Staff => "staff",
            Self::Learner => "learner",
            Self::Guest => "guest",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single question to relay to the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    query: String,
    session_id: String,
    role: UserRole,
}

impl GenerationRequest {
    /// Build a request, rejecting blank queries.
    ///
    /// A missing or blank session id is replaced with a fresh UUID so every
    /// invocation has a session to attach context to.
    pub fn new(
        query: &str,
        session_id: Option<&str>,
        role_tag: Option<&str>,
    ) -> Result<Self, Error> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidRequest("Query text is required".into()));
        }

        let session_id = match session_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };

        Ok(Self {
            query: query.to_string(),
            session_id,
            role: UserRole::from_tag(role_tag),
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn role(&self) -> UserRole {
        self.role
    }
}
