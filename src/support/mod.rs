/// Support tickets and the per-user support chat
pub mod manager;
pub mod poller;

pub use manager::TicketManager;
pub use poller::TicketPoller;

use crate::{
    auth::Session,
    error::{RentalError, RentalResult},
    fleet::CarSummary,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

/// Subject of each user's support chat ticket
pub const SUPPORT_SUBJECT: &str = "Support";

/// Largest accepted license photo, in decoded bytes
pub const MAX_LICENSE_IMAGE_BYTES: usize = 9 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Accepted,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Accepted => "accepted",
            TicketStatus::Closed => "closed",
        }
    }

    /// Check that `session` may move a ticket from `self` to `next`
    ///
    /// Callers must already have established that the session owns the ticket
    /// or is an admin.
    pub fn ensure_transition(&self, next: TicketStatus, session: &Session) -> RentalResult<()> {
        match (self, next) {
            (TicketStatus::Open, TicketStatus::Accepted) => session.require_admin(),
            (TicketStatus::Open | TicketStatus::Accepted, TicketStatus::Closed) => Ok(()),
            (TicketStatus::Closed, _) => Err(RentalError::Conflict(
                "Ticket is already closed".to_string(),
            )),
            (from, to) => Err(RentalError::Conflict(format!(
                "Cannot move a {} ticket to {}",
                from.as_str(),
                to.as_str()
            ))),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = RentalError;

    fn from_str(s: &str) -> RentalResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(TicketStatus::Open),
            "accepted" => Ok(TicketStatus::Accepted),
            "closed" => Ok(TicketStatus::Closed),
            _ => Err(RentalError::Validation(format!("Invalid ticket status: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageAuthor {
    Client,
    Admin,
}

impl MessageAuthor {
    pub fn for_session(session: &Session) -> Self {
        if session.is_admin() {
            MessageAuthor::Admin
        } else {
            MessageAuthor::Client
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageAuthor::Client => "client",
            MessageAuthor::Admin => "admin",
        }
    }
}

impl FromStr for MessageAuthor {
    type Err = RentalError;

    fn from_str(s: &str) -> RentalResult<Self> {
        match s {
            "client" => Ok(MessageAuthor::Client),
            "admin" => Ok(MessageAuthor::Admin),
            _ => Err(RentalError::Validation(format!("Invalid message author: {}", s))),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub ticket_id: String,
    pub author: MessageAuthor,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Support ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub subject: String,
    pub description: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by_email: String,
    pub car_id: Option<String>,
    pub car: Option<CarSummary>,
    pub license_image_url: Option<String>,
    /// Filled only when the ticket is read on its own
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    #[validate(length(min = 1, max = 200, message = "Subject is required"))]
    pub subject: String,
    #[serde(default)]
    #[validate(length(max = 5000, message = "Description is too long"))]
    pub description: String,
    #[serde(default)]
    pub car_id: Option<String>,
    #[serde(default)]
    pub license_image_url: Option<String>,
}

impl CreateTicketRequest {
    pub fn normalized(mut self) -> Self {
        self.subject = self.subject.trim().to_string();
        self.description = self.description.trim().to_string();
        self.car_id = self
            .car_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self.license_image_url = self
            .license_image_url
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketFilter {
    /// Only open or accepted tickets
    #[serde(default)]
    pub active_only: bool,
}

/// Check a `data:image/*;base64,` license photo
pub fn check_license_image(url: &str) -> RentalResult<()> {
    let invalid = || {
        RentalError::Validation("License image must be a base64 data:image URL".to_string())
    };

    let rest = url.strip_prefix("data:image/").ok_or_else(invalid)?;
    let (media, payload) = rest.split_once(',').ok_or_else(invalid)?;
    let subtype = media.strip_suffix(";base64").ok_or_else(invalid)?;
    if subtype.is_empty() || subtype.contains(';') {
        return Err(invalid());
    }

    // Reject on encoded length first so oversized uploads are never decoded
    if payload.len() / 4 * 3 > MAX_LICENSE_IMAGE_BYTES + 3 {
        return Err(RentalError::Validation(
            "License image must be 9 MB or smaller".to_string(),
        ));
    }

    let bytes = STANDARD.decode(payload).map_err(|_| invalid())?;
    if bytes.is_empty() {
        return Err(invalid());
    }
    if bytes.len() > MAX_LICENSE_IMAGE_BYTES {
        return Err(RentalError::Validation(
            "License image must be 9 MB or smaller".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    #[test]
    fn test_ticket_transitions() {
        let admin = Session::new("admin@rent.example.com", Role::Admin);
        let client = Session::new("juan@example.com", Role::Client);

        assert!(TicketStatus::Open.ensure_transition(TicketStatus::Accepted, &admin).is_ok());
        assert!(matches!(
            TicketStatus::Open
                .ensure_transition(TicketStatus::Accepted, &client)
                .unwrap_err(),
            RentalError::Authorization(_)
        ));
        assert!(TicketStatus::Accepted.ensure_transition(TicketStatus::Closed, &client).is_ok());
        assert!(TicketStatus::Open.ensure_transition(TicketStatus::Closed, &client).is_ok());
        assert!(TicketStatus::Closed.ensure_transition(TicketStatus::Open, &admin).is_err());
        assert!(TicketStatus::Accepted.ensure_transition(TicketStatus::Open, &admin).is_err());
    }

    #[test]
    fn test_license_image_check() {
        let png = format!("data:image/png;base64,{}", STANDARD.encode(b"\x89PNG fake"));
        assert!(check_license_image(&png).is_ok());

        assert!(check_license_image("https://example.com/licence.png").is_err());
        assert!(check_license_image("data:text/plain;base64,aGVsbG8=").is_err());
        assert!(check_license_image("data:image/png,rawbytes").is_err());
        assert!(check_license_image("data:image/png;base64,!!!").is_err());
        assert!(check_license_image("data:image/png;base64,").is_err());

        let huge = format!(
            "data:image/jpeg;base64,{}",
            STANDARD.encode(vec![0u8; MAX_LICENSE_IMAGE_BYTES + 1])
        );
        assert!(check_license_image(&huge).is_err());
    }
}
