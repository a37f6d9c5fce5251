/// Ticket and chat message persistence
use super::{
    check_license_image, CreateTicketRequest, Message, MessageAuthor, Ticket, TicketFilter,
    TicketStatus, SUPPORT_SUBJECT,
};
use crate::{
    auth::Session,
    db::parse_timestamp,
    error::{RentalError, RentalResult},
    fleet::{CarManager, CarSummary},
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use validator::Validate;

const TICKET_SELECT: &str = r#"
    SELECT t.id, t.subject, t.description, t.status, t.created_at, t.updated_at,
           t.created_by_email, t.car_id, t.license_image_url,
           c.name AS current_car_name, c.brand AS current_car_brand,
           c.price_per_day AS current_car_price
    FROM ticket t
    LEFT JOIN car c ON c.id = t.car_id
"#;

const MAX_MESSAGE_CHARS: usize = 4000;

/// Ticket manager
#[derive(Clone)]
pub struct TicketManager {
    db: SqlitePool,
    cars: CarManager,
}

impl TicketManager {
    pub fn new(db: SqlitePool, cars: CarManager) -> Self {
        Self { db, cars }
    }

    /// The caller's support chat, created on first use
    pub async fn find_or_create_support_ticket(&self, session: &Session) -> RentalResult<Ticket> {
        let now = Utc::now().to_rfc3339();

        // The partial unique index turns a concurrent second insert into a no-op
        let result = sqlx::query(
            r#"
            INSERT INTO ticket (id, subject, description, status, created_at, updated_at,
                                created_by_email, car_id, license_image_url, is_support)
            VALUES (?, ?, '', 'open', ?, ?, ?, NULL, NULL, 1)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(SUPPORT_SUBJECT)
        .bind(&now)
        .bind(&now)
        .bind(&session.email)
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!("Support chat opened for {}", session.email);
        }

        let row = sqlx::query(&format!(
            "{} WHERE t.created_by_email = ? AND t.is_support = 1",
            TICKET_SELECT
        ))
        .bind(&session.email)
        .fetch_one(&self.db)
        .await?;

        let mut ticket = parse_ticket(row)?;
        ticket.messages = self.list_messages(&ticket.id).await?;
        Ok(ticket)
    }

    /// Open a ticket, optionally about a car with the driver's license photo
    pub async fn create_ticket(
        &self,
        session: &Session,
        request: CreateTicketRequest,
    ) -> RentalResult<Ticket> {
        let request = request.normalized();
        request.validate()?;
        if request.subject.eq_ignore_ascii_case(SUPPORT_SUBJECT) {
            return Err(RentalError::Validation(
                "The Support subject is reserved for the support chat".to_string(),
            ));
        }

        let car = match request.car_id.as_deref() {
            Some(car_id) => {
                let car = self.cars.require_car(car_id).await?;
                let image = request.license_image_url.as_deref().ok_or_else(|| {
                    RentalError::Validation(
                        "A license image is required for car inquiries".to_string(),
                    )
                })?;
                check_license_image(image)?;
                Some(CarSummary::from(&car))
            }
            None => {
                if let Some(image) = request.license_image_url.as_deref() {
                    check_license_image(image)?;
                }
                None
            }
        };

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO ticket (id, subject, description, status, created_at, updated_at,
                                created_by_email, car_id, license_image_url)
            VALUES (?, ?, ?, 'open', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&request.subject)
        .bind(&request.description)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&session.email)
        .bind(&request.car_id)
        .bind(&request.license_image_url)
        .execute(&self.db)
        .await?;

        tracing::info!("Ticket {} opened by {}: {}", id, session.email, request.subject);

        Ok(Ticket {
            id,
            subject: request.subject,
            description: request.description,
            status: TicketStatus::Open,
            created_at: now,
            updated_at: now,
            created_by_email: session.email.clone(),
            car_id: request.car_id,
            car,
            license_image_url: request.license_image_url,
            messages: Vec::new(),
        })
    }

    /// Caller's tickets, newest first
    pub async fn list_for_user(
        &self,
        session: &Session,
        filter: &TicketFilter,
    ) -> RentalResult<Vec<Ticket>> {
        let rows = sqlx::query(&format!(
            "{} WHERE t.created_by_email = ? AND (? = 0 OR t.status IN ('open', 'accepted')) \
             ORDER BY t.created_at DESC",
            TICKET_SELECT
        ))
        .bind(&session.email)
        .bind(filter.active_only)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_ticket).collect()
    }

    /// Every user's support chat, most recently active first
    pub async fn list_support_tickets(&self, session: &Session) -> RentalResult<Vec<Ticket>> {
        session.require_admin()?;

        let rows = sqlx::query(&format!(
            "{} WHERE t.is_support = 1 ORDER BY t.updated_at DESC",
            TICKET_SELECT
        ))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_ticket).collect()
    }

    pub async fn list_all_tickets(&self, session: &Session) -> RentalResult<Vec<Ticket>> {
        session.require_admin()?;

        let rows = sqlx::query(&format!("{} ORDER BY t.created_at DESC", TICKET_SELECT))
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(parse_ticket).collect()
    }

    async fn get_ticket(&self, id: &str) -> RentalResult<Option<Ticket>> {
        let row = sqlx::query(&format!("{} WHERE t.id = ?", TICKET_SELECT))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(parse_ticket).transpose()
    }

    async fn require_visible(&self, session: &Session, id: &str) -> RentalResult<Ticket> {
        let ticket = self
            .get_ticket(id)
            .await?
            .ok_or_else(|| RentalError::NotFound(format!("Ticket {} not found", id)))?;

        if !session.can_act_for(&[ticket.created_by_email.as_str()]) {
            return Err(RentalError::Authorization(format!(
                "{} does not own ticket {}",
                session.email, id
            )));
        }
        Ok(ticket)
    }

    /// Ticket with its full message history
    pub async fn get_ticket_with_messages(
        &self,
        session: &Session,
        id: &str,
    ) -> RentalResult<Ticket> {
        let mut ticket = self.require_visible(session, id).await?;
        ticket.messages = self.list_messages(id).await?;
        Ok(ticket)
    }

    pub async fn update_status(
        &self,
        session: &Session,
        id: &str,
        status: TicketStatus,
    ) -> RentalResult<Ticket> {
        let ticket = self.require_visible(session, id).await?;
        ticket.status.ensure_transition(status, session)?;

        let result = sqlx::query(
            "UPDATE ticket SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(ticket.status.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RentalError::Conflict(
                "Ticket was changed by someone else; reload and try again".to_string(),
            ));
        }

        tracing::info!(
            "Ticket {} moved {} -> {} by {}",
            id,
            ticket.status.as_str(),
            status.as_str(),
            session.email
        );
        self.get_ticket_with_messages(session, id).await
    }

    /// Append a chat message; the author follows the caller's role
    pub async fn append_message(
        &self,
        session: &Session,
        id: &str,
        text: &str,
    ) -> RentalResult<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RentalError::Validation("Message cannot be empty".to_string()));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(RentalError::Validation("Message is too long".to_string()));
        }

        let ticket = self.require_visible(session, id).await?;
        if ticket.status == TicketStatus::Closed {
            return Err(RentalError::Conflict(
                "This ticket is closed and no longer accepts messages".to_string(),
            ));
        }

        let author = MessageAuthor::for_session(session);
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO ticket_message (ticket_id, author, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(author.as_str())
        .bind(text)
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        sqlx::query("UPDATE ticket SET updated_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&self.db)
            .await?;

        tracing::debug!("Message on ticket {} from {}", id, session.email);

        Ok(Message {
            id: result.last_insert_rowid(),
            ticket_id: id.to_string(),
            author,
            text: text.to_string(),
            created_at: now,
        })
    }

    async fn list_messages(&self, ticket_id: &str) -> RentalResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ticket_id, author, body, created_at
            FROM ticket_message
            WHERE ticket_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_message).collect()
    }
}

fn parse_ticket(row: sqlx::sqlite::SqliteRow) -> RentalResult<Ticket> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let car_id: Option<String> = row.try_get("car_id")?;

    let current_name: Option<String> = row.try_get("current_car_name")?;
    let car = match (&car_id, current_name) {
        (Some(id), Some(name)) => Some(CarSummary {
            id: id.clone(),
            name,
            brand: row.try_get("current_car_brand")?,
            price_per_day: row.try_get("current_car_price")?,
        }),
        _ => None,
    };

    Ok(Ticket {
        id: row.try_get("id")?,
        subject: row.try_get("subject")?,
        description: row.try_get("description")?,
        status: status.parse()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        created_by_email: row.try_get("created_by_email")?,
        car_id,
        car,
        license_image_url: row.try_get("license_image_url")?,
        messages: Vec::new(),
    })
}

fn parse_message(row: sqlx::sqlite::SqliteRow) -> RentalResult<Message> {
    let author: String = row.try_get("author")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Message {
        id: row.try_get("id")?,
        ticket_id: row.try_get("ticket_id")?,
        author: author.parse()?,
        text: row.try_get("body")?,
        created_at: parse_timestamp(&created_at)?,
    })
}
