use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, postgres::PgRow};
use uuid::Uuid;

/// A user row joined with its organisation acronym.
///
/// `role` is an ordinal rank; authorisation downstream is a plain
/// `role >= required` comparison, so the value is carried verbatim into the
/// session cookie.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub organisation_acronym: String,
    pub name: String,
    pub username: String,
    pub password_hash: String,
    pub role: i16,
    pub active: bool,
    pub failed_login_count: i32,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organisation_id: row.try_get("organisation_id")?,
            organisation_acronym: row.try_get("organisation_acronym")?,
            name: row.try_get("name")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            role: row.try_get("role")?,
            active: row.try_get("active")?,
            failed_login_count: row.try_get("failed_login_count")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
