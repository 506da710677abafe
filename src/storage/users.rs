//! SQLite audience queries.

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};

use crate::broadcast::audience::UserStore;
use crate::broadcast::model::RecipientIdentity;
use crate::broadcast::selector::{EmailCategory, Selector, UserCategory};
use crate::storage::db::{get_connection, DbPool};
use crate::storage::StoreError;

const ACTIVE_SUBSCRIPTION: &str = "s.status = 'active' AND s.end_date > datetime('now')";
const BASE_FROM: &str =
    "FROM users u LEFT JOIN subscriptions s ON s.user_id = u.telegram_id WHERE u.status = 'active'";
const VERIFIED_EMAIL: &str = "u.email IS NOT NULL AND u.email <> '' AND u.email_verified = 1";

/// WHERE fragment plus its bound parameters.
struct Filter {
    clause: String,
    params: Vec<Value>,
}

impl Filter {
    fn plain(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            params: Vec::new(),
        }
    }

    fn with_param(clause: impl Into<String>, param: Value) -> Self {
        Self {
            clause: clause.into(),
            params: vec![param],
        }
    }
}

#[derive(Clone)]
pub struct SqliteUserStore {
    pool: DbPool,
    expiring_days: u32,
}

impl SqliteUserStore {
    pub fn new(pool: DbPool, expiring_days: u32) -> Self {
        Self { pool, expiring_days }
    }

    fn expiring_window(&self) -> Value {
        Value::Text(format!("+{} days", self.expiring_days))
    }

    fn filter(&self, selector: &Selector) -> Filter {
        match selector {
            Selector::User(category) => self.user_filter(*category),
            Selector::Tariff(id) => Filter::with_param(
                format!("{} AND s.tariff_id = ?1", ACTIVE_SUBSCRIPTION),
                Value::Integer(*id),
            ),
            Selector::Email(category) => {
                let inner = self.email_filter(*category);
                Filter {
                    clause: format!("{} AND ({})", VERIFIED_EMAIL, inner.clause),
                    params: inner.params,
                }
            }
        }
    }

    fn user_filter(&self, category: UserCategory) -> Filter {
        match category {
            UserCategory::All => Filter::plain("1 = 1"),
            UserCategory::ActiveSubscription => Filter::plain(format!("{} AND s.is_trial = 0", ACTIVE_SUBSCRIPTION)),
            UserCategory::Trial => Filter::plain(format!("{} AND s.is_trial = 1", ACTIVE_SUBSCRIPTION)),
            UserCategory::NoSubscription => Filter::plain("s.user_id IS NULL"),
            UserCategory::ExpiringSoon => Filter::with_param(
                format!(
                    "{} AND s.is_trial = 0 AND s.end_date <= datetime('now', ?1)",
                    ACTIVE_SUBSCRIPTION
                ),
                self.expiring_window(),
            ),
            UserCategory::Expired => {
                Filter::plain("s.user_id IS NOT NULL AND (s.status = 'expired' OR s.end_date <= datetime('now'))")
            }
            UserCategory::ActiveZeroTraffic => Filter::plain(format!(
                "{} AND s.is_trial = 0 AND s.traffic_used_bytes = 0",
                ACTIVE_SUBSCRIPTION
            )),
            UserCategory::TrialZeroTraffic => Filter::plain(format!(
                "{} AND s.is_trial = 1 AND s.traffic_used_bytes = 0",
                ACTIVE_SUBSCRIPTION
            )),
            UserCategory::RegisteredToday => Filter::plain("u.created_at >= date('now')"),
            UserCategory::RegisteredWeek => Filter::plain("u.created_at >= datetime('now', '-7 days')"),
            UserCategory::RegisteredMonth => Filter::plain("u.created_at >= datetime('now', '-30 days')"),
            UserCategory::ActiveToday => Filter::plain("u.last_activity >= date('now')"),
            UserCategory::InactiveWeek => {
                Filter::plain("(u.last_activity IS NULL OR u.last_activity < datetime('now', '-7 days'))")
            }
            UserCategory::InactiveMonth => {
                Filter::plain("(u.last_activity IS NULL OR u.last_activity < datetime('now', '-30 days'))")
            }
            UserCategory::Referred => Filter::plain("u.referred_by IS NOT NULL"),
            UserCategory::Direct => Filter::plain("u.referred_by IS NULL"),
        }
    }

    fn email_filter(&self, category: EmailCategory) -> Filter {
        match category {
            EmailCategory::All => Filter::plain("1 = 1"),
            EmailCategory::ActiveSubscription => Filter::plain(format!("{} AND s.is_trial = 0", ACTIVE_SUBSCRIPTION)),
            EmailCategory::Trial => Filter::plain(format!("{} AND s.is_trial = 1", ACTIVE_SUBSCRIPTION)),
            EmailCategory::NoSubscription => Filter::plain("s.user_id IS NULL"),
            EmailCategory::ExpiringSoon => Filter::with_param(
                format!(
                    "{} AND s.is_trial = 0 AND s.end_date <= datetime('now', ?1)",
                    ACTIVE_SUBSCRIPTION
                ),
                self.expiring_window(),
            ),
            EmailCategory::Expired => {
                Filter::plain("s.user_id IS NOT NULL AND (s.status = 'expired' OR s.end_date <= datetime('now'))")
            }
        }
    }

    fn count_sync(&self, selector: &Selector) -> Result<u64, StoreError> {
        let filter = self.filter(selector);
        let sql = format!("SELECT COUNT(*) {} AND ({})", BASE_FROM, filter.clause);
        let conn = get_connection(&self.pool)?;
        let count: i64 = conn.query_row(&sql, params_from_iter(filter.params.iter()), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn iterate_sync(&self, selector: &Selector) -> Result<Vec<RecipientIdentity>, StoreError> {
        let filter = self.filter(selector);
        let sql = format!(
            "SELECT u.telegram_id, u.username, u.email {} AND ({}) ORDER BY u.telegram_id",
            BASE_FROM, filter.clause
        );
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params.iter()), |row| {
            Ok(RecipientIdentity {
                user_id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
            })
        })?;

        let mut recipients = Vec::new();
        for row in rows {
            recipients.push(row?);
        }
        Ok(recipients)
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn count_by_filter(&self, selector: &Selector) -> Result<u64, StoreError> {
        self.count_sync(selector)
    }

    async fn iterate_by_filter(&self, selector: &Selector) -> Result<Vec<RecipientIdentity>, StoreError> {
        self.iterate_sync(selector)
    }

    async fn is_active_tariff(&self, tariff_id: i64) -> Result<bool, StoreError> {
        let conn = get_connection(&self.pool)?;
        let active: Option<bool> = conn
            .query_row("SELECT is_active FROM tariffs WHERE id = ?1", [tariff_id], |row| row.get(0))
            .optional()?;
        Ok(active.unwrap_or(false))
    }
}
