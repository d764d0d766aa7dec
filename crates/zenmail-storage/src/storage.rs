use crate::StorageError;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use zenmail_core::GmailCredential;

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let in_memory = database_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections.max(1));
        if in_memory {
            // An in-memory database lives only as long as its single connection.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(in_memory, "credential store ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trips to the database and returns its clock.
    pub async fn ping(&self) -> Result<String, StorageError> {
        let row = sqlx::query("SELECT strftime('%Y-%m-%dT%H:%M:%fZ', 'now') AS now")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("now")?)
    }

    /// Inserts the credential, or overwrites tokens, expiry and `updated_at` for an existing email.
    ///
    /// `created_at` of an existing row is never touched, and a missing refresh token keeps
    /// the stored one. Returns the row as persisted.
    pub async fn upsert_credential(
        &self,
        credential: &GmailCredential,
    ) -> Result<GmailCredential, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO gmail_accounts (
              email, access_token, refresh_token, token_expiry, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(email) DO UPDATE SET
              access_token = excluded.access_token,
              refresh_token = COALESCE(excluded.refresh_token, gmail_accounts.refresh_token),
              token_expiry = excluded.token_expiry,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.email)
        .bind(&credential.access_token)
        .bind(credential.refresh_token.as_deref())
        .bind(format_datetime(&credential.token_expiry))
        .bind(format_datetime(&credential.created_at))
        .bind(format_datetime(&credential.updated_at))
        .execute(&self.pool)
        .await?;

        self.credential_by_email(&credential.email)
            .await?
            .ok_or_else(|| {
                StorageError::Data(format!(
                    "credential for {} missing after upsert",
                    credential.email
                ))
            })
    }

    /// The most recently created credential record: the current account.
    pub async fn latest_credential(&self) -> Result<Option<GmailCredential>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT email, access_token, refresh_token, token_expiry, created_at, updated_at
            FROM gmail_accounts
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_credential).transpose()
    }

    pub async fn credential_by_email(
        &self,
        email: &str,
    ) -> Result<Option<GmailCredential>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT email, access_token, refresh_token, token_expiry, created_at, updated_at
            FROM gmail_accounts
            WHERE email = ?1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_credential).transpose()
    }

    /// Returns whether a row was removed.
    pub async fn delete_credential(&self, email: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM gmail_accounts WHERE email = ?1")
            .bind(email)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_credentials(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM gmail_accounts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    fn row_to_credential(row: SqliteRow) -> Result<GmailCredential, StorageError> {
        let expiry_raw: String = row.try_get("token_expiry")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(GmailCredential {
            email: row.try_get("email")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            token_expiry: parse_datetime(&expiry_raw, "gmail_accounts.token_expiry")?,
            created_at: parse_datetime(&created_raw, "gmail_accounts.created_at")?,
            updated_at: parse_datetime(&updated_raw, "gmail_accounts.updated_at")?,
        })
    }
}

/// Fixed-width UTC so that text ordering matches chronological ordering.
fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(raw: &str, field: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Data(format!("invalid datetime for {field}: {err}")))
}
