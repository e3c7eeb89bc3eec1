use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::engine::{EngineOptions, StorageEngine};
use super::register::{Meta, Mode, Register, RegisterUpdate};
use crate::shared::AppError;

const DEFAULT_TABLE: &str = "rauth_sessions";

/// PostgreSQL storage engine.
///
/// Expects a table with the columns `session_id TEXT PRIMARY KEY, user_id TEXT,
/// scope TEXT, meta TEXT, client_id TEXT, mode TEXT, token_type TEXT,
/// refresh_at BIGINT, created_at BIGINT, extensions TEXT`. `meta` and
/// `extensions` hold JSON objects.
pub struct PostgresEngine {
    pool: PgPool,
    table: String,
}

impl PostgresEngine {
    pub const NAME: &'static str = "Postgres";

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Uses a different table name. Only ASCII alphanumerics and `_` are allowed.
    pub fn with_table(mut self, table: &str) -> Result<Self, AppError> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AppError::InvalidConfig(format!(
                "invalid table name `{table}`"
            )));
        }
        self.table = table.to_string();
        Ok(self)
    }

    /// Engine constructor for the registry. Requires the `url` option; the
    /// pool connects lazily on first use.
    pub fn from_options(options: &EngineOptions) -> Result<Self, AppError> {
        let url = options.require_str("url")?;
        let pool = PgPool::connect_lazy(url).map_err(|e| {
            warn!(error = %e, "Failed to configure database pool");
            AppError::DatabaseError(e.to_string())
        })?;

        let engine = Self::new(pool);
        match options.get_str("table") {
            Some(table) => engine.with_table(table),
            None => Ok(engine),
        }
    }

    fn columns() -> &'static str {
        "session_id, user_id, scope, meta, client_id, mode, token_type, \
         refresh_at, created_at, extensions"
    }

    fn row_to_register(row: &PgRow) -> Result<Register, AppError> {
        let meta: Option<String> = row.try_get("meta").map_err(db_error)?;
        let extensions: Option<String> = row.try_get("extensions").map_err(db_error)?;
        let mode: Option<String> = row.try_get("mode").map_err(db_error)?;

        Ok(Register {
            session_id: row.try_get("session_id").map_err(db_error)?,
            user_id: row.try_get("user_id").map_err(db_error)?,
            scope: row.try_get("scope").map_err(db_error)?,
            meta: meta.as_deref().map(parse_json_object).transpose()?,
            client_id: row.try_get("client_id").map_err(db_error)?,
            mode: mode.as_deref().and_then(Mode::parse).unwrap_or_default(),
            token_type: row.try_get("token_type").map_err(db_error)?,
            refresh_at: row.try_get("refresh_at").map_err(db_error)?,
            created_at: row.try_get("created_at").map_err(db_error)?,
            extensions: extensions
                .as_deref()
                .map(parse_json_object)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<Register>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE session_id = $1",
            Self::columns(),
            self.table
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, session_id = %session_id, "Failed to fetch register from database");
            db_error(e)
        })?;

        row.as_ref().map(Self::row_to_register).transpose()
    }

    /// Writes every mutable column of `register`, optionally guarded by the
    /// stored rotation nonce. Returns the number of rows touched.
    async fn write(
        &self,
        register: &Register,
        expected_refresh_at: Option<Option<i64>>,
    ) -> Result<u64, AppError> {
        let guard = if expected_refresh_at.is_some() {
            " AND refresh_at IS NOT DISTINCT FROM $10"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE {} SET user_id = $2, scope = $3, meta = $4, client_id = $5, token_type = $6, \
             refresh_at = $7, extensions = $8, mode = $9 WHERE session_id = $1{}",
            self.table, guard
        );

        let mut query = sqlx::query(&sql)
            .bind(&register.session_id)
            .bind(&register.user_id)
            .bind(&register.scope)
            .bind(register.meta.as_ref().map(to_json_text).transpose()?)
            .bind(&register.client_id)
            .bind(&register.token_type)
            .bind(register.refresh_at)
            .bind(to_json_text(&register.extensions)?)
            .bind(register.mode.as_str());
        if let Some(expected) = expected_refresh_at {
            query = query.bind(expected);
        }

        let result = query.execute(&self.pool).await.map_err(|e| {
            warn!(
                error = %e,
                session_id = ?register.session_id,
                "Failed to update register in database"
            );
            db_error(e)
        })?;
        Ok(result.rows_affected())
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

fn parse_json_object(text: &str) -> Result<Meta, AppError> {
    serde_json::from_str(text).map_err(|e| AppError::DatabaseError(e.to_string()))
}

fn to_json_text(map: &Meta) -> Result<String, AppError> {
    serde_json::to_string(map).map_err(|e| AppError::DatabaseError(e.to_string()))
}

#[async_trait]
impl StorageEngine for PostgresEngine {
    #[instrument(skip(self, register))]
    async fn create(&self, mut register: Register) -> Result<Register, AppError> {
        let session_id = register
            .session_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        debug!(session_id = %session_id, "Creating register in database");

        sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            self.table,
            Self::columns()
        ))
        .bind(&session_id)
        .bind(&register.user_id)
        .bind(&register.scope)
        .bind(register.meta.as_ref().map(to_json_text).transpose()?)
        .bind(&register.client_id)
        .bind(register.mode.as_str())
        .bind(&register.token_type)
        .bind(register.refresh_at)
        .bind(register.created_at)
        .bind(to_json_text(&register.extensions)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create register in database");
            db_error(e)
        })?;

        debug!(session_id = %session_id, "Register created successfully in database");
        Ok(register)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, session_id: &str) -> Result<Register, AppError> {
        debug!(session_id = %session_id, "Fetching register from database");

        self.fetch(session_id).await?.ok_or_else(|| {
            debug!(session_id = %session_id, "Register not found in database");
            AppError::NotFound(format!("Cannot find {session_id}"))
        })
    }

    #[instrument(skip(self))]
    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Register>, AppError> {
        debug!(user_id = %user_id, "Listing registers for user in database");

        let rows = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE user_id = $1",
            Self::columns(),
            self.table
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, user_id = %user_id, "Failed to list registers from database");
            db_error(e)
        })?;

        rows.iter().map(Self::row_to_register).collect()
    }

    #[instrument(skip(self, register, sets))]
    async fn update(
        &self,
        register: &Register,
        sets: &RegisterUpdate,
    ) -> Result<Register, AppError> {
        let session_id = register
            .session_id
            .as_deref()
            .ok_or_else(|| AppError::NotFound("Register has no session id".to_string()))?;
        debug!(session_id = %session_id, "Updating register in database");

        let mut next = self
            .fetch(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Cannot find {session_id}")))?;
        sets.apply(&mut next);

        if self.write(&next, None).await? == 0 {
            warn!(session_id = %session_id, "Register not found for update");
            return Err(AppError::NotFound(format!("Cannot find {session_id}")));
        }

        debug!(session_id = %session_id, "Register updated successfully in database");
        Ok(next)
    }

    #[instrument(skip(self, sets))]
    async fn compare_and_update(
        &self,
        session_id: &str,
        expected_refresh_at: Option<i64>,
        sets: &RegisterUpdate,
    ) -> Result<Option<Register>, AppError> {
        let mut next = self
            .fetch(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Cannot find {session_id}")))?;
        if next.refresh_at != expected_refresh_at {
            return Ok(None);
        }
        sets.apply(&mut next);

        // the guard re-checks the nonce inside the UPDATE itself
        if self.write(&next, Some(expected_refresh_at)).await? == 0 {
            debug!(session_id = %session_id, "Conditional update lost a concurrent race");
            return Ok(None);
        }
        Ok(Some(next))
    }

    #[instrument(skip(self))]
    async fn delete_by_id(&self, session_id: &str) -> Result<bool, AppError> {
        debug!(session_id = %session_id, "Deleting register from database");

        let result = sqlx::query(&format!("DELETE FROM {} WHERE session_id = $1", self.table))
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                warn!(
                    error = %e,
                    session_id = %session_id,
                    "Failed to delete register from database"
                );
                db_error(e)
            })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_by_user_id(&self, user_id: &str) -> Result<bool, AppError> {
        debug!(user_id = %user_id, "Deleting registers for user from database");

        let result = sqlx::query(&format!("DELETE FROM {} WHERE user_id = $1", self.table))
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, user_id = %user_id, "Failed to delete registers from database");
                db_error(e)
            })?;

        debug!(user_id = %user_id, removed = result.rows_affected(), "Registers deleted for user");
        Ok(true)
    }

    #[instrument(skip(self, session_ids))]
    async fn delete_by_ids(&self, session_ids: &[String]) -> Result<bool, AppError> {
        debug!(count = session_ids.len(), "Deleting registers by id from database");

        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE session_id = ANY($1)",
            self.table
        ))
        .bind(session_ids)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to delete registers from database");
            db_error(e)
        })?;

        Ok(result.rows_affected() == session_ids.len() as u64)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}
