//! PostgreSQL job record store.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use tracing::{debug, trace};

use jobtrack_core::{
    Error, JobFilter, JobMutation, JobPage, JobRecord, JobRecordStore, JobState, Result,
    UpdateOutcome,
};

use crate::escape_like;

const RECORD_COLUMNS: &str = "id, description, owner, schedule_time, start_time, finish_time, \
     state, completion_level, deleted, parameters, result";

/// PostgreSQL implementation of `JobRecordStore`.
///
/// Conditional updates run in one transaction: matching rows are locked with
/// `FOR UPDATE`, the mutation is applied to each locked row, and only the rows
/// it changed are written back.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Run pending schema migrations for the `job_record` table.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    fn parse_row(row: &PgRow) -> Result<JobRecord> {
        let state: String = row.get("state");
        let completion_level: i16 = row.get("completion_level");
        let completion_level = u8::try_from(completion_level).map_err(|_| {
            Error::Internal(format!("completion_level out of range: {completion_level}"))
        })?;

        Ok(JobRecord {
            id: row.get("id"),
            description: row.get("description"),
            owner: row.get("owner"),
            schedule_time: row.get("schedule_time"),
            start_time: row.get("start_time"),
            finish_time: row.get("finish_time"),
            state: state.parse::<JobState>()?,
            completion_level,
            deleted: row.get("deleted"),
            parameters: row.get("parameters"),
            result: row.get("result"),
        })
    }

    async fn write_record<'e, E>(executor: E, record: &JobRecord) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "INSERT INTO job_record (id, description, owner, schedule_time, start_time, \
             finish_time, state, completion_level, deleted, parameters, result) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET \
             description = EXCLUDED.description, owner = EXCLUDED.owner, \
             schedule_time = EXCLUDED.schedule_time, start_time = EXCLUDED.start_time, \
             finish_time = EXCLUDED.finish_time, state = EXCLUDED.state, \
             completion_level = EXCLUDED.completion_level, deleted = EXCLUDED.deleted, \
             parameters = EXCLUDED.parameters, result = EXCLUDED.result",
        )
        .bind(&record.id)
        .bind(&record.description)
        .bind(&record.owner)
        .bind(record.schedule_time)
        .bind(record.start_time)
        .bind(record.finish_time)
        .bind(record.state.as_str())
        .bind(i16::from(record.completion_level))
        .bind(record.deleted)
        .bind(&record.parameters)
        .bind(&record.result)
        .execute(executor)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

/// Append the WHERE clause for `filter` to `qb`.
pub(crate) fn push_where<'args>(qb: &mut QueryBuilder<'args, Postgres>, filter: &JobFilter) {
    qb.push(" WHERE TRUE");

    if filter.is_unsatisfiable() {
        qb.push(" AND FALSE");
        return;
    }

    if let Some(ids) = &filter.ids {
        let ids: Vec<String> = ids.iter().cloned().collect();
        qb.push(" AND id = ANY(");
        qb.push_bind(ids);
        qb.push(")");
    }

    if let Some(owner) = &filter.owner {
        qb.push(" AND owner = ");
        qb.push_bind(owner.clone());
    }

    if let Some(states) = &filter.states {
        let states: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        qb.push(" AND state = ANY(");
        qb.push_bind(states);
        qb.push(")");
    }

    if let Some(term) = &filter.description {
        qb.push(" AND description ILIKE ");
        qb.push_bind(format!("%{}%", escape_like(term)));
    }

    if let Some(deleted) = filter.deleted {
        qb.push(" AND deleted = ");
        qb.push_bind(deleted);
    }
}

/// Clamp a page bound into the range Postgres accepts for LIMIT/OFFSET.
fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobRecordStore for PgJobStore {
    async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM job_record WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn search(&self, filter: &JobFilter, offset: usize, limit: usize) -> Result<JobPage> {
        if filter.is_unsatisfiable() {
            return Ok(JobPage::empty(offset, limit));
        }

        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) AS total FROM job_record");
        push_where(&mut count_qb, filter);
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?
            .get("total");

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM job_record"));
        push_where(&mut qb, filter);
        qb.push(" ORDER BY schedule_time DESC, id ASC LIMIT ");
        qb.push_bind(to_i64(limit));
        qb.push(" OFFSET ");
        qb.push_bind(to_i64(offset));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        let items = rows.iter().map(Self::parse_row).collect::<Result<Vec<_>>>()?;

        trace!(
            subsystem = "store",
            component = "pg_store",
            op = "search",
            result_count = items.len(),
            total,
            "Searched job records"
        );

        Ok(JobPage {
            items,
            offset,
            limit,
            total: usize::try_from(total).unwrap_or_default(),
        })
    }

    async fn put(&self, record: JobRecord) -> Result<()> {
        Self::write_record(&self.pool, &record).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_record WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        let removed = result.rows_affected() > 0;
        debug!(
            subsystem = "store",
            component = "pg_store",
            op = "delete",
            job_id = id,
            removed,
            "Deleted job record"
        );
        Ok(removed)
    }

    async fn update_where(
        &self,
        filter: &JobFilter,
        mutation: &JobMutation,
    ) -> Result<UpdateOutcome> {
        let mut outcome = UpdateOutcome::default();
        if filter.is_unsatisfiable() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM job_record"));
        push_where(&mut qb, filter);
        qb.push(" ORDER BY schedule_time DESC, id ASC FOR UPDATE");

        let rows = qb
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for row in &rows {
            let current = Self::parse_row(row)?;
            match mutation.apply(&current) {
                Some(next) => {
                    Self::write_record(&mut *tx, &next).await?;
                    outcome.changed.push(next.id.clone());
                    outcome.records.push(next);
                }
                None => outcome.records.push(current),
            }
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "store",
            component = "pg_store",
            op = "update_where",
            mutation = mutation.name(),
            matched = outcome.records.len(),
            changed = outcome.changed.len(),
            "Applied conditional update"
        );
        Ok(outcome)
    }
}
