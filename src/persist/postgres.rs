use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::persist::types::{MatchRecord, PersistError, PersistResult, ResultRow};
use crate::persist::MatchStore;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS matches (
        match_id UUID PRIMARY KEY,
        symbol TEXT NOT NULL,
        duration_secs BIGINT NOT NULL,
        target_mark BIGINT NOT NULL,
        starting_value BIGINT NOT NULL,
        day DATE NOT NULL,
        synthetic_day BOOLEAN NOT NULL,
        state TEXT NOT NULL,
        final_mark BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        ended_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS match_results (
        match_id UUID NOT NULL REFERENCES matches(match_id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        account_id TEXT NOT NULL,
        starting_cash BIGINT NOT NULL,
        starting_shares BIGINT NOT NULL,
        starting_value BIGINT NOT NULL,
        final_cash BIGINT NOT NULL,
        final_shares BIGINT NOT NULL,
        final_value BIGINT NOT NULL,
        pnl BIGINT NOT NULL,
        rank INTEGER NOT NULL,
        PRIMARY KEY (match_id, user_id)
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresMatchStore {
    connection_pool: PgPool,
}

impl PostgresMatchStore {
    pub async fn connect(database_url: &str) -> PersistResult<Self> {
        let pool = PgPoolOptions::new().max_connections(4).connect(database_url).await?;
        let store = Self { connection_pool: pool };
        store.migrate().await?;
        info!("Connected to Postgres match store");
        Ok(store)
    }

    pub async fn migrate(&self) -> PersistResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.connection_pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MatchStore for PostgresMatchStore {
    async fn save_match(&self, record: &MatchRecord, results: &[ResultRow]) -> PersistResult<()> {
        let mut tx = self.connection_pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO matches
                (match_id, symbol, duration_secs, target_mark, starting_value, day,
                 synthetic_day, state, final_mark, created_at, started_at, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (match_id) DO UPDATE SET
                state = EXCLUDED.state,
                final_mark = EXCLUDED.final_mark,
                started_at = EXCLUDED.started_at,
                ended_at = EXCLUDED.ended_at
            "#,
        )
        .bind(record.match_id)
        .bind(&record.symbol)
        .bind(record.duration_secs)
        .bind(record.target_mark)
        .bind(record.starting_value)
        .bind(record.day)
        .bind(record.synthetic_day)
        .bind(&record.state)
        .bind(record.final_mark)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.ended_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM match_results WHERE match_id = $1")
            .bind(record.match_id)
            .execute(&mut *tx)
            .await?;

        for row in results {
            sqlx::query(
                r#"
                INSERT INTO match_results
                    (match_id, user_id, account_id, starting_cash, starting_shares, starting_value,
                     final_cash, final_shares, final_value, pnl, rank)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(row.match_id)
            .bind(&row.user_id)
            .bind(&row.account_id)
            .bind(row.starting_cash)
            .bind(row.starting_shares)
            .bind(row.starting_value)
            .bind(row.final_cash)
            .bind(row.final_shares)
            .bind(row.final_value)
            .bind(row.pnl)
            .bind(row.rank)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_match(&self, match_id: Uuid) -> PersistResult<(MatchRecord, Vec<ResultRow>)> {
        let row = sqlx::query(
            r#"
            SELECT match_id, symbol, duration_secs, target_mark, starting_value, day,
                   synthetic_day, state, final_mark, created_at, started_at, ended_at
            FROM matches
            WHERE match_id = $1
            "#,
        )
        .bind(match_id)
        .fetch_optional(&self.connection_pool)
        .await?
        .ok_or(PersistError::NotFound(match_id))?;

        let record = MatchRecord {
            match_id: row.try_get("match_id")?,
            symbol: row.try_get("symbol")?,
            duration_secs: row.try_get("duration_secs")?,
            target_mark: row.try_get("target_mark")?,
            starting_value: row.try_get("starting_value")?,
            day: row.try_get("day")?,
            synthetic_day: row.try_get("synthetic_day")?,
            state: row.try_get("state")?,
            final_mark: row.try_get("final_mark")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
        };

        let rows = sqlx::query(
            r#"
            SELECT match_id, user_id, account_id, starting_cash, starting_shares, starting_value,
                   final_cash, final_shares, final_value, pnl, rank
            FROM match_results
            WHERE match_id = $1
            ORDER BY rank ASC
            "#,
        )
        .bind(match_id)
        .fetch_all(&self.connection_pool)
        .await?;

        let results = rows
            .iter()
            .map(|r| {
                Ok(ResultRow {
                    match_id: r.try_get("match_id")?,
                    user_id: r.try_get("user_id")?,
                    account_id: r.try_get("account_id")?,
                    starting_cash: r.try_get("starting_cash")?,
                    starting_shares: r.try_get("starting_shares")?,
                    starting_value: r.try_get("starting_value")?,
                    final_cash: r.try_get("final_cash")?,
                    final_shares: r.try_get("final_shares")?,
                    final_value: r.try_get("final_value")?,
                    pnl: r.try_get("pnl")?,
                    rank: r.try_get("rank")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok((record, results))
    }
}
