use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::future::Future;

// Advisory locks are scoped to the Postgres session. Used as a best-effort guard against a
// manual run racing the scheduled one for the same job and date.
const LOCK_NAMESPACE: i64 = 0x5341_594F_574E; // "SAYOWN"

fn job_hash(job: &str) -> i64 {
    // FNV-1a; stable across builds, unlike the std hasher.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in job.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h as i64
}

fn lock_key(job: &str, as_of_date: NaiveDate) -> i64 {
    LOCK_NAMESPACE ^ job_hash(job) ^ i64::from(as_of_date.num_days_from_ce())
}

/// A held advisory lock, pinned to the pooled connection that took it.
///
/// Unlock must run on the same session, so the connection stays checked out until
/// [`JobLock::release`]. Dropping the guard without releasing closes that connection
/// instead of returning it to the pool, which ends the session and frees the lock.
#[derive(Debug)]
pub struct JobLock {
    conn: Option<PoolConnection<Postgres>>,
    job: String,
    key: i64,
}

impl JobLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let res: Result<(bool,), sqlx::Error> = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await;

        match res {
            Ok((true,)) => Ok(()),
            Ok((false,)) => {
                drop(conn.detach());
                anyhow::bail!(
                    "advisory lock was not held by its session (job={}, key={})",
                    self.job,
                    self.key
                )
            }
            Err(e) => {
                drop(conn.detach());
                Err(e).with_context(|| {
                    format!(
                        "failed to release advisory lock (job={}, key={})",
                        self.job, self.key
                    )
                })
            }
        }
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(job = %self.job, "job lock dropped without release; closing its connection");
            drop(conn.detach());
        }
    }
}

/// Returns the lock guard, or `None` when another session holds (job, date).
pub async fn try_acquire_job_lock(
    pool: &sqlx::PgPool,
    job: &str,
    as_of_date: NaiveDate,
) -> anyhow::Result<Option<JobLock>> {
    let key = lock_key(job, as_of_date);
    let mut conn = pool
        .acquire()
        .await
        .with_context(|| format!("failed to check out a connection for job lock (job={job})"))?;

    let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (job={job}, key={key})"))?;

    Ok(acquired.then(|| JobLock {
        conn: Some(conn),
        job: job.to_string(),
        key,
    }))
}

/// Runs `f` while holding the lock for (job, date). `Ok(None)` means another run holds it and
/// `f` was not called. A failed release is logged; the job's own result wins.
pub async fn with_job_lock<T, F, Fut>(
    pool: &sqlx::PgPool,
    job: &str,
    as_of_date: NaiveDate,
    f: F,
) -> anyhow::Result<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let Some(lock) = try_acquire_job_lock(pool, job, as_of_date).await? else {
        return Ok(None);
    };

    let res = f().await;
    if let Err(err) = lock.release().await {
        tracing::warn!(job, error = %format!("{err:#}"), "failed to release job lock");
    }
    res.map(Some)
}
