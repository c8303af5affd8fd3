use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{
        format_datetime, parse_close_reason, parse_datetime, parse_optional_datetime, to_i64,
        to_u64,
    },
};
use crate::models::{Activity, CloseReason};

const ACTIVITY_COLUMNS: &str = "id, context_id, display_name, context_detail, start_time, end_time,
     duration_ms, is_idle_time, close_reason, updated_at";

fn row_to_activity(row: &Row) -> Result<Activity> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let updated_at: String = row.get("updated_at")?;
    let duration_ms: i64 = row.get("duration_ms")?;
    let is_idle_time: i64 = row.get("is_idle_time")?;
    let close_reason: Option<String> = row.get("close_reason")?;

    Ok(Activity {
        id: row.get("id")?,
        context_id: row.get("context_id")?,
        display_name: row.get("display_name")?,
        context_detail: row.get("context_detail")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        duration_ms: to_u64(duration_ms, "duration_ms")?,
        is_idle_time: is_idle_time != 0,
        close_reason: parse_close_reason(close_reason)?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn query_activities(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Activity>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut activities = Vec::new();
    while let Some(row) = rows.next()? {
        activities.push(row_to_activity(row)?);
    }
    Ok(activities)
}

impl Database {
    pub async fn upsert_activity(&self, activity: &Activity) -> Result<()> {
        let record = activity.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO activities (
                    id,
                    context_id,
                    display_name,
                    context_detail,
                    start_time,
                    end_time,
                    duration_ms,
                    is_idle_time,
                    close_reason,
                    updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(id) DO UPDATE SET
                    context_id = excluded.context_id,
                    display_name = excluded.display_name,
                    context_detail = excluded.context_detail,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    duration_ms = excluded.duration_ms,
                    is_idle_time = excluded.is_idle_time,
                    close_reason = excluded.close_reason,
                    updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.context_id,
                    record.display_name,
                    record.context_detail,
                    format_datetime(&record.start_time),
                    record.end_time.as_ref().map(format_datetime),
                    to_i64(record.duration_ms)?,
                    record.is_idle_time as i64,
                    record.close_reason.map(|reason| reason.as_str()),
                    format_datetime(&record.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_open_activities(&self) -> Result<Vec<Activity>> {
        self.execute(|conn| {
            query_activities(
                conn,
                &format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM activities
                     WHERE end_time IS NULL
                     ORDER BY start_time ASC"
                ),
                [],
            )
        })
        .await
    }

    /// Activities whose `[start_time, end_time ?? now)` intersects `[start, end)`.
    pub async fn get_activities_overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Activity>> {
        self.execute(move |conn| {
            query_activities(
                conn,
                &format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM activities
                     WHERE start_time < ?1 AND COALESCE(end_time, ?2) > ?3
                     ORDER BY start_time ASC"
                ),
                params![
                    format_datetime(&end),
                    format_datetime(&now),
                    format_datetime(&start)
                ],
            )
        })
        .await
    }

    pub async fn delete_activity(&self, activity_id: &str) -> Result<()> {
        let activity_id = activity_id.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM activities WHERE id = ?1", params![activity_id])?;
            Ok(())
        })
        .await
    }

    /// Closes every open activity except `keep_id` at `at`, inside one transaction.
    pub async fn close_open_activities_except(
        &self,
        keep_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let keep_id = keep_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let stale = query_activities(
                &tx,
                &format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM activities
                     WHERE end_time IS NULL AND id != ?1"
                ),
                params![keep_id],
            )?;

            for mut activity in stale.iter().cloned() {
                let end = at.max(activity.start_time);
                activity.close(end, CloseReason::Superseded);
                tx.execute(
                    "UPDATE activities
                     SET end_time = ?1,
                         duration_ms = ?2,
                         close_reason = ?3,
                         updated_at = ?4
                     WHERE id = ?5",
                    params![
                        activity.end_time.as_ref().map(format_datetime),
                        to_i64(activity.duration_ms)?,
                        CloseReason::Superseded.as_str(),
                        format_datetime(&activity.updated_at),
                        activity.id,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(stale.len())
        })
        .await
    }

    pub async fn ping(&self) -> Result<()> {
        self.execute(|conn| {
            conn.query_row("SELECT id FROM activities LIMIT 1", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("tracker.sqlite3")).unwrap();
        (dir, db)
    }

    fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }

    #[tokio::test]
    async fn upsert_replaces_existing_record() {
        let (_dir, db) = open_db();
        let start = now() - Duration::minutes(10);
        let mut activity = Activity::open("com.apple.mail", "Mail", Some("Inbox".into()), start);
        db.upsert_activity(&activity).await.unwrap();

        activity.close(start + Duration::minutes(4), CloseReason::ContextSwitch);
        db.upsert_activity(&activity).await.unwrap();

        let overlapping = db
            .get_activities_overlapping(start, start + Duration::minutes(10), now())
            .await
            .unwrap();
        assert_eq!(overlapping, vec![activity]);
        assert!(db.get_open_activities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overlap_query_treats_open_records_as_running() {
        let (_dir, db) = open_db();
        let base = now() - Duration::hours(1);

        let mut early = Activity::open("a", "A", None, base);
        early.close(base + Duration::minutes(5), CloseReason::ContextSwitch);
        let open = Activity::open("b", "B", None, base + Duration::minutes(20));
        db.upsert_activity(&early).await.unwrap();
        db.upsert_activity(&open).await.unwrap();

        let hits = db
            .get_activities_overlapping(
                base + Duration::minutes(30),
                base + Duration::minutes(40),
                now(),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, open.id);

        // A window ending exactly where `early` starts does not overlap it.
        let none = db
            .get_activities_overlapping(base - Duration::minutes(5), base, now())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn close_open_except_keeps_one_open_record() {
        let (_dir, db) = open_db();
        let base = now() - Duration::minutes(30);
        let stale = Activity::open("a", "A", None, base);
        let current = Activity::open("b", "B", None, base + Duration::minutes(10));
        db.upsert_activity(&stale).await.unwrap();
        db.upsert_activity(&current).await.unwrap();

        let closed = db
            .close_open_activities_except(&current.id, current.start_time)
            .await
            .unwrap();
        assert_eq!(closed, 1);

        let open = db.get_open_activities().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, current.id);

        let repaired = db
            .get_activities_overlapping(base, base + Duration::minutes(1), now())
            .await
            .unwrap();
        assert_eq!(repaired[0].end_time, Some(current.start_time));
        assert_eq!(repaired[0].duration_ms, 600_000);
        assert_eq!(repaired[0].close_reason, Some(CloseReason::Superseded));
    }

    #[tokio::test]
    async fn delete_and_ping() {
        let (_dir, db) = open_db();
        db.ping().await.unwrap();

        let activity = Activity::open("a", "A", None, now());
        db.upsert_activity(&activity).await.unwrap();
        db.delete_activity(&activity.id).await.unwrap();
        assert!(db.get_open_activities().await.unwrap().is_empty());
        db.ping().await.unwrap();
    }
}
