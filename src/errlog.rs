//! Supplemental error log: timestamped free-text messages in the backing
//! store, queryable by pattern and age. Independent of the registries, so a
//! failed define can still be recorded.

use chrono::{DateTime, Duration, NaiveTime, SecondsFormat, Utc};

use crate::backend::SqlValue;
use crate::error::Result;
use crate::store::Store;

// Timestamps are compared as text in SQL, so they must render with a fixed
// fraction width and a uniform offset designator.
fn render_timestamp(when: DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Store {
    pub fn log_error(&self, msg: &str) -> Result<()> {
        let params = vec![
            (
                "@logdate".to_owned(),
                SqlValue::Text(render_timestamp(Utc::now())),
            ),
            ("@msg".to_owned(), SqlValue::Text(msg.to_owned())),
        ];
        self.db.execute(
            "INSERT INTO errorlog (logdate, msg) VALUES (@logdate, @msg)",
            &params,
        )?;
        Ok(())
    }

    /// Entries whose message matches `like` and whose age is at most
    /// `max_days` whole days, newest first. Today counts as day zero, so a
    /// zero-day window still covers entries logged earlier today.
    pub fn query_error_log(
        &self,
        like: &str,
        max_days: i64,
    ) -> Result<Vec<(DateTime<Utc>, String)>> {
        let oldest = (Utc::now() - Duration::days(max_days))
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();
        let params = vec![
            ("@like".to_owned(), SqlValue::Text(like.to_owned())),
            (
                "@oldest".to_owned(),
                SqlValue::Text(render_timestamp(oldest)),
            ),
        ];
        let rows = self.db.rows(
            "SELECT logdate, msg FROM errorlog \
             WHERE msg LIKE @like AND logdate >= @oldest \
             ORDER BY logdate DESC",
            &params,
        )?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let (SqlValue::Text(logdate), SqlValue::Text(msg)) = (&row[0], &row[1]) else {
                continue;
            };
            if let Ok(parsed) = DateTime::parse_from_rfc3339(logdate) {
                entries.push((parsed.with_timezone(&Utc), msg.clone()));
            }
        }
        Ok(entries)
    }

    pub fn clear_error_log(&self) -> Result<()> {
        self.db.execute("DELETE FROM errorlog", &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_query_clear() {
        let store = Store::open_in_memory().unwrap();
        store.log_error("define failed: type mismatch").unwrap();
        store.log_error("unrelated warning").unwrap();

        let entries = store.query_error_log("%mismatch%", 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].1.contains("type mismatch"));

        let all = store.query_error_log("%", 1).unwrap();
        assert_eq!(all.len(), 2);

        store.clear_error_log().unwrap();
        assert!(store.query_error_log("%", 1).unwrap().is_empty());
    }

    #[test]
    fn old_entries_age_out() {
        let store = Store::open_in_memory().unwrap();
        store.log_error("fresh").unwrap();

        let backdated = render_timestamp(Utc::now() - Duration::days(3));
        let params = vec![
            ("@logdate".to_owned(), SqlValue::Text(backdated)),
            ("@msg".to_owned(), SqlValue::Text("stale".to_owned())),
        ];
        store
            .db
            .execute(
                "INSERT INTO errorlog (logdate, msg) VALUES (@logdate, @msg)",
                &params,
            )
            .unwrap();

        // A zero-day window still includes entries logged earlier today,
        // but not the backdated one.
        let entries = store.query_error_log("%", 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, "fresh");

        let entries = store.query_error_log("%", 7).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
