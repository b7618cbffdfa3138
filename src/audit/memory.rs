use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{
    round2, AuditEntry, AuditError, AuditLog, AuditRecord, AuditStatus, PopularQuery, UserStatistics,
};

#[derive(Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot in append order
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<i64, AuditError> {
        let mut records = self.records.write().await;
        let id = records.len() as i64 + 1;
        records.push(AuditRecord { id, entry });
        Ok(id)
    }

    async fn list_recent(
        &self,
        user_id: i64,
        limit: u32,
        status: Option<AuditStatus>,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read().await;
        let mut matching: Vec<AuditRecord> = records
            .iter()
            .filter(|r| r.entry.user_id == user_id && status.map_or(true, |s| r.entry.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.entry.created_at.cmp(&a.entry.created_at).then(b.id.cmp(&a.id)));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn get(&self, id: i64, user_id: i64) -> Result<Option<AuditRecord>, AuditError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| r.id == id && r.entry.user_id == user_id)
            .cloned())
    }

    async fn list_popular(&self, limit: u32, days: u32) -> Result<Vec<PopularQuery>, AuditError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let records = self.records.read().await;

        // (count, total time, total rows, first seen) per (question, query)
        let mut groups: HashMap<(Option<String>, String), (i64, f64, i64, usize)> = HashMap::new();
        for (position, record) in records.iter().enumerate() {
            let entry = &record.entry;
            if entry.status != AuditStatus::Success || entry.created_at < cutoff {
                continue;
            }
            let group = groups
                .entry((entry.question.clone(), entry.query_text.clone()))
                .or_insert((0, 0.0, 0, position));
            group.0 += 1;
            group.1 += entry.execution_time_ms;
            group.2 += entry.row_count;
        }

        let mut popular: Vec<(usize, PopularQuery)> = groups
            .into_iter()
            .map(|((question, query_text), (count, time, rows, first))| {
                (
                    first,
                    PopularQuery {
                        question,
                        query_text,
                        execution_count: count,
                        avg_execution_time_ms: round2(time / count as f64),
                        total_rows_returned: rows,
                    },
                )
            })
            .collect();
        popular.sort_by(|a, b| b.1.execution_count.cmp(&a.1.execution_count).then(a.0.cmp(&b.0)));

        Ok(popular
            .into_iter()
            .take(limit as usize)
            .map(|(_, query)| query)
            .collect())
    }

    async fn user_statistics(&self, user_id: i64, days: u32) -> Result<UserStatistics, AuditError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let records = self.records.read().await;

        let mut successes = 0i64;
        let mut failures = 0i64;
        let mut success_time = 0.0;
        let mut rows = 0i64;
        for entry in records
            .iter()
            .map(|r| &r.entry)
            .filter(|e| e.user_id == user_id && e.created_at >= cutoff)
        {
            match entry.status {
                AuditStatus::Success => {
                    successes += 1;
                    success_time += entry.execution_time_ms;
                    rows += entry.row_count;
                }
                AuditStatus::Failed => failures += 1,
            }
        }

        let avg = if successes > 0 {
            success_time / successes as f64
        } else {
            0.0
        };
        Ok(UserStatistics::from_counts(user_id, days, successes, failures, avg, rows))
    }

    async fn purge_older_than(&self, days: u32) -> Result<u64, AuditError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.entry.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(user_id: i64, sql: &str, rows: usize, ms: f64) -> AuditEntry {
        AuditEntry::success(user_id, Some(format!("q: {}", sql)), sql, rows, ms)
    }

    fn failed(user_id: i64, sql: &str) -> AuditEntry {
        AuditEntry::failure(user_id, None, sql, "validation", "Empty query", 0.0)
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_filtered() {
        let log = MemoryAuditLog::new();
        log.append(ok(1, "SELECT 1 FROM a", 1, 1.0)).await.unwrap();
        log.append(failed(1, "DROP TABLE a")).await.unwrap();
        log.append(ok(1, "SELECT 2 FROM a", 1, 1.0)).await.unwrap();
        log.append(ok(2, "SELECT 3 FROM a", 1, 1.0)).await.unwrap();

        let recent = log.list_recent(1, 10, None).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].entry.query_text, "SELECT 2 FROM a");

        let failures = log.list_recent(1, 10, Some(AuditStatus::Failed)).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(log.list_recent(1, 1, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_is_scoped_to_owner() {
        let log = MemoryAuditLog::new();
        let id = log.append(ok(1, "SELECT 1 FROM a", 1, 1.0)).await.unwrap();
        assert!(log.get(id, 1).await.unwrap().is_some());
        assert!(log.get(id, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn popular_groups_successes() {
        let log = MemoryAuditLog::new();
        for ms in [10.0, 20.0, 30.0] {
            log.append(ok(1, "SELECT * FROM orders", 5, ms)).await.unwrap();
        }
        log.append(ok(2, "SELECT * FROM customers", 2, 4.0)).await.unwrap();
        log.append(failed(1, "SELECT * FROM orders")).await.unwrap();

        let popular = log.list_popular(10, 30).await.unwrap();
        assert_eq!(popular.len(), 2);
        assert_eq!(popular[0].query_text, "SELECT * FROM orders");
        assert_eq!(popular[0].execution_count, 3);
        assert_eq!(popular[0].avg_execution_time_ms, 20.0);
        assert_eq!(popular[0].total_rows_returned, 15);
    }

    #[tokio::test]
    async fn statistics_count_both_outcomes() {
        let log = MemoryAuditLog::new();
        log.append(ok(1, "SELECT 1 FROM a", 3, 10.0)).await.unwrap();
        log.append(ok(1, "SELECT 2 FROM a", 4, 20.0)).await.unwrap();
        log.append(failed(1, "x")).await.unwrap();
        log.append(failed(1, "y")).await.unwrap();

        let stats = log.user_statistics(1, 30).await.unwrap();
        assert_eq!(stats.total_queries, 4);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.avg_execution_time_ms, 15.0);
        assert_eq!(stats.total_rows_returned, 7);
    }

    #[tokio::test]
    async fn purge_drops_old_records() {
        let log = MemoryAuditLog::new();
        let mut old = ok(1, "SELECT 1 FROM a", 1, 1.0);
        old.created_at = Utc::now() - Duration::days(120);
        log.append(old).await.unwrap();
        log.append(ok(1, "SELECT 2 FROM a", 1, 1.0)).await.unwrap();

        assert_eq!(log.purge_older_than(90).await.unwrap(), 1);
        assert_eq!(log.len().await, 1);
    }
}
