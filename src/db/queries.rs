use rusqlite::params;

use super::*;
use crate::types::AnswerFeedback;

const QUERY_COLUMNS: &str = "id, session_id, query, intent, answer, sources, follow_ups,
    visualizations, response_time_ms, degraded, feedback, created_at";

impl PrismDb {
    // =========================================================================
    // Query log
    // =========================================================================

    pub fn save_query(&self, query: &NewQuery) -> Result<DbQuery, DbError> {
        let id = new_id();
        self.conn.execute(
            "INSERT INTO queries (
                id, session_id, query, intent, answer, sources, follow_ups,
                visualizations, response_time_ms, degraded, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                query.session_id,
                query.query,
                query.intent,
                query.answer,
                serde_json::to_string(&query.sources)?,
                serde_json::to_string(&query.follow_ups)?,
                serde_json::to_string(&query.visualizations)?,
                query.response_time_ms,
                query.degraded,
                now(),
            ],
        )?;
        self.get_query(&id)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_query(&self, id: &str) -> Result<Option<DbQuery>, DbError> {
        let sql = format!("SELECT {} FROM queries WHERE id = ?1", QUERY_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_query_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Returns false when no query has that id.
    pub fn set_query_feedback(&self, id: &str, feedback: AnswerFeedback) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE queries SET feedback = ?2 WHERE id = ?1",
            params![id, feedback.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Most recent first. With a session id, only that session's turns.
    pub fn query_history(
        &self,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DbQuery>, DbError> {
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut sql = format!("SELECT {} FROM queries", QUERY_COLUMNS);
        if let Some(session) = session_id {
            params.push(Box::new(session.to_string()));
            sql.push_str(" WHERE session_id = ?1");
        }
        params.push(Box::new(limit as i64));
        sql.push_str(&format!(
            " ORDER BY created_at DESC, rowid DESC LIMIT ?{}",
            params.len()
        ));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            Self::map_query_row,
        )?;
        let mut queries = Vec::new();
        for row in rows {
            queries.push(row?);
        }
        Ok(queries)
    }

    fn map_query_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbQuery> {
        Ok(DbQuery {
            id: row.get(0)?,
            session_id: row.get(1)?,
            query: row.get(2)?,
            intent: row.get(3)?,
            answer: row.get(4)?,
            sources: json_column(row.get(5)?)?,
            follow_ups: json_column(row.get(6)?)?,
            visualizations: json_column(row.get(7)?)?,
            response_time_ms: row.get(8)?,
            degraded: row.get(9)?,
            feedback: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    // =========================================================================
    // Dashboard
    // =========================================================================

    fn count(&self, sql: &str) -> Result<i64, DbError> {
        Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
    }

    pub fn dashboard_stats(&self) -> Result<DashboardStats, DbError> {
        let average_prospect_score: f64 = self.conn.query_row(
            "SELECT COALESCE(AVG(score), 0) FROM prospects",
            [],
            |row| row.get(0),
        )?;
        let average_talk_ratio: Option<f64> = self.conn.query_row(
            "SELECT AVG(talk_ratio) FROM transcript_metrics WHERE talk_ratio IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(DashboardStats {
            transcripts: self.count("SELECT COUNT(*) FROM transcripts")?,
            segments: self.count("SELECT COUNT(*) FROM segments")?,
            people: self.count("SELECT COUNT(*) FROM people")?,
            deals: self.count("SELECT COUNT(*) FROM deals")?,
            prospects: self.count("SELECT COUNT(*) FROM prospects")?,
            objections: self.count("SELECT COUNT(*) FROM objections")?,
            active_insights: self.count(
                "SELECT COUNT(*) FROM insights WHERE status IN ('active', 'validated')",
            )?,
            queries: self.count("SELECT COUNT(*) FROM queries")?,
            needs_reprocess: self.count("SELECT COUNT(*) FROM transcripts WHERE needs_reprocess = 1")?,
            ingest_errors: self.count("SELECT COUNT(*) FROM ingest_errors")?,
            knowledge_types: self.count_by(
                "SELECT knowledge_type, COUNT(*) FROM segments
                 GROUP BY knowledge_type ORDER BY COUNT(*) DESC",
            )?,
            deals_by_status: self.count_by(
                "SELECT status, COUNT(*) FROM deals GROUP BY status ORDER BY COUNT(*) DESC",
            )?,
            prospects_by_tier: self.count_by(
                "SELECT CAST(tier AS TEXT), COUNT(*) FROM prospects GROUP BY tier ORDER BY tier",
            )?,
            average_prospect_score,
            average_talk_ratio,
        })
    }
}
