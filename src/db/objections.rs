use rusqlite::params;

use super::*;
use crate::types::Effectiveness;
use crate::util::normalize_name;

impl PrismDb {
    // =========================================================================
    // Objections
    // =========================================================================

    /// Find or create the objection with this canonical text.
    pub fn upsert_objection(&self, text: &str, category: Option<&str>) -> Result<String, DbError> {
        let text_norm = normalize_name(text);
        let ts = now();
        self.conn.execute(
            "INSERT INTO objections (id, text, text_norm, category, frequency, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
             ON CONFLICT(text_norm) DO UPDATE SET
                category = COALESCE(objections.category, excluded.category)",
            params![new_id(), text.trim(), text_norm, category, ts],
        )?;
        Ok(self.conn.query_row(
            "SELECT id FROM objections WHERE text_norm = ?1",
            params![text_norm],
            |row| row.get(0),
        )?)
    }

    /// Record that a segment raised this objection. Frequency is the number
    /// of distinct segments, so re-linking the same segment is a no-op.
    pub fn link_objection_segment(&self, objection_id: &str, segment_id: &str) -> Result<(), DbError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO objection_segments (objection_id, segment_id) VALUES (?1, ?2)",
            params![objection_id, segment_id],
        )?;
        self.conn.execute(
            "UPDATE objections SET
                frequency = (SELECT COUNT(*) FROM objection_segments WHERE objection_id = ?1),
                last_seen = CASE WHEN ?2 > 0 THEN ?3 ELSE last_seen END
             WHERE id = ?1",
            params![objection_id, inserted as i64, now()],
        )?;
        Ok(())
    }

    /// Recount every objection after segments were rewritten. Objections
    /// that lost all their segments keep their row at frequency zero.
    pub fn refresh_objection_frequencies(&self) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE objections SET frequency =
                (SELECT COUNT(*) FROM objection_segments os WHERE os.objection_id = objections.id)",
            [],
        )?;
        Ok(())
    }

    /// Add a response unless the same text is already recorded for the objection.
    pub fn add_objection_response(
        &self,
        objection_id: &str,
        response_text: &str,
        effectiveness: Effectiveness,
        source_segment_id: Option<&str>,
    ) -> Result<(), DbError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM objection_responses
                           WHERE objection_id = ?1 AND response_text = ?2)",
            params![objection_id, response_text.trim()],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(());
        }
        self.conn.execute(
            "INSERT INTO objection_responses (
                id, objection_id, response_text, effectiveness, source_segment_id, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new_id(),
                objection_id,
                response_text.trim(),
                effectiveness,
                source_segment_id,
                now()
            ],
        )?;
        Ok(())
    }

    /// Objections ordered by how often they come up, with their responses.
    pub fn objections_by_frequency(&self, limit: usize) -> Result<Vec<DbObjection>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, text, category, frequency, first_seen, last_seen
             FROM objections ORDER BY frequency DESC, last_seen DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(DbObjection {
                id: row.get(0)?,
                text: row.get(1)?,
                category: row.get(2)?,
                frequency: row.get(3)?,
                first_seen: row.get(4)?,
                last_seen: row.get(5)?,
                responses: Vec::new(),
            })
        })?;
        let mut objections = Vec::new();
        for row in rows {
            let mut objection = row?;
            objection.responses = self.objection_responses(&objection.id)?;
            objections.push(objection);
        }
        Ok(objections)
    }

    pub fn objection_responses(&self, objection_id: &str) -> Result<Vec<DbObjectionResponse>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, objection_id, response_text, effectiveness, source_segment_id, created_at
             FROM objection_responses WHERE objection_id = ?1
             ORDER BY CASE effectiveness
                WHEN 'excellent' THEN 0 WHEN 'good' THEN 1 WHEN 'okay' THEN 2
                WHEN 'unknown' THEN 3 ELSE 4 END, created_at",
        )?;
        let rows = stmt.query_map(params![objection_id], |row| {
            Ok(DbObjectionResponse {
                id: row.get(0)?,
                objection_id: row.get(1)?,
                response_text: row.get(2)?,
                effectiveness: row.get(3)?,
                source_segment_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        let mut responses = Vec::new();
        for row in rows {
            responses.push(row?);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::super::transcripts::tests::{sample_segment, sample_transcript};
    use super::*;
    use crate::types::KnowledgeType;

    #[test]
    fn test_objection_frequency_counts_distinct_segments() {
        let db = test_db();
        let t = db.upsert_transcript(&sample_transcript("o1")).unwrap();
        let ids = db
            .replace_segments(
                &t.id,
                &[
                    sample_segment(0, "too expensive", KnowledgeType::SalesInsight),
                    sample_segment(1, "price is high", KnowledgeType::SalesInsight),
                ],
            )
            .unwrap();

        let a = db.upsert_objection("Too expensive", Some("pricing")).unwrap();
        let b = db.upsert_objection("too  expensive!", None).unwrap();
        assert_eq!(a, b);

        db.link_objection_segment(&a, &ids[0]).unwrap();
        db.link_objection_segment(&a, &ids[0]).unwrap();
        db.link_objection_segment(&a, &ids[1]).unwrap();

        let top = db.objections_by_frequency(5).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].frequency, 2);
        assert_eq!(top[0].category.as_deref(), Some("pricing"));
    }

    #[test]
    fn test_responses_are_deduplicated_and_ranked() {
        let db = test_db();
        let id = db.upsert_objection("We use a competitor", None).unwrap();
        db.add_objection_response(&id, "Offer a bake-off", Effectiveness::Okay, None)
            .unwrap();
        db.add_objection_response(&id, "Share migration case study", Effectiveness::Excellent, None)
            .unwrap();
        db.add_objection_response(&id, "Offer a bake-off", Effectiveness::Okay, None)
            .unwrap();

        let responses = db.objection_responses(&id).unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].effectiveness, Effectiveness::Excellent);
    }
}
