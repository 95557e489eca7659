use std::collections::HashMap;

use rusqlite::params;

use super::*;
use crate::types::{EntityKind, InsightStatus, InsightType, OutcomeKind};

const INSIGHT_COLUMNS: &str = "id, insight_type, insight_key, title, hypothesis, confidence,
    evidence, sample_size, priority, status, superseded_by, user_feedback, feedback_at,
    created_at, updated_at";

impl PrismDb {
    // =========================================================================
    // Insights
    // =========================================================================

    /// The live (active or validated) insight for a key, if any.
    pub fn current_insight(&self, insight_key: &str) -> Result<Option<DbInsight>, DbError> {
        let sql = format!(
            "SELECT {} FROM insights
             WHERE insight_key = ?1 AND status IN ('active', 'validated')
             ORDER BY created_at DESC LIMIT 1",
            INSIGHT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![insight_key], Self::map_insight_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Reconcile a freshly computed insight against the live one for its key.
    ///
    /// Unchanged evidence keeps the live insight. Changed evidence appends a
    /// new insight and marks the old one superseded, pointing at the new id.
    /// Either way one history snapshot is written.
    pub fn reconcile_insight(&self, draft: &InsightDraft) -> Result<(InsightWrite, String), DbError> {
        self.with_transaction(|db| {
            let current = db.current_insight(&draft.insight_key)?;
            if let Some(existing) = current.as_ref() {
                let same = existing.evidence == draft.evidence
                    && existing.sample_size == draft.sample_size
                    && (existing.confidence - draft.confidence).abs() < 1e-9;
                if same {
                    db.snapshot_insight(&existing.id, draft)?;
                    return Ok((InsightWrite::Unchanged, existing.id.clone()));
                }
            }

            let id = new_id();
            let ts = now();
            db.conn.execute(
                "INSERT INTO insights (
                    id, insight_type, insight_key, title, hypothesis, confidence, evidence,
                    sample_size, priority, status, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active', ?10, ?10)",
                params![
                    id,
                    draft.insight_type,
                    draft.insight_key,
                    draft.title,
                    draft.hypothesis,
                    draft.confidence,
                    serde_json::to_string(&draft.evidence)?,
                    draft.sample_size,
                    draft.priority,
                    ts,
                ],
            )?;
            db.snapshot_insight(&id, draft)?;

            match current {
                Some(existing) => {
                    db.conn.execute(
                        "UPDATE insights SET status = 'superseded', superseded_by = ?2, updated_at = ?3
                         WHERE id = ?1",
                        params![existing.id, id, ts],
                    )?;
                    Ok((InsightWrite::Superseded, id))
                }
                None => Ok((InsightWrite::Created, id)),
            }
        })
    }

    fn snapshot_insight(&self, insight_id: &str, draft: &InsightDraft) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO insight_history (
                insight_id, insight_key, confidence, evidence, sample_size, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                insight_id,
                draft.insight_key,
                draft.confidence,
                serde_json::to_string(&draft.evidence)?,
                draft.sample_size,
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn get_insight(&self, id: &str) -> Result<Option<DbInsight>, DbError> {
        let sql = format!("SELECT {} FROM insights WHERE id = ?1", INSIGHT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_insight_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Insights, high priority and most confident first.
    pub fn list_insights(
        &self,
        active_only: bool,
        insight_type: Option<InsightType>,
    ) -> Result<Vec<DbInsight>, DbError> {
        let mut sql = format!("SELECT {} FROM insights WHERE 1 = 1", INSIGHT_COLUMNS);
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if active_only {
            sql.push_str(" AND status IN ('active', 'validated')");
        }
        if let Some(kind) = insight_type {
            params.push(Box::new(kind));
            sql.push_str(&format!(" AND insight_type = ?{}", params.len()));
        }
        sql.push_str(
            " ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'normal' THEN 1 ELSE 2 END,
                       confidence DESC, created_at DESC",
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            Self::map_insight_row,
        )?;
        let mut insights = Vec::new();
        for row in rows {
            insights.push(row?);
        }
        Ok(insights)
    }

    /// Record user feedback. A verdict may validate or invalidate a live
    /// insight; superseded insights keep their status.
    pub fn set_insight_feedback(
        &self,
        id: &str,
        feedback: &str,
        verdict: Option<InsightStatus>,
    ) -> Result<Option<DbInsight>, DbError> {
        let changed = self.conn.execute(
            "UPDATE insights SET
                user_feedback = ?2,
                feedback_at = ?3,
                status = CASE WHEN status = 'superseded' THEN status ELSE COALESCE(?4, status) END,
                updated_at = ?3
             WHERE id = ?1",
            params![id, feedback, now(), verdict],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_insight(id)
    }

    pub fn insight_history(&self, insight_key: &str) -> Result<Vec<DbInsightSnapshot>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, insight_id, insight_key, confidence, evidence, sample_size, recorded_at
             FROM insight_history WHERE insight_key = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![insight_key], |row| {
            let evidence: Option<String> = row.get(4)?;
            Ok(DbInsightSnapshot {
                id: row.get(0)?,
                insight_id: row.get(1)?,
                insight_key: row.get(2)?,
                confidence: row.get(3)?,
                evidence: json_column(evidence)?,
                sample_size: row.get(5)?,
                recorded_at: row.get(6)?,
            })
        })?;
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    fn map_insight_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbInsight> {
        Ok(DbInsight {
            id: row.get(0)?,
            insight_type: row.get(1)?,
            insight_key: row.get(2)?,
            title: row.get(3)?,
            hypothesis: row.get(4)?,
            confidence: row.get(5)?,
            evidence: json_column(row.get(6)?)?,
            sample_size: row.get(7)?,
            priority: row.get(8)?,
            status: row.get(9)?,
            superseded_by: row.get(10)?,
            user_feedback: row.get(11)?,
            feedback_at: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    // =========================================================================
    // Learned weights
    // =========================================================================

    pub fn learned_weights(&self) -> Result<Vec<DbLearnedWeight>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT signal_type, default_weight, learned_weight, confidence, sample_size,
                    last_calibrated_at
             FROM learned_weights ORDER BY signal_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbLearnedWeight {
                signal_type: row.get(0)?,
                default_weight: row.get(1)?,
                learned_weight: row.get(2)?,
                confidence: row.get(3)?,
                sample_size: row.get(4)?,
                last_calibrated_at: row.get(5)?,
            })
        })?;
        let mut weights = Vec::new();
        for row in rows {
            weights.push(row?);
        }
        Ok(weights)
    }

    /// `signal_type → learned_weight` for every known signal type.
    pub fn learned_weight_map(&self) -> Result<HashMap<String, f64>, DbError> {
        Ok(self
            .learned_weights()?
            .into_iter()
            .map(|w| (w.signal_type, w.learned_weight))
            .collect())
    }

    /// Register a signal type the first time it is seen, using its observed
    /// weight as the default.
    pub fn ensure_learned_weight(&self, signal_type: &str, default_weight: f64) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO learned_weights (signal_type, default_weight, learned_weight)
             VALUES (?1, ?2, ?2)",
            params![signal_type, default_weight],
        )?;
        Ok(())
    }

    pub fn save_learned_weight(
        &self,
        signal_type: &str,
        learned_weight: f64,
        confidence: f64,
        sample_size: i64,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE learned_weights SET
                learned_weight = ?2, confidence = ?3, sample_size = ?4, last_calibrated_at = ?5
             WHERE signal_type = ?1",
            params![signal_type, learned_weight, confidence, sample_size, now()],
        )?;
        Ok(())
    }

    // =========================================================================
    // Outcomes
    // =========================================================================

    /// Record a terminal event. Recording the same event twice is a no-op.
    pub fn record_outcome(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
        outcome: OutcomeKind,
        value: Option<f64>,
        notes: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO outcomes (
                id, entity_type, entity_id, outcome, value, notes, occurred_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![new_id(), entity_type, entity_id, outcome, value, notes, now()],
        )?;
        Ok(())
    }

    pub fn outcomes_for(&self, entity_type: EntityKind) -> Result<Vec<DbOutcome>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_type, entity_id, outcome, value, notes, occurred_at
             FROM outcomes WHERE entity_type = ?1 ORDER BY occurred_at",
        )?;
        let rows = stmt.query_map(params![entity_type], |row| {
            Ok(DbOutcome {
                id: row.get(0)?,
                entity_type: row.get(1)?,
                entity_id: row.get(2)?,
                outcome: row.get(3)?,
                value: row.get(4)?,
                notes: row.get(5)?,
                occurred_at: row.get(6)?,
            })
        })?;
        let mut outcomes = Vec::new();
        for row in rows {
            outcomes.push(row?);
        }
        Ok(outcomes)
    }

    // =========================================================================
    // Learning runs
    // =========================================================================

    pub fn start_learning_run(&self, trigger: &str) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO learning_runs (trigger, started_at) VALUES (?1, ?2)",
            params![trigger, now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_learning_run(
        &self,
        run_id: i64,
        insights_created: i64,
        insights_superseded: i64,
        weights_calibrated: i64,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE learning_runs SET finished_at = ?2, insights_created = ?3,
                insights_superseded = ?4, weights_calibrated = ?5
             WHERE id = ?1",
            params![run_id, now(), insights_created, insights_superseded, weights_calibrated],
        )?;
        Ok(())
    }

    pub fn last_learning_run(&self) -> Result<Option<DbLearningRun>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, trigger, started_at, finished_at, insights_created,
                    insights_superseded, weights_calibrated
             FROM learning_runs ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], |row| {
            Ok(DbLearningRun {
                id: row.get(0)?,
                trigger: row.get(1)?,
                started_at: row.get(2)?,
                finished_at: row.get(3)?,
                insights_created: row.get(4)?,
                insights_superseded: row.get(5)?,
                weights_calibrated: row.get(6)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use crate::types::InsightPriority;
    use serde_json::json;

    fn draft(sample_size: i64, evidence: serde_json::Value) -> InsightDraft {
        InsightDraft {
            insight_type: InsightType::Icp,
            insight_key: "icp".into(),
            title: "Ideal customer profile".into(),
            hypothesis: "Fintech wins".into(),
            confidence: 0.5,
            evidence,
            sample_size,
            priority: InsightPriority::Normal,
        }
    }

    #[test]
    fn test_changed_evidence_supersedes() {
        let db = test_db();
        let (first_write, first_id) = db
            .reconcile_insight(&draft(3, json!({"industry": "fintech"})))
            .unwrap();
        assert_eq!(first_write, InsightWrite::Created);

        let (second_write, second_id) = db
            .reconcile_insight(&draft(4, json!({"industry": "saas"})))
            .unwrap();
        assert_eq!(second_write, InsightWrite::Superseded);

        let first = db.get_insight(&first_id).unwrap().unwrap();
        assert_eq!(first.status, InsightStatus::Superseded);
        assert_eq!(first.superseded_by.as_deref(), Some(second_id.as_str()));
        assert_eq!(first.hypothesis, "Fintech wins", "old insight content is never edited");
        assert_eq!(db.insight_history("icp").unwrap().len(), 2);
        assert_eq!(db.list_insights(true, None).unwrap().len(), 1);
    }

    #[test]
    fn test_unchanged_evidence_keeps_insight_but_snapshots() {
        let db = test_db();
        let (_, a) = db.reconcile_insight(&draft(3, json!({"n": 3}))).unwrap();
        let (write, b) = db.reconcile_insight(&draft(3, json!({"n": 3}))).unwrap();
        assert_eq!(write, InsightWrite::Unchanged);
        assert_eq!(a, b);
        assert_eq!(db.list_insights(false, None).unwrap().len(), 1);
        assert_eq!(db.insight_history("icp").unwrap().len(), 2);
    }

    #[test]
    fn test_feedback_does_not_revive_superseded() {
        let db = test_db();
        let (_, old) = db.reconcile_insight(&draft(3, json!({"v": 1}))).unwrap();
        db.reconcile_insight(&draft(5, json!({"v": 2}))).unwrap();
        let updated = db
            .set_insight_feedback(&old, "not useful", Some(InsightStatus::Validated))
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, InsightStatus::Superseded);
        assert_eq!(updated.user_feedback.as_deref(), Some("not useful"));
        assert!(db.set_insight_feedback("missing", "x", None).unwrap().is_none());
    }

    #[test]
    fn test_learned_weights_seeded_and_updated() {
        let db = test_db();
        let weights = db.learned_weight_map().unwrap();
        assert_eq!(weights.get("recent_funding"), Some(&20.0));
        assert_eq!(weights.get("inbound_signal"), Some(&25.0));

        db.save_learned_weight("recent_funding", 24.0, 0.4, 8).unwrap();
        db.ensure_learned_weight("recent_funding", 99.0).unwrap();
        db.ensure_learned_weight("podcast_guest", 7.0).unwrap();
        let weights = db.learned_weight_map().unwrap();
        assert_eq!(weights.get("recent_funding"), Some(&24.0));
        assert_eq!(weights.get("podcast_guest"), Some(&7.0));
    }

    #[test]
    fn test_record_outcome_is_idempotent() {
        let db = test_db();
        db.record_outcome(EntityKind::Deal, "d1", OutcomeKind::DealWon, Some(10.0), None)
            .unwrap();
        db.record_outcome(EntityKind::Deal, "d1", OutcomeKind::DealWon, Some(10.0), None)
            .unwrap();
        assert_eq!(db.outcomes_for(EntityKind::Deal).unwrap().len(), 1);
    }

    #[test]
    fn test_learning_run_bookkeeping() {
        let db = test_db();
        assert!(db.last_learning_run().unwrap().is_none());
        let run = db.start_learning_run("manual").unwrap();
        db.finish_learning_run(run, 2, 1, 3).unwrap();
        let last = db.last_learning_run().unwrap().unwrap();
        assert_eq!(last.insights_created, 2);
        assert!(last.finished_at.is_some());
    }
}
