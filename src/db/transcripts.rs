use rusqlite::{params, OptionalExtension};

use super::*;
use crate::types::{KnowledgeType, TranscriptStatus};

const TRANSCRIPT_COLUMNS: &str = "t.id, t.filename, t.original_path, t.content_hash, t.format,
    t.duration_minutes, t.call_date, t.call_type, t.context, t.speakers, t.status,
    t.needs_reprocess, t.processed_at, t.created_at,
    (SELECT COUNT(*) FROM segments s WHERE s.transcript_id = t.id) AS segment_count";

pub(crate) const SEGMENT_COLUMNS: &str = "s.id, s.transcript_id, s.position, s.content, s.speaker,
    s.start_time, s.end_time, s.knowledge_type, s.summary, s.confidence, s.importance,
    s.sentiment, s.actionable,
    (SELECT GROUP_CONCAT(tag, char(31)) FROM segment_tags st WHERE st.segment_id = s.id) AS tags,
    t.filename, t.call_date, s.created_at";

impl PrismDb {
    // =========================================================================
    // Transcripts
    // =========================================================================

    pub fn find_transcript_by_hash(&self, content_hash: &str) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM transcripts WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Insert a transcript keyed by content hash. A hash that already exists
    /// is a no-op and returns the existing id with `was_new = false`.
    pub fn upsert_transcript(&self, record: &NewTranscript) -> Result<UpsertedTranscript, DbError> {
        self.with_transaction(|db| {
            if let Some(id) = db.find_transcript_by_hash(&record.content_hash)? {
                return Ok(UpsertedTranscript { id, was_new: false });
            }

            let id = new_id();
            let speakers = serde_json::to_string(&record.speakers)?;
            db.conn.execute(
                "INSERT INTO transcripts (
                    id, filename, original_path, raw_content, content_hash, format,
                    duration_minutes, call_date, call_type, context, speakers, status,
                    needs_reprocess, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'processing', 0, ?12)",
                params![
                    id,
                    record.filename,
                    record.original_path,
                    record.raw_content,
                    record.content_hash,
                    record.format,
                    record.duration_minutes,
                    record.call_date,
                    record.call_type,
                    record.context,
                    speakers,
                    now(),
                ],
            )?;
            Ok(UpsertedTranscript { id, was_new: true })
        })
    }

    pub fn get_transcript(&self, id: &str) -> Result<Option<DbTranscript>, DbError> {
        let sql = format!("SELECT {} FROM transcripts t WHERE t.id = ?1", TRANSCRIPT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_transcript_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_transcript_content(&self, id: &str) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT raw_content FROM transcripts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Most recent transcripts first (by call date, then ingest time).
    pub fn list_transcripts(&self, limit: usize) -> Result<Vec<DbTranscript>, DbError> {
        let sql = format!(
            "SELECT {} FROM transcripts t
             ORDER BY COALESCE(t.call_date, t.created_at) DESC, t.created_at DESC
             LIMIT ?1",
            TRANSCRIPT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], Self::map_transcript_row)?;
        let mut transcripts = Vec::new();
        for row in rows {
            transcripts.push(row?);
        }
        Ok(transcripts)
    }

    /// Move a transcript to a new processing status. `processed_at` is
    /// stamped whenever the transcript reaches a settled state.
    pub fn set_transcript_status(
        &self,
        id: &str,
        status: TranscriptStatus,
    ) -> Result<(), DbError> {
        let needs_reprocess = status == TranscriptStatus::NeedsReprocess;
        let processed_at = match status {
            TranscriptStatus::Processed | TranscriptStatus::NeedsReprocess => Some(now()),
            _ => None,
        };
        self.conn.execute(
            "UPDATE transcripts
             SET status = ?2,
                 needs_reprocess = ?3,
                 processed_at = COALESCE(?4, processed_at)
             WHERE id = ?1",
            params![id, status, needs_reprocess as i32, processed_at],
        )?;
        Ok(())
    }

    /// Transcripts that were persisted but never reached segmentation,
    /// e.g. because the process stopped mid-pipeline.
    pub fn transcripts_pending_segmentation(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id FROM transcripts t
             WHERE t.status != 'error'
               AND NOT EXISTS (SELECT 1 FROM segments s WHERE s.transcript_id = t.id)
             ORDER BY t.created_at",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn transcripts_needing_reprocess(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM transcripts WHERE needs_reprocess = 1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn map_transcript_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbTranscript> {
        Ok(DbTranscript {
            id: row.get(0)?,
            filename: row.get(1)?,
            original_path: row.get(2)?,
            content_hash: row.get(3)?,
            format: row.get(4)?,
            duration_minutes: row.get(5)?,
            call_date: row.get(6)?,
            call_type: row.get(7)?,
            context: row.get(8)?,
            speakers: json_column(row.get(9)?)?,
            status: row.get(10)?,
            needs_reprocess: row.get::<_, i32>(11)? != 0,
            processed_at: row.get(12)?,
            created_at: row.get(13)?,
            segment_count: row.get(14)?,
        })
    }

    // =========================================================================
    // Segments
    // =========================================================================

    /// Atomically clear and rewrite the segments of a transcript. Returns the
    /// new segment ids in position order. Link rows of the old segments go
    /// with them; MEDDPICC and objection-response evidence keeps its row with
    /// a nulled source.
    pub fn replace_segments(
        &self,
        transcript_id: &str,
        segments: &[NewSegment],
    ) -> Result<Vec<String>, DbError> {
        self.with_transaction(|db| {
            db.conn.execute(
                "DELETE FROM segments WHERE transcript_id = ?1",
                params![transcript_id],
            )?;

            let created_at = now();
            let mut ids = Vec::with_capacity(segments.len());
            for segment in segments {
                let id = new_id();
                db.conn.execute(
                    "INSERT INTO segments (
                        id, transcript_id, position, content, speaker, start_time, end_time,
                        knowledge_type, summary, confidence, importance, sentiment, actionable,
                        created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    params![
                        id,
                        transcript_id,
                        segment.position,
                        segment.content,
                        segment.speaker,
                        segment.start_time,
                        segment.end_time,
                        segment.knowledge_type,
                        segment.summary,
                        segment.confidence.clamp(0.0, 1.0),
                        segment.importance,
                        segment.sentiment,
                        segment.actionable as i32,
                        created_at,
                    ],
                )?;
                for (tag, confidence) in &segment.tags {
                    let tag = tag.trim().to_lowercase();
                    if tag.is_empty() {
                        continue;
                    }
                    db.conn.execute(
                        "INSERT INTO segment_tags (segment_id, tag, confidence) VALUES (?1, ?2, ?3)
                         ON CONFLICT(segment_id, tag) DO UPDATE SET
                            confidence = MAX(segment_tags.confidence, excluded.confidence)",
                        params![id, tag, confidence.clamp(0.0, 1.0)],
                    )?;
                }
                ids.push(id);
            }
            Ok(ids)
        })
    }

    pub fn get_segment(&self, id: &str) -> Result<Option<DbSegment>, DbError> {
        let sql = format!(
            "SELECT {} FROM segments s JOIN transcripts t ON t.id = s.transcript_id
             WHERE s.id = ?1",
            SEGMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_segment_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn segments_for_transcript(&self, transcript_id: &str) -> Result<Vec<DbSegment>, DbError> {
        let sql = format!(
            "SELECT {} FROM segments s JOIN transcripts t ON t.id = s.transcript_id
             WHERE s.transcript_id = ?1 ORDER BY s.position",
            SEGMENT_COLUMNS
        );
        self.collect_segments(&sql, params![transcript_id])
    }

    pub fn segments_by_knowledge_type(
        &self,
        knowledge_type: KnowledgeType,
        limit: usize,
    ) -> Result<Vec<DbSegment>, DbError> {
        self.list_segments(&SegmentFilter {
            knowledge_type: Some(knowledge_type),
            limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn segments_by_tag(&self, tag: &str, limit: usize) -> Result<Vec<DbSegment>, DbError> {
        self.list_segments(&SegmentFilter {
            tag: Some(tag.to_string()),
            limit: Some(limit),
            ..Default::default()
        })
    }

    /// Filtered segment listing, newest call first.
    pub fn list_segments(&self, filter: &SegmentFilter) -> Result<Vec<DbSegment>, DbError> {
        let mut sql = format!(
            "SELECT {} FROM segments s JOIN transcripts t ON t.id = s.transcript_id WHERE 1 = 1",
            SEGMENT_COLUMNS
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(kt) = filter.knowledge_type {
            params.push(Box::new(kt));
            sql.push_str(&format!(" AND s.knowledge_type = ?{}", params.len()));
        }
        if let Some(tag) = filter.tag.as_deref().filter(|t| !t.trim().is_empty()) {
            params.push(Box::new(tag.trim().to_lowercase()));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM segment_tags st
                              WHERE st.segment_id = s.id AND st.tag = ?{})",
                params.len()
            ));
        }
        if let Some(query) = filter.query.as_deref().filter(|q| !q.trim().is_empty()) {
            params.push(Box::new(format!("%{}%", query.trim())));
            let idx = params.len();
            sql.push_str(&format!(
                " AND (s.content LIKE ?{idx} OR COALESCE(s.summary, '') LIKE ?{idx})"
            ));
        }

        sql.push_str(" ORDER BY COALESCE(t.call_date, t.created_at) DESC, s.position");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            Self::map_segment_row,
        )?;
        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?);
        }
        Ok(segments)
    }

    /// Every segment, for lexical scoring. Small-talk is excluded.
    pub fn searchable_segments(&self) -> Result<Vec<DbSegment>, DbError> {
        let sql = format!(
            "SELECT {} FROM segments s JOIN transcripts t ON t.id = s.transcript_id
             WHERE s.knowledge_type != 'small_talk'",
            SEGMENT_COLUMNS
        );
        self.collect_segments(&sql, [])
    }

    fn collect_segments<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<DbSegment>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::map_segment_row)?;
        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?);
        }
        Ok(segments)
    }

    pub(crate) fn map_segment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbSegment> {
        let tags: Option<String> = row.get(13)?;
        let mut tags: Vec<String> = tags
            .map(|t| t.split('\u{1f}').map(str::to_string).collect())
            .unwrap_or_default();
        tags.sort();
        Ok(DbSegment {
            id: row.get(0)?,
            transcript_id: row.get(1)?,
            position: row.get(2)?,
            content: row.get(3)?,
            speaker: row.get(4)?,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
            knowledge_type: row.get(7)?,
            summary: row.get(8)?,
            confidence: row.get(9)?,
            importance: row.get(10)?,
            sentiment: row.get(11)?,
            actionable: row.get::<_, i32>(12)? != 0,
            tags,
            filename: row.get(14)?,
            call_date: row.get(15)?,
            created_at: row.get(16)?,
        })
    }

    // =========================================================================
    // Per-transcript metrics
    // =========================================================================

    pub fn upsert_transcript_metrics(&self, metrics: &DbTranscriptMetrics) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO transcript_metrics (
                transcript_id, talk_ratio, user_words, total_words, question_count,
                user_question_count, speaker_count, strong_moments, improvement_areas, computed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(transcript_id) DO UPDATE SET
                talk_ratio = excluded.talk_ratio,
                user_words = excluded.user_words,
                total_words = excluded.total_words,
                question_count = excluded.question_count,
                user_question_count = excluded.user_question_count,
                speaker_count = excluded.speaker_count,
                strong_moments = excluded.strong_moments,
                improvement_areas = excluded.improvement_areas,
                computed_at = excluded.computed_at",
            params![
                metrics.transcript_id,
                metrics.talk_ratio,
                metrics.user_words,
                metrics.total_words,
                metrics.question_count,
                metrics.user_question_count,
                metrics.speaker_count,
                serde_json::to_string(&metrics.strong_moments)?,
                serde_json::to_string(&metrics.improvement_areas)?,
                metrics.computed_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_transcript_metrics(
        &self,
        transcript_id: &str,
    ) -> Result<Option<DbTranscriptMetrics>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT transcript_id, talk_ratio, user_words, total_words, question_count,
                    user_question_count, speaker_count, strong_moments, improvement_areas,
                    computed_at
             FROM transcript_metrics WHERE transcript_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![transcript_id], Self::map_metrics_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Metrics of the most recent calls, newest first.
    pub fn recent_transcript_metrics(
        &self,
        limit: usize,
    ) -> Result<Vec<DbTranscriptMetrics>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.transcript_id, m.talk_ratio, m.user_words, m.total_words, m.question_count,
                    m.user_question_count, m.speaker_count, m.strong_moments,
                    m.improvement_areas, m.computed_at
             FROM transcript_metrics m
             JOIN transcripts t ON t.id = m.transcript_id
             ORDER BY COALESCE(t.call_date, t.created_at) DESC, t.created_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::map_metrics_row)?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(row?);
        }
        Ok(metrics)
    }

    fn map_metrics_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbTranscriptMetrics> {
        Ok(DbTranscriptMetrics {
            transcript_id: row.get(0)?,
            talk_ratio: row.get(1)?,
            user_words: row.get(2)?,
            total_words: row.get(3)?,
            question_count: row.get(4)?,
            user_question_count: row.get(5)?,
            speaker_count: row.get(6)?,
            strong_moments: json_column(row.get(7)?)?,
            improvement_areas: json_column(row.get(8)?)?,
            computed_at: row.get(9)?,
        })
    }

    // =========================================================================
    // Ingest errors
    // =========================================================================

    pub fn record_ingest_error(&self, path: &str, kind: &str, message: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO ingest_errors (id, path, kind, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![new_id(), path, kind, message, now()],
        )?;
        Ok(())
    }

    pub fn list_ingest_errors(&self, limit: usize) -> Result<Vec<DbIngestError>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path, kind, message, created_at FROM ingest_errors
             ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(DbIngestError {
                id: row.get(0)?,
                path: row.get(1)?,
                kind: row.get(2)?,
                message: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut errors = Vec::new();
        for row in rows {
            errors.push(row?);
        }
        Ok(errors)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use crate::types::TranscriptFormat;

    pub(crate) fn sample_transcript(hash: &str) -> NewTranscript {
        NewTranscript {
            filename: format!("{}.txt", hash),
            original_path: format!("/tmp/{}.txt", hash),
            raw_content: "Alice: hello".to_string(),
            content_hash: hash.to_string(),
            format: TranscriptFormat::Plain,
            duration_minutes: None,
            call_date: Some("2026-03-01".to_string()),
            call_type: None,
            context: None,
            speakers: vec!["Alice".to_string()],
        }
    }

    pub(crate) fn sample_segment(position: i64, content: &str, kt: KnowledgeType) -> NewSegment {
        NewSegment {
            position,
            content: content.to_string(),
            speaker: Some("Alice".to_string()),
            start_time: None,
            end_time: None,
            knowledge_type: kt,
            summary: None,
            confidence: 0.8,
            importance: None,
            sentiment: None,
            actionable: false,
            tags: vec![],
        }
    }

    #[test]
    fn test_upsert_transcript_dedups_on_hash() {
        let db = test_db();
        let first = db.upsert_transcript(&sample_transcript("h1")).unwrap();
        assert!(first.was_new);

        let mut renamed = sample_transcript("h1");
        renamed.filename = "call-2.txt".into();
        let second = db.upsert_transcript(&renamed).unwrap();
        assert!(!second.was_new);
        assert_eq!(first.id, second.id);
        assert_eq!(db.list_transcripts(10).unwrap().len(), 1);
    }

    #[test]
    fn test_replace_segments_is_wholesale() {
        let db = test_db();
        let t = db.upsert_transcript(&sample_transcript("h2")).unwrap();

        let mut seg = sample_segment(0, "pricing is too high", KnowledgeType::SalesInsight);
        seg.tags = vec![("Objection".into(), 0.9), ("pricing".into(), 0.7)];
        db.replace_segments(&t.id, &[seg, sample_segment(1, "weather", KnowledgeType::SmallTalk)])
            .unwrap();
        assert_eq!(db.segments_for_transcript(&t.id).unwrap().len(), 2);

        let ids = db
            .replace_segments(&t.id, &[sample_segment(0, "only one", KnowledgeType::Unknown)])
            .unwrap();
        let segments = db.segments_for_transcript(&t.id).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].id, ids[0]);

        let tagged = db.segments_by_tag("objection", 10).unwrap();
        assert!(tagged.is_empty(), "tags go with the replaced segments");
    }

    #[test]
    fn test_segment_tags_are_lowercased_and_loaded() {
        let db = test_db();
        let t = db.upsert_transcript(&sample_transcript("h3")).unwrap();
        let mut seg = sample_segment(0, "budget owner is the CFO", KnowledgeType::SalesInsight);
        seg.tags = vec![("Economic_Buyer".into(), 0.9)];
        db.replace_segments(&t.id, &[seg]).unwrap();

        let found = db.segments_by_tag("economic_buyer", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tags, vec!["economic_buyer".to_string()]);
        assert_eq!(found[0].filename, "h3.txt");
    }

    #[test]
    fn test_list_segments_filters_combine() {
        let db = test_db();
        let t = db.upsert_transcript(&sample_transcript("h4")).unwrap();
        db.replace_segments(
            &t.id,
            &[
                sample_segment(0, "Our API handles SSO", KnowledgeType::ProductKnowledge),
                sample_segment(1, "Competitor X is cheaper", KnowledgeType::CompetitiveIntel),
            ],
        )
        .unwrap();

        let filter = SegmentFilter {
            knowledge_type: Some(KnowledgeType::ProductKnowledge),
            query: Some("sso".into()),
            ..Default::default()
        };
        let found = db.list_segments(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].position, 0);

        let filter = SegmentFilter {
            knowledge_type: Some(KnowledgeType::CompetitiveIntel),
            query: Some("sso".into()),
            ..Default::default()
        };
        assert!(db.list_segments(&filter).unwrap().is_empty());
    }

    #[test]
    fn test_deleting_transcript_cascades_to_segments() {
        let db = test_db();
        let t = db.upsert_transcript(&sample_transcript("h5")).unwrap();
        db.replace_segments(&t.id, &[sample_segment(0, "x", KnowledgeType::Unknown)])
            .unwrap();
        db.conn_ref()
            .execute("DELETE FROM transcripts WHERE id = ?1", params![t.id])
            .unwrap();
        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM segments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_pending_and_reprocess_queues() {
        let db = test_db();
        let a = db.upsert_transcript(&sample_transcript("a")).unwrap();
        let b = db.upsert_transcript(&sample_transcript("b")).unwrap();
        db.replace_segments(&b.id, &[sample_segment(0, "x", KnowledgeType::Unknown)])
            .unwrap();
        db.set_transcript_status(&b.id, TranscriptStatus::NeedsReprocess)
            .unwrap();

        assert_eq!(db.transcripts_pending_segmentation().unwrap(), vec![a.id]);
        assert_eq!(db.transcripts_needing_reprocess().unwrap(), vec![b.id.clone()]);

        db.set_transcript_status(&b.id, TranscriptStatus::Processed).unwrap();
        assert!(db.transcripts_needing_reprocess().unwrap().is_empty());
        let t = db.get_transcript(&b.id).unwrap().unwrap();
        assert_eq!(t.status, TranscriptStatus::Processed);
        assert!(t.processed_at.is_some());
        assert_eq!(t.segment_count, 1);
    }

    #[test]
    fn test_metrics_upsert_replaces() {
        let db = test_db();
        let t = db.upsert_transcript(&sample_transcript("m")).unwrap();
        let mut metrics = DbTranscriptMetrics {
            transcript_id: t.id.clone(),
            talk_ratio: Some(0.7),
            user_words: 70,
            total_words: 100,
            question_count: 3,
            user_question_count: 1,
            speaker_count: 2,
            strong_moments: vec!["clear next steps".into()],
            improvement_areas: vec![],
            computed_at: now(),
        };
        db.upsert_transcript_metrics(&metrics).unwrap();
        metrics.talk_ratio = Some(0.4);
        db.upsert_transcript_metrics(&metrics).unwrap();

        let stored = db.get_transcript_metrics(&t.id).unwrap().unwrap();
        assert_eq!(stored.talk_ratio, Some(0.4));
        assert_eq!(stored.strong_moments, vec!["clear next steps".to_string()]);
        assert_eq!(db.recent_transcript_metrics(5).unwrap().len(), 1);
    }

    #[test]
    fn test_ingest_errors_recorded() {
        let db = test_db();
        db.record_ingest_error("/tmp/bad.json", "PARSE_ERROR", "invalid JSON")
            .unwrap();
        let errors = db.list_ingest_errors(10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, "PARSE_ERROR");
    }
}
