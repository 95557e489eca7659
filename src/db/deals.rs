use rusqlite::{params, OptionalExtension};

use super::transcripts::SEGMENT_COLUMNS;
use super::*;
use crate::types::{DealStatus, MeddpiccLetter, MeddpiccStatus};
use crate::util::normalize_company;

const DEAL_COLUMNS: &str = "d.id, d.company_name, d.contact_name, d.contact_role, d.status,
    d.value_amount, d.value_currency, d.expected_close_date, d.industry, d.employee_range,
    d.last_activity_at, d.closed_at, d.created_at, d.updated_at,
    (SELECT COUNT(*) FROM deal_meddpicc m
     WHERE m.deal_id = d.id AND m.status = 'identified') AS meddpicc_identified";

impl PrismDb {
    // =========================================================================
    // Deals
    // =========================================================================

    pub fn create_deal(&self, deal: &NewDeal) -> Result<DbDeal, DbError> {
        let id = new_id();
        let ts = now();
        let status = deal.status.unwrap_or(DealStatus::Prospecting);
        let closed_at = status.is_closed().then(|| ts.clone());
        self.conn.execute(
            "INSERT INTO deals (
                id, company_name, company_norm, contact_name, contact_role, status,
                value_amount, value_currency, expected_close_date, industry, employee_range,
                closed_at, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                id,
                deal.company_name.trim(),
                normalize_company(&deal.company_name),
                deal.contact_name,
                deal.contact_role,
                status,
                deal.value_amount,
                deal.value_currency.as_deref().unwrap_or("USD"),
                deal.expected_close_date,
                deal.industry,
                deal.employee_range,
                closed_at,
                ts,
            ],
        )?;
        self.get_deal(&id)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_deal(&self, id: &str) -> Result<Option<DbDeal>, DbError> {
        let sql = format!("SELECT {} FROM deals d WHERE d.id = ?1", DEAL_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_deal_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Deals, optionally filtered by status, most recently active first.
    pub fn list_deals(&self, status: Option<DealStatus>) -> Result<Vec<DbDeal>, DbError> {
        let mut sql = format!("SELECT {} FROM deals d", DEAL_COLUMNS);
        if status.is_some() {
            sql.push_str(" WHERE d.status = ?1");
        }
        sql.push_str(" ORDER BY COALESCE(d.last_activity_at, d.updated_at) DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match status {
            Some(s) => stmt.query_map(params![s], Self::map_deal_row)?,
            None => stmt.query_map([], Self::map_deal_row)?,
        };
        let mut deals = Vec::new();
        for row in rows {
            deals.push(row?);
        }
        Ok(deals)
    }

    /// Open deal for a normalized company, preferring the most recently active.
    pub fn find_deal_by_company(&self, company_norm: &str) -> Result<Option<DbDeal>, DbError> {
        let sql = format!(
            "SELECT {} FROM deals d WHERE d.company_norm = ?1
             ORDER BY (d.status IN ('won', 'lost')), COALESCE(d.last_activity_at, d.updated_at) DESC
             LIMIT 1",
            DEAL_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![company_norm], Self::map_deal_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn deal_candidates(&self) -> Result<Vec<DealCandidate>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, company_name, company_norm FROM deals")?;
        let rows = stmt.query_map([], |row| {
            Ok(DealCandidate {
                id: row.get(0)?,
                company_name: row.get(1)?,
                company_norm: row.get(2)?,
            })
        })?;
        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }
        Ok(candidates)
    }

    pub fn closed_deals(&self) -> Result<Vec<DbDeal>, DbError> {
        let sql = format!(
            "SELECT {} FROM deals d WHERE d.status IN ('won', 'lost') ORDER BY d.closed_at",
            DEAL_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::map_deal_row)?;
        let mut deals = Vec::new();
        for row in rows {
            deals.push(row?);
        }
        Ok(deals)
    }

    /// Apply a user edit. Returns the previous status alongside the new row
    /// so callers can react to a close.
    pub fn update_deal(
        &self,
        id: &str,
        update: &DealUpdate,
    ) -> Result<Option<(DealStatus, DbDeal)>, DbError> {
        let Some(current) = self.get_deal(id)? else {
            return Ok(None);
        };
        let ts = now();
        let status = update.status.unwrap_or(current.status);
        let closed_at = match (current.status.is_closed(), status.is_closed()) {
            (false, true) => Some(ts.clone()),
            (true, true) => current.closed_at.clone(),
            _ => None,
        };
        self.conn.execute(
            "UPDATE deals SET
                contact_name = COALESCE(?2, contact_name),
                contact_role = COALESCE(?3, contact_role),
                status = ?4,
                value_amount = COALESCE(?5, value_amount),
                value_currency = COALESCE(?6, value_currency),
                expected_close_date = COALESCE(?7, expected_close_date),
                industry = COALESCE(?8, industry),
                employee_range = COALESCE(?9, employee_range),
                closed_at = ?10,
                updated_at = ?11
             WHERE id = ?1",
            params![
                id,
                update.contact_name,
                update.contact_role,
                status,
                update.value_amount,
                update.value_currency,
                update.expected_close_date,
                update.industry,
                update.employee_range,
                closed_at,
                ts,
            ],
        )?;
        Ok(self.get_deal(id)?.map(|deal| (current.status, deal)))
    }

    /// Bump last activity to `at` if it is newer than what is recorded.
    pub fn touch_deal_activity(&self, id: &str, at: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE deals SET last_activity_at = ?2
             WHERE id = ?1 AND (last_activity_at IS NULL OR last_activity_at < ?2)",
            params![id, at],
        )?;
        Ok(())
    }

    /// Idempotent link between a segment and a deal.
    pub fn link_segment_to_deal(&self, segment_id: &str, deal_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO segment_deals (segment_id, deal_id) VALUES (?1, ?2)",
            params![segment_id, deal_id],
        )?;
        Ok(())
    }

    pub fn segments_for_deal(&self, deal_id: &str, limit: usize) -> Result<Vec<DbSegment>, DbError> {
        let sql = format!(
            "SELECT {} FROM segments s
             JOIN transcripts t ON t.id = s.transcript_id
             JOIN segment_deals sd ON sd.segment_id = s.id
             WHERE sd.deal_id = ?1
             ORDER BY COALESCE(t.call_date, t.created_at) DESC, s.position
             LIMIT ?2",
            SEGMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![deal_id, limit as i64], Self::map_segment_row)?;
        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?);
        }
        Ok(segments)
    }

    fn map_deal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbDeal> {
        Ok(DbDeal {
            id: row.get(0)?,
            company_name: row.get(1)?,
            contact_name: row.get(2)?,
            contact_role: row.get(3)?,
            status: row.get(4)?,
            value_amount: row.get(5)?,
            value_currency: row.get(6)?,
            expected_close_date: row.get(7)?,
            industry: row.get(8)?,
            employee_range: row.get(9)?,
            last_activity_at: row.get(10)?,
            closed_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            meddpicc_identified: row.get(14)?,
        })
    }

    // =========================================================================
    // MEDDPICC
    // =========================================================================

    /// All eight letters for a deal, in framework order. Letters with no row
    /// materialize as `unknown`.
    pub fn get_deal_meddpicc(&self, deal_id: &str) -> Result<Vec<DbMeddpiccEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT letter, status, evidence, source_segment_id, confidence, updated_at
             FROM deal_meddpicc WHERE deal_id = ?1",
        )?;
        let rows = stmt.query_map(params![deal_id], |row| {
            let letter: MeddpiccLetter = row.get(0)?;
            Ok(DbMeddpiccEntry {
                letter,
                label: letter.label().to_string(),
                status: row.get(1)?,
                evidence: row.get(2)?,
                source_segment_id: row.get(3)?,
                confidence: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;
        let mut stored = Vec::new();
        for row in rows {
            stored.push(row?);
        }

        Ok(MeddpiccLetter::ALL
            .iter()
            .map(|letter| {
                stored
                    .iter()
                    .find(|e| e.letter == *letter)
                    .cloned()
                    .unwrap_or_else(|| DbMeddpiccEntry {
                        letter: *letter,
                        label: letter.label().to_string(),
                        status: MeddpiccStatus::Unknown,
                        evidence: None,
                        source_segment_id: None,
                        confidence: 0.0,
                        updated_at: None,
                    })
            })
            .collect())
    }

    fn meddpicc_status(
        &self,
        deal_id: &str,
        letter: MeddpiccLetter,
    ) -> Result<Option<MeddpiccStatus>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT status FROM deal_meddpicc WHERE deal_id = ?1 AND letter = ?2",
                params![deal_id, letter],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Pipeline-side MEDDPICC write. Only moves a letter upward
    /// (`unknown → partial → identified`); returns whether it changed.
    pub fn upgrade_meddpicc(
        &self,
        deal_id: &str,
        letter: MeddpiccLetter,
        status: MeddpiccStatus,
        evidence: &str,
        source_segment_id: Option<&str>,
        confidence: f64,
    ) -> Result<bool, DbError> {
        let current = self.meddpicc_status(deal_id, letter)?;
        if current.is_some_and(|c| c.rank() >= status.rank()) {
            return Ok(false);
        }
        self.write_meddpicc(deal_id, letter, status, Some(evidence), source_segment_id, confidence)?;
        Ok(true)
    }

    /// User edit. Any transition is allowed, including downgrades.
    pub fn set_meddpicc(
        &self,
        deal_id: &str,
        letter: MeddpiccLetter,
        status: MeddpiccStatus,
        evidence: Option<&str>,
    ) -> Result<(), DbError> {
        self.write_meddpicc(deal_id, letter, status, evidence, None, 1.0)
    }

    fn write_meddpicc(
        &self,
        deal_id: &str,
        letter: MeddpiccLetter,
        status: MeddpiccStatus,
        evidence: Option<&str>,
        source_segment_id: Option<&str>,
        confidence: f64,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO deal_meddpicc (
                id, deal_id, letter, status, evidence, source_segment_id, confidence, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(deal_id, letter) DO UPDATE SET
                status = excluded.status,
                evidence = COALESCE(excluded.evidence, deal_meddpicc.evidence),
                source_segment_id = excluded.source_segment_id,
                confidence = excluded.confidence,
                updated_at = excluded.updated_at",
            params![
                new_id(),
                deal_id,
                letter,
                status,
                evidence,
                source_segment_id,
                confidence.clamp(0.0, 1.0),
                now(),
            ],
        )?;
        Ok(())
    }
}
