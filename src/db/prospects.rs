use chrono::{Duration, Utc};
use rusqlite::params;

use super::*;
use crate::types::{
    DealStatus, EntityKind, OutcomeKind, OutreachDirection, OutreachOutcome, Persona,
    ProspectStatus,
};
use crate::util::normalize_company;

const PROSPECT_COLUMNS: &str = "p.id, p.company_name, p.industry, p.employee_range, p.website,
    p.tier, p.score, p.status, p.notes, p.converted_deal_id, p.created_at, p.updated_at,
    (SELECT COUNT(*) FROM prospect_signals s WHERE s.prospect_id = p.id) AS signal_count,
    (SELECT COUNT(*) FROM prospect_contacts c WHERE c.prospect_id = p.id) AS contact_count";

const OUTREACH_COLUMNS: &str = "o.id, o.prospect_id, p.company_name, o.contact_id, o.method,
    o.direction, o.outcome, o.notes, o.occurred_at, o.next_followup_date, o.created_at";

impl PrismDb {
    // =========================================================================
    // Prospects
    // =========================================================================

    pub fn create_prospect(&self, prospect: &NewProspect) -> Result<DbProspect, DbError> {
        let id = new_id();
        let ts = now();
        self.conn.execute(
            "INSERT INTO prospects (
                id, company_name, company_norm, industry, employee_range, website,
                tier, score, status, notes, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 3, 0, ?7, ?8, ?9, ?9)",
            params![
                id,
                prospect.company_name.trim(),
                normalize_company(&prospect.company_name),
                prospect.industry,
                prospect.employee_range,
                prospect.website,
                prospect.status.unwrap_or(ProspectStatus::New),
                prospect.notes,
                ts,
            ],
        )?;
        self.get_prospect(&id)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_prospect(&self, id: &str) -> Result<Option<DbProspect>, DbError> {
        let sql = format!("SELECT {} FROM prospects p WHERE p.id = ?1", PROSPECT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_prospect_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_prospect_detail(&self, id: &str) -> Result<Option<ProspectDetail>, DbError> {
        let Some(prospect) = self.get_prospect(id)? else {
            return Ok(None);
        };
        Ok(Some(ProspectDetail {
            signals: self.signals_for_prospect(id)?,
            contacts: self.contacts_for_prospect(id)?,
            outreach: self.outreach_for_prospect(id)?,
            prospect,
        }))
    }

    /// Prospects, hottest first. Uses the `(tier, status, score)` index.
    pub fn list_prospects(
        &self,
        tier: Option<i64>,
        status: Option<ProspectStatus>,
    ) -> Result<Vec<DbProspect>, DbError> {
        let mut sql = format!("SELECT {} FROM prospects p WHERE 1 = 1", PROSPECT_COLUMNS);
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(tier) = tier {
            params.push(Box::new(tier));
            sql.push_str(&format!(" AND p.tier = ?{}", params.len()));
        }
        if let Some(status) = status {
            params.push(Box::new(status));
            sql.push_str(&format!(" AND p.status = ?{}", params.len()));
        }
        sql.push_str(" ORDER BY p.tier, p.score DESC, p.company_name COLLATE NOCASE");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            Self::map_prospect_row,
        )?;
        let mut prospects = Vec::new();
        for row in rows {
            prospects.push(row?);
        }
        Ok(prospects)
    }

    pub fn update_prospect(
        &self,
        id: &str,
        update: &ProspectUpdate,
    ) -> Result<Option<DbProspect>, DbError> {
        let company_norm = update.company_name.as_deref().map(normalize_company);
        let changed = self.conn.execute(
            "UPDATE prospects SET
                company_name = COALESCE(?2, company_name),
                company_norm = COALESCE(?3, company_norm),
                industry = COALESCE(?4, industry),
                employee_range = COALESCE(?5, employee_range),
                website = COALESCE(?6, website),
                status = COALESCE(?7, status),
                notes = COALESCE(?8, notes),
                updated_at = ?9
             WHERE id = ?1",
            params![
                id,
                update.company_name.as_deref().map(str::trim),
                company_norm,
                update.industry,
                update.employee_range,
                update.website,
                update.status,
                update.notes,
                now(),
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_prospect(id)
    }

    /// Persist a derived score and tier.
    pub fn set_prospect_score(&self, id: &str, score: f64, tier: i64) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE prospects SET score = ?2, tier = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, score.clamp(0.0, 100.0), tier, now()],
        )?;
        Ok(())
    }

    pub fn prospect_aggregates(&self) -> Result<ProspectAggregates, DbError> {
        let (total, average_score): (i64, f64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(AVG(score), 0) FROM prospects",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(ProspectAggregates {
            total,
            by_tier: self.count_by(
                "SELECT CAST(tier AS TEXT), COUNT(*) FROM prospects GROUP BY tier ORDER BY tier",
            )?,
            by_status: self.count_by(
                "SELECT status, COUNT(*) FROM prospects GROUP BY status ORDER BY COUNT(*) DESC",
            )?,
            average_score,
        })
    }

    /// Run a two-column `key, count` grouping query.
    pub(crate) fn count_by(&self, sql: &str) -> Result<Vec<CountBy>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(CountBy {
                key: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    fn map_prospect_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbProspect> {
        Ok(DbProspect {
            id: row.get(0)?,
            company_name: row.get(1)?,
            industry: row.get(2)?,
            employee_range: row.get(3)?,
            website: row.get(4)?,
            tier: row.get(5)?,
            score: row.get(6)?,
            status: row.get(7)?,
            notes: row.get(8)?,
            converted_deal_id: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            signal_count: row.get(12)?,
            contact_count: row.get(13)?,
        })
    }

    // =========================================================================
    // Signals
    // =========================================================================

    pub fn add_signal(
        &self,
        prospect_id: &str,
        signal_type: &str,
        weight: f64,
        description: Option<&str>,
        source: Option<&str>,
    ) -> Result<DbSignal, DbError> {
        let signal = DbSignal {
            id: new_id(),
            prospect_id: prospect_id.to_string(),
            signal_type: signal_type.trim().to_lowercase(),
            weight,
            description: description.map(str::to_string),
            source: source.map(str::to_string),
            detected_at: now(),
        };
        self.conn.execute(
            "INSERT INTO prospect_signals (
                id, prospect_id, signal_type, weight, description, source, detected_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                signal.id,
                signal.prospect_id,
                signal.signal_type,
                signal.weight,
                signal.description,
                signal.source,
                signal.detected_at,
            ],
        )?;
        Ok(signal)
    }

    /// Remove a signal owned by the prospect. Returns false if none matched.
    pub fn delete_signal(&self, prospect_id: &str, signal_id: &str) -> Result<bool, DbError> {
        let deleted = self.conn.execute(
            "DELETE FROM prospect_signals WHERE id = ?1 AND prospect_id = ?2",
            params![signal_id, prospect_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn signals_for_prospect(&self, prospect_id: &str) -> Result<Vec<DbSignal>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, prospect_id, signal_type, weight, description, source, detected_at
             FROM prospect_signals WHERE prospect_id = ?1 ORDER BY detected_at",
        )?;
        let rows = stmt.query_map(params![prospect_id], Self::map_signal_row)?;
        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    /// Every signal across all prospects, for the learner.
    pub fn all_signals(&self) -> Result<Vec<DbSignal>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, prospect_id, signal_type, weight, description, source, detected_at
             FROM prospect_signals",
        )?;
        let rows = stmt.query_map([], Self::map_signal_row)?;
        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    fn map_signal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbSignal> {
        Ok(DbSignal {
            id: row.get(0)?,
            prospect_id: row.get(1)?,
            signal_type: row.get(2)?,
            weight: row.get(3)?,
            description: row.get(4)?,
            source: row.get(5)?,
            detected_at: row.get(6)?,
        })
    }

    // =========================================================================
    // Contacts
    // =========================================================================

    pub fn add_contact(
        &self,
        prospect_id: &str,
        name: &str,
        role: Option<&str>,
        email: Option<&str>,
        persona: Persona,
        person_id: Option<&str>,
    ) -> Result<DbContact, DbError> {
        let contact = DbContact {
            id: new_id(),
            prospect_id: prospect_id.to_string(),
            name: name.trim().to_string(),
            role: role.map(str::to_string),
            email: email.map(str::to_string),
            persona,
            person_id: person_id.map(str::to_string),
            created_at: now(),
        };
        self.conn.execute(
            "INSERT INTO prospect_contacts (
                id, prospect_id, name, role, email, persona, person_id, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                contact.id,
                contact.prospect_id,
                contact.name,
                contact.role,
                contact.email,
                contact.persona,
                contact.person_id,
                contact.created_at,
            ],
        )?;
        Ok(contact)
    }

    pub fn contacts_for_prospect(&self, prospect_id: &str) -> Result<Vec<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, prospect_id, name, role, email, persona, person_id, created_at
             FROM prospect_contacts WHERE prospect_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![prospect_id], |row| {
            Ok(DbContact {
                id: row.get(0)?,
                prospect_id: row.get(1)?,
                name: row.get(2)?,
                role: row.get(3)?,
                email: row.get(4)?,
                persona: row.get(5)?,
                person_id: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    // =========================================================================
    // Outreach
    // =========================================================================

    /// Log an outreach touch. A first outbound touch moves a new prospect to
    /// `contacted`; a reply moves a contacted prospect to `engaged`.
    pub fn log_outreach(&self, entry: &NewOutreach) -> Result<DbOutreach, DbError> {
        self.with_transaction(|db| {
            let id = new_id();
            let ts = now();
            let outcome = entry.outcome.unwrap_or(OutreachOutcome::Pending);
            db.conn.execute(
                "INSERT INTO outreach_log (
                    id, prospect_id, contact_id, method, direction, outcome, notes,
                    occurred_at, next_followup_date, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id,
                    entry.prospect_id,
                    entry.contact_id,
                    entry.method,
                    entry.direction.unwrap_or(OutreachDirection::Outbound),
                    outcome,
                    entry.notes,
                    entry.occurred_at.as_deref().unwrap_or(&ts),
                    entry.next_followup_date,
                    ts,
                ],
            )?;
            db.conn.execute(
                "UPDATE prospects SET status = 'contacted', updated_at = ?2
                 WHERE id = ?1 AND status IN ('new', 'researching')",
                params![entry.prospect_id, ts],
            )?;
            if outcome.is_response() && outcome != OutreachOutcome::NotInterested {
                db.conn.execute(
                    "UPDATE prospects SET status = 'engaged', updated_at = ?2
                     WHERE id = ?1 AND status = 'contacted'",
                    params![entry.prospect_id, ts],
                )?;
            }
            if outcome == OutreachOutcome::MeetingBooked {
                db.record_outcome(EntityKind::Outreach, &id, OutcomeKind::MeetingBooked, None, None)?;
            }
            db.get_outreach(&id)?
                .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        })
    }

    pub fn get_outreach(&self, id: &str) -> Result<Option<DbOutreach>, DbError> {
        let sql = format!(
            "SELECT {} FROM outreach_log o JOIN prospects p ON p.id = o.prospect_id WHERE o.id = ?1",
            OUTREACH_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_outreach_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn outreach_for_prospect(&self, prospect_id: &str) -> Result<Vec<DbOutreach>, DbError> {
        let sql = format!(
            "SELECT {} FROM outreach_log o JOIN prospects p ON p.id = o.prospect_id
             WHERE o.prospect_id = ?1 ORDER BY o.occurred_at DESC",
            OUTREACH_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![prospect_id], Self::map_outreach_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Open touches whose follow-up falls on or before `date` (`YYYY-MM-DD`).
    pub fn outreach_due_before(&self, date: &str) -> Result<Vec<DbOutreach>, DbError> {
        let sql = format!(
            "SELECT {} FROM outreach_log o JOIN prospects p ON p.id = o.prospect_id
             WHERE o.next_followup_date IS NOT NULL
               AND substr(o.next_followup_date, 1, 10) <= ?1
               AND o.outcome IN ('pending', 'no_response')
             ORDER BY o.next_followup_date",
            OUTREACH_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![date], Self::map_outreach_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Outcomes by method and result. A touch is overdue when its follow-up
    /// date has passed, or when it has none and is older than
    /// `overdue_days`.
    pub fn outreach_stats(&self, overdue_days: i64) -> Result<OutreachStats, DbError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let stale_before = (Utc::now() - Duration::days(overdue_days)).to_rfc3339();

        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outreach_log", [], |row| row.get(0))?;
        let (settled, responded): (i64, i64) = self.conn.query_row(
            "SELECT
                COALESCE(SUM(outcome != 'pending'), 0),
                COALESCE(SUM(outcome IN ('replied', 'meeting_booked', 'not_interested')), 0)
             FROM outreach_log WHERE direction = 'outbound'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let overdue_followups: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outreach_log
             WHERE outcome IN ('pending', 'no_response')
               AND ((next_followup_date IS NOT NULL AND substr(next_followup_date, 1, 10) < ?1)
                 OR (next_followup_date IS NULL AND occurred_at < ?2))",
            params![today, stale_before],
            |row| row.get(0),
        )?;

        let horizon = (Utc::now() + Duration::days(7)).format("%Y-%m-%d").to_string();
        let upcoming_followups = self
            .outreach_due_before(&horizon)?
            .into_iter()
            .filter(|o| {
                o.next_followup_date
                    .as_deref()
                    .is_some_and(|d| d.get(..10).unwrap_or(d) >= today.as_str())
            })
            .collect();

        Ok(OutreachStats {
            total,
            by_method: self.count_by(
                "SELECT method, COUNT(*) FROM outreach_log GROUP BY method ORDER BY COUNT(*) DESC",
            )?,
            by_outcome: self.count_by(
                "SELECT outcome, COUNT(*) FROM outreach_log GROUP BY outcome ORDER BY COUNT(*) DESC",
            )?,
            response_rate: if settled > 0 {
                responded as f64 / settled as f64
            } else {
                0.0
            },
            overdue_followups,
            upcoming_followups,
        })
    }

    /// Prospect ids that ever got a response to outreach.
    pub fn prospects_with_response(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT prospect_id FROM outreach_log
             WHERE outcome IN ('replied', 'meeting_booked')",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn map_outreach_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbOutreach> {
        Ok(DbOutreach {
            id: row.get(0)?,
            prospect_id: row.get(1)?,
            company_name: row.get(2)?,
            contact_id: row.get(3)?,
            method: row.get(4)?,
            direction: row.get(5)?,
            outcome: row.get(6)?,
            notes: row.get(7)?,
            occurred_at: row.get(8)?,
            next_followup_date: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    // =========================================================================
    // Conversion
    // =========================================================================

    /// Turn a prospect into a deal. Idempotent: converting twice returns the
    /// original deal. Signals, contacts and outreach stay with the prospect.
    pub fn convert_prospect(&self, id: &str) -> Result<Option<Conversion>, DbError> {
        self.with_transaction(|db| {
            let Some(prospect) = db.get_prospect(id)? else {
                return Ok(None);
            };
            if let Some(deal_id) = prospect.converted_deal_id.as_deref() {
                if let Some(deal) = db.get_deal(deal_id)? {
                    return Ok(Some(Conversion {
                        prospect,
                        deal,
                        created: false,
                    }));
                }
            }

            let contacts = db.contacts_for_prospect(id)?;
            let lead = contacts
                .iter()
                .find(|c| c.persona == Persona::Champion)
                .or_else(|| contacts.first());
            let deal = db.create_deal(&NewDeal {
                company_name: prospect.company_name.clone(),
                contact_name: lead.map(|c| c.name.clone()),
                contact_role: lead.and_then(|c| c.role.clone()),
                status: Some(DealStatus::Discovery),
                industry: prospect.industry.clone(),
                employee_range: prospect.employee_range.clone(),
                ..Default::default()
            })?;
            db.conn.execute(
                "UPDATE prospects SET status = 'converted', converted_deal_id = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![id, deal.id, now()],
            )?;
            db.record_outcome(EntityKind::Prospect, id, OutcomeKind::ProspectConverted, None, None)?;

            let prospect = db
                .get_prospect(id)?
                .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))?;
            Ok(Some(Conversion {
                prospect,
                deal,
                created: true,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use crate::types::OutreachMethod;

    fn prospect(db: &PrismDb, name: &str) -> DbProspect {
        db.create_prospect(&NewProspect {
            company_name: name.into(),
            industry: Some("fintech".into()),
            ..Default::default()
        })
        .unwrap()
    }

    fn outreach(prospect_id: &str, outcome: OutreachOutcome, followup: Option<&str>) -> NewOutreach {
        NewOutreach {
            prospect_id: prospect_id.to_string(),
            contact_id: None,
            method: OutreachMethod::Email,
            direction: None,
            outcome: Some(outcome),
            notes: None,
            occurred_at: None,
            next_followup_date: followup.map(str::to_string),
        }
    }

    #[test]
    fn test_new_prospect_defaults() {
        let db = test_db();
        let p = prospect(&db, "Initech");
        assert_eq!(p.tier, 3);
        assert_eq!(p.score, 0.0);
        assert_eq!(p.status, ProspectStatus::New);
    }

    #[test]
    fn test_signal_add_and_delete() {
        let db = test_db();
        let p = prospect(&db, "Initech");
        let s = db
            .add_signal(&p.id, "Recent_Funding", 20.0, Some("Series B"), None)
            .unwrap();
        assert_eq!(s.signal_type, "recent_funding");
        assert_eq!(db.signals_for_prospect(&p.id).unwrap().len(), 1);

        assert!(!db.delete_signal("other", &s.id).unwrap());
        assert!(db.delete_signal(&p.id, &s.id).unwrap());
        assert!(db.signals_for_prospect(&p.id).unwrap().is_empty());
    }

    #[test]
    fn test_list_prospects_orders_by_tier_then_score() {
        let db = test_db();
        let a = prospect(&db, "A");
        let b = prospect(&db, "B");
        let c = prospect(&db, "C");
        db.set_prospect_score(&a.id, 45.0, 2).unwrap();
        db.set_prospect_score(&b.id, 80.0, 1).unwrap();
        db.set_prospect_score(&c.id, 55.0, 2).unwrap();

        let ids: Vec<String> = db
            .list_prospects(None, None)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![b.id.clone(), c.id.clone(), a.id.clone()]);
        assert_eq!(db.list_prospects(Some(2), None).unwrap().len(), 2);
    }

    #[test]
    fn test_outreach_advances_status() {
        let db = test_db();
        let p = prospect(&db, "Globex");
        db.log_outreach(&outreach(&p.id, OutreachOutcome::Pending, None))
            .unwrap();
        assert_eq!(
            db.get_prospect(&p.id).unwrap().unwrap().status,
            ProspectStatus::Contacted
        );
        db.log_outreach(&outreach(&p.id, OutreachOutcome::Replied, None))
            .unwrap();
        assert_eq!(
            db.get_prospect(&p.id).unwrap().unwrap().status,
            ProspectStatus::Engaged
        );
        assert_eq!(db.prospects_with_response().unwrap(), vec![p.id]);
    }

    #[test]
    fn test_outreach_due_and_stats() {
        let db = test_db();
        let p = prospect(&db, "Hooli");
        db.log_outreach(&outreach(&p.id, OutreachOutcome::Pending, Some("2020-01-01")))
            .unwrap();
        db.log_outreach(&outreach(&p.id, OutreachOutcome::Replied, Some("2020-01-01")))
            .unwrap();
        db.log_outreach(&outreach(&p.id, OutreachOutcome::NoResponse, Some("2999-01-01")))
            .unwrap();

        let due = db.outreach_due_before("2021-01-01").unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].company_name, "Hooli");

        let stats = db.outreach_stats(7).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.overdue_followups, 1);
        assert!((stats.response_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_convert_prospect_is_idempotent_and_preserves_children() {
        let db = test_db();
        let p = prospect(&db, "Umbrella Corp");
        db.add_signal(&p.id, "hiring_signals", 15.0, None, None).unwrap();
        db.add_contact(&p.id, "Alice Wu", Some("VP Eng"), None, Persona::Champion, None)
            .unwrap();
        db.log_outreach(&outreach(&p.id, OutreachOutcome::Replied, None))
            .unwrap();

        let first = db.convert_prospect(&p.id).unwrap().unwrap();
        assert!(first.created);
        assert_eq!(first.prospect.status, ProspectStatus::Converted);
        assert_eq!(first.prospect.converted_deal_id.as_deref(), Some(first.deal.id.as_str()));
        assert_eq!(first.deal.contact_name.as_deref(), Some("Alice Wu"));
        assert_eq!(first.deal.industry.as_deref(), Some("fintech"));

        let second = db.convert_prospect(&p.id).unwrap().unwrap();
        assert!(!second.created);
        assert_eq!(second.deal.id, first.deal.id);
        assert_eq!(db.list_deals(None).unwrap().len(), 1);

        let detail = db.get_prospect_detail(&p.id).unwrap().unwrap();
        assert_eq!(detail.signals.len(), 1);
        assert_eq!(detail.contacts.len(), 1);
        assert_eq!(detail.outreach.len(), 1);

        assert!(db.convert_prospect("missing").unwrap().is_none());
    }

    #[test]
    fn test_prospect_aggregates() {
        let db = test_db();
        let a = prospect(&db, "A");
        prospect(&db, "B");
        db.set_prospect_score(&a.id, 80.0, 1).unwrap();
        let agg = db.prospect_aggregates().unwrap();
        assert_eq!(agg.total, 2);
        assert!((agg.average_score - 40.0).abs() < 1e-9);
        assert_eq!(agg.by_tier.len(), 2);
        assert_eq!(agg.by_tier[0].key, "1");
    }
}
