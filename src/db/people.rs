use rusqlite::params;

use super::transcripts::SEGMENT_COLUMNS;
use super::*;
use crate::types::RelationshipType;
use crate::util::{normalize_company, normalize_name};

const PERSON_COLUMNS: &str = "p.id, p.name, p.role, p.company, p.email, p.phone, p.notes,
    p.relationship_type,
    (SELECT COUNT(*) FROM segment_people sp WHERE sp.person_id = p.id) AS mention_count,
    p.created_at, p.updated_at";

impl PrismDb {
    // =========================================================================
    // People
    // =========================================================================

    /// Exact lookup on the `(name_norm, company_norm)` identity.
    pub fn find_person(
        &self,
        name_norm: &str,
        company_norm: &str,
    ) -> Result<Option<DbPerson>, DbError> {
        let sql = format!(
            "SELECT {} FROM people p WHERE p.name_norm = ?1 AND p.company_norm = ?2",
            PERSON_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![name_norm, company_norm], Self::map_person_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Candidates for fuzzy matching. With a company, restricted to that
    /// company plus people with no company on record.
    pub fn person_candidates(
        &self,
        company_norm: Option<&str>,
    ) -> Result<Vec<PersonCandidate>, DbError> {
        let map = |row: &rusqlite::Row<'_>| {
            Ok(PersonCandidate {
                id: row.get(0)?,
                name: row.get(1)?,
                name_norm: row.get(2)?,
                company_norm: row.get(3)?,
            })
        };
        let mut candidates = Vec::new();
        match company_norm.filter(|c| !c.is_empty()) {
            Some(company) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, name_norm, company_norm FROM people
                     WHERE company_norm = ?1 OR company_norm = ''",
                )?;
                for row in stmt.query_map(params![company], map)? {
                    candidates.push(row?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT id, name, name_norm, company_norm FROM people")?;
                for row in stmt.query_map([], map)? {
                    candidates.push(row?);
                }
            }
        }
        Ok(candidates)
    }

    /// Create a person, or return the existing row with the same identity.
    pub fn create_person(
        &self,
        name: &str,
        company: Option<&str>,
        role: Option<&str>,
        relationship_type: RelationshipType,
    ) -> Result<DbPerson, DbError> {
        let name_norm = normalize_name(name);
        let company_norm = company.map(normalize_company).unwrap_or_default();
        let ts = now();
        self.conn.execute(
            "INSERT INTO people (
                id, name, name_norm, role, company, company_norm, relationship_type,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(name_norm, company_norm) DO NOTHING",
            params![
                new_id(),
                name.trim(),
                name_norm,
                role,
                company.map(str::trim),
                company_norm,
                relationship_type,
                ts,
            ],
        )?;
        self.find_person(&name_norm, &company_norm)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_person(&self, id: &str) -> Result<Option<DbPerson>, DbError> {
        let sql = format!("SELECT {} FROM people p WHERE p.id = ?1", PERSON_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_person_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All people, most-mentioned first.
    pub fn list_people(&self) -> Result<Vec<DbPerson>, DbError> {
        let sql = format!(
            "SELECT {} FROM people p ORDER BY mention_count DESC, p.name COLLATE NOCASE",
            PERSON_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::map_person_row)?;
        let mut people = Vec::new();
        for row in rows {
            people.push(row?);
        }
        Ok(people)
    }

    /// People whose normalized name contains every token of `needle`.
    pub fn search_people(&self, needle: &str) -> Result<Vec<DbPerson>, DbError> {
        let tokens: Vec<String> = normalize_name(needle)
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Ok(self
            .list_people()?
            .into_iter()
            .filter(|p| {
                let name = normalize_name(&p.name);
                !tokens.is_empty() && tokens.iter().all(|t| name.contains(t.as_str()))
            })
            .collect())
    }

    /// Apply a user edit. Renames recompute the identity columns.
    pub fn update_person(
        &self,
        id: &str,
        update: &PersonUpdate,
    ) -> Result<Option<DbPerson>, DbError> {
        let Some(current) = self.get_person(id)? else {
            return Ok(None);
        };
        let name = update.name.as_deref().unwrap_or(&current.name);
        let company = update.company.as_deref().or(current.company.as_deref());
        self.conn.execute(
            "UPDATE people SET
                name = ?2, name_norm = ?3, company = ?4, company_norm = ?5,
                role = COALESCE(?6, role),
                email = COALESCE(?7, email),
                phone = COALESCE(?8, phone),
                notes = COALESCE(?9, notes),
                relationship_type = COALESCE(?10, relationship_type),
                updated_at = ?11
             WHERE id = ?1",
            params![
                id,
                name.trim(),
                normalize_name(name),
                company,
                company.map(normalize_company).unwrap_or_default(),
                update.role,
                update.email,
                update.phone,
                update.notes,
                update.relationship_type,
                now(),
            ],
        )?;
        self.get_person(id)
    }

    /// Fill in role/company gaps discovered by the pipeline without
    /// overwriting anything the user has set.
    pub fn enrich_person(&self, id: &str, role: Option<&str>) -> Result<(), DbError> {
        if let Some(role) = role.filter(|r| !r.trim().is_empty()) {
            self.conn.execute(
                "UPDATE people SET role = ?2, updated_at = ?3 WHERE id = ?1 AND role IS NULL",
                params![id, role.trim(), now()],
            )?;
        }
        Ok(())
    }

    /// Idempotent link between a segment and a person.
    pub fn link_segment_to_person(&self, segment_id: &str, person_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO segment_people (segment_id, person_id) VALUES (?1, ?2)",
            params![segment_id, person_id],
        )?;
        Ok(())
    }

    pub fn segments_for_person(
        &self,
        person_id: &str,
        limit: usize,
    ) -> Result<Vec<DbSegment>, DbError> {
        let sql = format!(
            "SELECT {} FROM segments s
             JOIN transcripts t ON t.id = s.transcript_id
             JOIN segment_people sp ON sp.segment_id = s.id
             WHERE sp.person_id = ?1
             ORDER BY COALESCE(t.call_date, t.created_at) DESC, s.position
             LIMIT ?2",
            SEGMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![person_id, limit as i64], Self::map_segment_row)?;
        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?);
        }
        Ok(segments)
    }

    // =========================================================================
    // Linker aliases
    // =========================================================================

    /// Entity a previous linker pass resolved this mention to, if any.
    /// `kind` is `person` or `deal`; `scope_norm` is the normalized company
    /// for people and empty for deals.
    pub fn find_alias(
        &self,
        kind: &str,
        alias_norm: &str,
        scope_norm: &str,
    ) -> Result<Option<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id FROM entity_aliases
             WHERE kind = ?1 AND alias_norm = ?2 AND scope_norm = ?3",
        )?;
        let mut rows = stmt.query_map(params![kind, alias_norm, scope_norm], |row| row.get(0))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn save_alias(
        &self,
        kind: &str,
        alias_norm: &str,
        scope_norm: &str,
        entity_id: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO entity_aliases (kind, alias_norm, scope_norm, entity_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(kind, alias_norm, scope_norm) DO UPDATE SET entity_id = excluded.entity_id",
            params![kind, alias_norm, scope_norm, entity_id, now()],
        )?;
        Ok(())
    }

    fn map_person_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbPerson> {
        Ok(DbPerson {
            id: row.get(0)?,
            name: row.get(1)?,
            role: row.get(2)?,
            company: row.get(3)?,
            email: row.get(4)?,
            phone: row.get(5)?,
            notes: row.get(6)?,
            relationship_type: row.get(7)?,
            mention_count: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}
