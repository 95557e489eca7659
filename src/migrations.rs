//! Embedded schema migrations, tracked in `schema_version`. Each one runs
//! in its own transaction. An existing file-backed store is snapshotted
//! before the first pending migration.

use rusqlite::Connection;

/// (version, sql) pairs in ascending order.
const MIGRATIONS: &[(i32, &str)] = &[(1, include_str!("migrations/001_baseline.sql"))];

fn latest_known() -> i32 {
    MIGRATIONS.last().map(|(version, _)| *version).unwrap_or(0)
}

fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("schema_version: {}", e))
}

fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row("SELECT IFNULL(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .map_err(|e| format!("schema_version: {}", e))
}

/// Main database file, or `None` for in-memory and temp databases.
fn main_db_file(conn: &Connection) -> Result<Option<String>, String> {
    let file: String = conn
        .query_row("SELECT file FROM pragma_database_list WHERE name = 'main'", [], |row| row.get(0))
        .map_err(|e| format!("database_list: {}", e))?;
    Ok(Some(file).filter(|f| !f.is_empty() && f != ":memory:"))
}

/// Snapshot the store next to itself before its schema changes.
fn snapshot(conn: &Connection, version: i32) -> Result<(), String> {
    let Some(file) = main_db_file(conn)? else {
        return Ok(());
    };
    let target = format!("{}.v{}.bak", file, version);
    let mut dest = Connection::open(&target).map_err(|e| format!("{}: {}", target, e))?;
    rusqlite::backup::Backup::new(conn, &mut dest)
        .and_then(|backup| backup.step(-1).map(|_| ()))
        .map_err(|e| format!("backup to {} failed: {}", target, e))?;
    log::info!("Migrations: saved v{} snapshot to {}", version, target);
    Ok(())
}

/// Bring the schema up to date. Returns the number of migrations applied.
///
/// A store written by a newer build is left untouched.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;
    let current = current_version(conn)?;
    if current > latest_known() {
        return Err(format!(
            "store schema v{} is newer than this build of Prism understands (v{})",
            current,
            latest_known()
        ));
    }

    let mut applied = 0;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        if applied == 0 && current > 0 {
            snapshot(conn, current)?;
        }
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| format!("v{}: {}", version, e))?;
        tx.execute_batch(sql)
            .and_then(|_| tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version]))
            .map_err(|e| format!("v{} failed: {}", version, e))?;
        tx.commit().map_err(|e| format!("v{}: {}", version, e))?;
        log::info!("Migrations: applied v{}", version);
        applied += 1;
    }
    Ok(applied)
}
