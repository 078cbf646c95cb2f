//! Provenance Storage Layer
//!
//! Implements the [`ProvenanceDao`] trait on SQLite.
//!
//! # Architecture
//!
//! - Three record tables (`builds`, `generations`, `dependencies`), see `schema.sql`
//! - Every write runs in its own transaction, so readers never see half a record
//! - Generations and dependencies cascade with their build on delete and rename
//! - One connection behind a mutex; the guard is held only for the duration of a call
//!
//! # Examples
//!
//! ```no_run
//! use provenance_domain::ProvenanceDao;
//! use provenance_store::SqliteDao;
//!
//! let dao = SqliteDao::open("provenance.db").unwrap();
//! let stats = dao.stats().unwrap();
//! println!("{} builds recorded", stats.builds);
//! dao.close().unwrap();
//! ```

#![warn(missing_docs)]

use parking_lot::Mutex;
use provenance_domain::{
    ArtifactFingerprint, BuildId, BuildRecord, BuildStatus, CommitReceipt, DaoFailure, DaoStats,
    DependencyRecord, Fingerprint, GenerationRecord, ProvenanceDao, ProvenanceSnapshot, Scope,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long SQLite waits on a locked database before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Operation attempted after [`ProvenanceDao::close`]
    #[error("DAO is closed")]
    DaoClosed,

    /// Database error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Persisted data could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Caller supplied records that cannot be stored
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The build is already stored with a terminal status
    #[error("Build {0} is already committed")]
    AlreadyCommitted(BuildId),
}

impl DaoFailure for StoreError {
    fn is_closed(&self) -> bool {
        matches!(self, StoreError::DaoClosed)
    }

    fn is_transient(&self) -> bool {
        match self {
            StoreError::Storage(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::CannotOpen
                    | ErrorCode::OutOfMemory
            ),
            _ => false,
        }
    }

    fn is_conflict(&self) -> bool {
        matches!(self, StoreError::AlreadyCommitted(_))
    }
}

/// SQLite-based implementation of [`ProvenanceDao`]
///
/// # Thread Safety
///
/// The connection sits behind a mutex, so one `SqliteDao` can be shared (via
/// `Arc`) by every ingesting build. [`ProvenanceDao::close`] takes the same
/// mutex, which makes it wait for the operation in flight before releasing
/// the connection.
pub struct SqliteDao {
    conn: Mutex<Option<Connection>>,
    location: String,
}

impl SqliteDao {
    /// Open (or create) a database at the given path and apply the schema
    ///
    /// Use `:memory:` for an in-memory database (useful for testing).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let location = path.as_ref().display().to_string();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(include_str!("schema.sql"))?;

        info!(location = %location, journal = %journal, "Provenance database opened");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            location,
        })
    }

    /// Open a fresh in-memory database
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Where the database lives (`:memory:` for in-memory databases)
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run `f` with the connection; the guard is released on every exit path
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StoreError::DaoClosed)?;
        f(conn)
    }

    /// Run `f` inside a transaction; dropping an uncommitted transaction rolls it back
    fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    fn invalid(column: usize, kind: Type, message: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            kind,
            Box::new(StoreError::InvalidData(message)),
        )
    }

    fn build_id_from_row(row: &Row<'_>, job_col: usize) -> rusqlite::Result<BuildId> {
        let job: String = row.get(job_col)?;
        let number: i64 = row.get(job_col + 1)?;
        let number = u32::try_from(number).map_err(|_| {
            Self::invalid(job_col + 1, Type::Integer, format!("Build number out of range: {}", number))
        })?;
        BuildId::new(job, number).map_err(|e| Self::invalid(job_col, Type::Text, e))
    }

    fn fingerprint_from_row(row: &Row<'_>, col: usize) -> rusqlite::Result<Fingerprint> {
        let checksum: String = row.get(col)?;
        Fingerprint::new(&checksum).map_err(|e| Self::invalid(col, Type::Text, e))
    }

    /// Columns: job, number, started_at, duration_ms, status
    fn build_from_row(row: &Row<'_>) -> rusqlite::Result<BuildRecord> {
        let id = Self::build_id_from_row(row, 0)?;
        let duration: Option<i64> = row.get(3)?;
        let status: String = row.get(4)?;
        let status = BuildStatus::parse(&status)
            .ok_or_else(|| Self::invalid(4, Type::Text, format!("Unknown build status: {}", status)))?;

        Ok(BuildRecord {
            id,
            started_at: row.get::<_, i64>(2)? as u64,
            duration_ms: duration.map(|d| d as u64),
            status,
        })
    }

    /// Columns: checksum, file_name, file_path, job, number, started_at, canonical
    fn generation_from_row(row: &Row<'_>) -> rusqlite::Result<GenerationRecord> {
        let fingerprint = Self::fingerprint_from_row(row, 0)?;
        let file_name: String = row.get(1)?;

        Ok(GenerationRecord {
            artifact: ArtifactFingerprint::new(fingerprint, file_name),
            file_path: row.get(2)?,
            build: Self::build_id_from_row(row, 3)?,
            build_started_at: row.get::<_, i64>(5)? as u64,
            canonical: row.get(6)?,
        })
    }

    /// Columns: job, number, checksum, scope
    fn dependency_from_row(row: &Row<'_>) -> rusqlite::Result<DependencyRecord> {
        let scope: String = row.get(3)?;
        let scope = Scope::parse(&scope)
            .ok_or_else(|| Self::invalid(3, Type::Text, format!("Unknown scope: {}", scope)))?;

        Ok(DependencyRecord {
            build: Self::build_id_from_row(row, 0)?,
            fingerprint: Self::fingerprint_from_row(row, 2)?,
            scope,
        })
    }

    /// Insert a build, or finalize a stored one that is still `running`
    fn write_build(conn: &Connection, record: &BuildRecord) -> Result<(), StoreError> {
        let written = conn.execute(
            "INSERT INTO builds (job, number, started_at, duration_ms, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job, number) DO UPDATE SET
             started_at = excluded.started_at,
             duration_ms = excluded.duration_ms,
             status = excluded.status
             WHERE builds.status = 'running'",
            params![
                record.id.job(),
                record.id.number(),
                record.started_at as i64,
                record.duration_ms.map(|d| d as i64),
                record.status.as_str(),
            ],
        )?;
        if written == 0 {
            return Err(StoreError::AlreadyCommitted(record.id.clone()));
        }
        Ok(())
    }

    /// Builds of `job` and of the jobs nested under it
    fn job_builds(conn: &Connection, job: &str) -> Result<Vec<BuildId>, StoreError> {
        let ids = conn
            .prepare(&format!(
                "SELECT job, number FROM builds WHERE {} ORDER BY seq",
                Self::JOB_SUBTREE
            ))?
            .query_map(params![job], |row| Self::build_id_from_row(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Insert a generation; the first row stored for a checksum becomes canonical
    fn write_generation(
        conn: &Connection,
        record: &GenerationRecord,
    ) -> Result<GenerationRecord, StoreError> {
        let checksum = record.fingerprint().as_str();
        let seen_before: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM generations WHERE checksum = ?1)",
            params![checksum],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO generations (checksum, file_name, file_path, job, number, canonical)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                checksum,
                &record.artifact.file_name,
                &record.file_path,
                record.build.job(),
                record.build.number(),
                !seen_before,
            ],
        )?;

        // Re-reading also covers the duplicate case, where the stored flag wins
        let stored = conn.query_row(
            "SELECT g.checksum, g.file_name, g.file_path, g.job, g.number, b.started_at, g.canonical
             FROM generations g JOIN builds b ON b.job = g.job AND b.number = g.number
             WHERE g.checksum = ?1 AND g.job = ?2 AND g.number = ?3 AND g.file_path = ?4",
            params![checksum, record.build.job(), record.build.number(), &record.file_path],
            Self::generation_from_row,
        )?;
        Ok(stored)
    }

    fn write_dependency(conn: &Connection, record: &DependencyRecord) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR IGNORE INTO dependencies (job, number, checksum, scope)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.build.job(),
                record.build.number(),
                record.fingerprint.as_str(),
                record.scope.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Promote the oldest remaining generation of every checksum that lost its canonical producer
    fn repair_canonical(conn: &Connection) -> Result<usize, StoreError> {
        let promoted = conn.execute(
            "UPDATE generations SET canonical = 1 WHERE seq IN (
                 SELECT MIN(seq) FROM generations GROUP BY checksum HAVING MAX(canonical) = 0
             )",
            [],
        )?;
        if promoted > 0 {
            debug!(promoted, "Promoted re-productions to canonical producers");
        }
        Ok(promoted)
    }

    fn count(conn: &Connection, sql: &str) -> Result<usize, StoreError> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// `job` itself or anything nested below it (`job/...`)
    const JOB_SUBTREE: &'static str = "(job = ?1 OR substr(job, 1, length(?1) + 1) = ?1 || '/')";
}

impl ProvenanceDao for SqliteDao {
    type Error = StoreError;

    fn insert_build_record(&self, record: &BuildRecord) -> Result<(), Self::Error> {
        self.with_transaction(|tx| Self::write_build(tx, record))
    }

    fn insert_generation_record(
        &self,
        record: &GenerationRecord,
    ) -> Result<GenerationRecord, Self::Error> {
        self.with_transaction(|tx| Self::write_generation(tx, record))
    }

    fn insert_dependency_record(&self, record: &DependencyRecord) -> Result<(), Self::Error> {
        self.with_transaction(|tx| Self::write_dependency(tx, record))
    }

    fn commit_build(
        &self,
        build: &BuildRecord,
        generations: &[GenerationRecord],
        dependencies: &[DependencyRecord],
    ) -> Result<CommitReceipt, Self::Error> {
        if let Some(foreign) = generations.iter().find(|g| g.build != build.id) {
            return Err(StoreError::InvalidInput(format!(
                "Generation of {} belongs to {}, not {}",
                foreign.file_path, foreign.build, build.id
            )));
        }
        if let Some(foreign) = dependencies.iter().find(|d| d.build != build.id) {
            return Err(StoreError::InvalidInput(format!(
                "Dependency on {} belongs to {}, not {}",
                foreign.fingerprint, foreign.build, build.id
            )));
        }

        let receipt = self.with_transaction(|tx| {
            Self::write_build(tx, build)?;

            let stored = generations
                .iter()
                .map(|g| Self::write_generation(tx, g))
                .collect::<Result<Vec<_>, _>>()?;

            let unique: BTreeSet<&DependencyRecord> = dependencies.iter().collect();
            for dependency in &unique {
                Self::write_dependency(tx, dependency)?;
            }

            Ok(CommitReceipt {
                build: build.clone(),
                generations: stored,
                dependencies: unique.into_iter().cloned().collect(),
            })
        })?;

        debug!(
            build = %build.id,
            generations = receipt.generations.len(),
            dependencies = receipt.dependencies.len(),
            "Build committed"
        );
        Ok(receipt)
    }

    fn find_build(&self, id: &BuildId) -> Result<Option<BuildRecord>, Self::Error> {
        self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT job, number, started_at, duration_ms, status
                     FROM builds WHERE job = ?1 AND number = ?2",
                    params![id.job(), id.number()],
                    Self::build_from_row,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn load_build(&self, id: &BuildId) -> Result<Option<CommitReceipt>, Self::Error> {
        self.with_transaction(|tx| {
            let build = tx
                .query_row(
                    "SELECT job, number, started_at, duration_ms, status
                     FROM builds WHERE job = ?1 AND number = ?2",
                    params![id.job(), id.number()],
                    Self::build_from_row,
                )
                .optional()?;
            let Some(build) = build else {
                return Ok(None);
            };

            let generations = tx
                .prepare(
                    "SELECT g.checksum, g.file_name, g.file_path, g.job, g.number, b.started_at, g.canonical
                     FROM generations g JOIN builds b ON b.job = g.job AND b.number = g.number
                     WHERE g.job = ?1 AND g.number = ?2 ORDER BY g.seq",
                )?
                .query_map(params![id.job(), id.number()], Self::generation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let dependencies = tx
                .prepare(
                    "SELECT job, number, checksum, scope FROM dependencies
                     WHERE job = ?1 AND number = ?2 ORDER BY seq",
                )?
                .query_map(params![id.job(), id.number()], Self::dependency_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(CommitReceipt {
                build,
                generations,
                dependencies,
            }))
        })
    }

    fn find_generation_record(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<GenerationRecord>, Self::Error> {
        self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT g.checksum, g.file_name, g.file_path, g.job, g.number, b.started_at, g.canonical
                     FROM generations g JOIN builds b ON b.job = g.job AND b.number = g.number
                     WHERE g.checksum = ?1 AND g.canonical = 1",
                    params![fingerprint.as_str()],
                    Self::generation_from_row,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn find_generation_records(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<GenerationRecord>, Self::Error> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.checksum, g.file_name, g.file_path, g.job, g.number, b.started_at, g.canonical
                 FROM generations g JOIN builds b ON b.job = g.job AND b.number = g.number
                 WHERE g.checksum = ?1
                 ORDER BY b.started_at, g.seq",
            )?;
            let records = stmt
                .query_map(params![fingerprint.as_str()], Self::generation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    fn find_dependency_records(
        &self,
        build: &BuildId,
    ) -> Result<Vec<DependencyRecord>, Self::Error> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT job, number, checksum, scope FROM dependencies
                 WHERE job = ?1 AND number = ?2 ORDER BY seq",
            )?;
            let records = stmt
                .query_map(params![build.job(), build.number()], Self::dependency_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    fn find_dependents(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<DependencyRecord>, Self::Error> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT job, number, checksum, scope FROM dependencies
                 WHERE checksum = ?1 ORDER BY seq",
            )?;
            let records = stmt
                .query_map(params![fingerprint.as_str()], Self::dependency_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    fn load_all(&self) -> Result<ProvenanceSnapshot, Self::Error> {
        // One transaction so the three tables are read from the same snapshot
        self.with_transaction(|tx| {
            let builds = tx
                .prepare(
                    "SELECT job, number, started_at, duration_ms, status FROM builds ORDER BY seq",
                )?
                .query_map([], Self::build_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let generations = tx
                .prepare(
                    "SELECT g.checksum, g.file_name, g.file_path, g.job, g.number, b.started_at, g.canonical
                     FROM generations g JOIN builds b ON b.job = g.job AND b.number = g.number
                     ORDER BY g.seq",
                )?
                .query_map([], Self::generation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let dependencies = tx
                .prepare("SELECT job, number, checksum, scope FROM dependencies ORDER BY seq")?
                .query_map([], Self::dependency_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(ProvenanceSnapshot {
                builds,
                generations,
                dependencies,
            })
        })
    }

    fn delete_build(&self, id: &BuildId) -> Result<bool, Self::Error> {
        let deleted = self.with_transaction(|tx| {
            let deleted = tx.execute(
                "DELETE FROM builds WHERE job = ?1 AND number = ?2",
                params![id.job(), id.number()],
            )?;
            Self::repair_canonical(tx)?;
            Ok(deleted > 0)
        })?;
        if deleted {
            info!(build = %id, "Build deleted");
        }
        Ok(deleted)
    }

    fn delete_job(&self, job: &str) -> Result<Vec<BuildId>, Self::Error> {
        let deleted = self.with_transaction(|tx| {
            let ids = Self::job_builds(tx, job)?;
            tx.execute(
                &format!("DELETE FROM builds WHERE {}", Self::JOB_SUBTREE),
                params![job],
            )?;
            Self::repair_canonical(tx)?;
            Ok(ids)
        })?;
        info!(job, deleted = deleted.len(), "Job deleted");
        Ok(deleted)
    }

    fn rename_job(&self, from: &str, to: &str) -> Result<Vec<(BuildId, BuildId)>, Self::Error> {
        provenance_domain::build::validate_job_path(to).map_err(StoreError::InvalidInput)?;
        if to == from || to.starts_with(&format!("{}/", from)) {
            return Err(StoreError::InvalidInput(format!(
                "Cannot rename job '{}' into itself ('{}')",
                from, to
            )));
        }

        let moved = self.with_transaction(|tx| {
            let moved = Self::job_builds(tx, from)?
                .into_iter()
                .map(|old| -> Result<(BuildId, BuildId), StoreError> {
                    let job = format!("{}{}", to, &old.job()[from.len()..]);
                    let new = old.with_job(job).map_err(StoreError::InvalidInput)?;
                    Ok((old, new))
                })
                .collect::<Result<Vec<_>, _>>()?;
            tx.execute(
                &format!(
                    "UPDATE builds SET job = ?2 || substr(job, length(?1) + 1) WHERE {}",
                    Self::JOB_SUBTREE
                ),
                params![from, to],
            )?;
            Ok(moved)
        })?;
        info!(from, to, moved = moved.len(), "Job renamed");
        Ok(moved)
    }

    fn find_builds_before(&self, cutoff: u64) -> Result<Vec<BuildId>, Self::Error> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT job, number FROM builds
                 WHERE started_at < ?1 AND status != 'running' ORDER BY seq",
            )?;
            let ids = stmt
                .query_map(params![cutoff as i64], |row| Self::build_id_from_row(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    fn delete_builds_before(&self, cutoff: u64) -> Result<Vec<BuildId>, Self::Error> {
        let deleted = self.with_transaction(|tx| {
            let ids = tx
                .prepare(
                    "SELECT job, number FROM builds
                     WHERE started_at < ?1 AND status != 'running' ORDER BY seq",
                )?
                .query_map(params![cutoff as i64], |row| Self::build_id_from_row(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;

            tx.execute(
                "DELETE FROM builds WHERE started_at < ?1 AND status != 'running'",
                params![cutoff as i64],
            )?;
            Self::repair_canonical(tx)?;
            Ok(ids)
        })?;

        if !deleted.is_empty() {
            info!(count = deleted.len(), cutoff, "Expired builds deleted");
        }
        Ok(deleted)
    }

    fn stats(&self) -> Result<DaoStats, Self::Error> {
        self.with_conn(|conn| {
            Ok(DaoStats {
                builds: Self::count(conn, "SELECT COUNT(*) FROM builds")?,
                generations: Self::count(conn, "SELECT COUNT(*) FROM generations")?,
                dependencies: Self::count(conn, "SELECT COUNT(*) FROM dependencies")?,
                fingerprints: Self::count(conn, "SELECT COUNT(DISTINCT checksum) FROM generations")?,
                external_dependencies: Self::count(
                    conn,
                    "SELECT COUNT(*) FROM dependencies d
                     WHERE NOT EXISTS (SELECT 1 FROM generations g WHERE g.checksum = d.checksum)",
                )?,
            })
        })
    }

    fn close(&self) -> Result<(), Self::Error> {
        // Taking the lock waits for whichever operation currently holds the connection
        let mut guard = self.conn.lock();
        match guard.take() {
            Some(conn) => {
                conn.close().map_err(|(_, e)| {
                    warn!(location = %self.location, error = %e, "Error while closing database");
                    StoreError::Storage(e)
                })?;
                info!(location = %self.location, "Provenance database closed");
            }
            None => debug!(location = %self.location, "Close called on closed DAO"),
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}
