//! Persistence façade: pooled SQLite storage with explicit transaction modes.
//!
//! All access goes through [`Repository::with_transaction`]: the unit of work
//! receives a [`Tx`] handle carrying the transaction id, the mode, and the
//! live connection, and the façade guarantees exactly one terminal action:
//! commit on success, rollback on error, rollback-then-rethrow on panic.
//! Because the handle never exposes commit or rollback, a second terminal
//! action is unrepresentable.

use crate::error::KmsError;
use crate::lifecycle::KeyStatus;
use crate::types::{
    now_millis, ElasticKey, ElasticKeyId, MaterialKey, MaterialKeyId, Provider, RequestContext,
    TenantId,
};
use r2d2_sqlite::SqliteConnectionManager;
use rampart_jose::Algorithm;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Transaction modes
// ---------------------------------------------------------------------------

/// How a unit of work interacts with the database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxMode {
    /// Each statement commits on its own; no begin/commit/rollback.
    AutoCommit,
    /// Read-committed isolation; writes are rejected by the engine.
    ReadOnly,
    /// Read-committed isolation; commits on success, rolls back otherwise.
    ReadWrite,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Zero-based pagination. `number` selects the page, `size` the rows per
/// page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub size: i64,
}

impl Page {
    fn validate(&self) -> Result<(), KmsError> {
        if self.number < 0 {
            return Err(KmsError::InvalidInput("page number must be >= 0".into()));
        }
        if self.size < 1 {
            return Err(KmsError::InvalidInput("page size must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    fn sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElasticKeySortField {
    ElasticKeyId,
    Name,
    Algorithm,
    Status,
}

impl ElasticKeySortField {
    fn column(&self) -> &'static str {
        match self {
            ElasticKeySortField::ElasticKeyId => "elastic_key_id",
            ElasticKeySortField::Name => "name",
            ElasticKeySortField::Algorithm => "algorithm",
            ElasticKeySortField::Status => "status",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialKeySortField {
    MaterialKeyId,
    GenerateDate,
}

impl MaterialKeySortField {
    fn column(&self) -> &'static str {
        match self {
            MaterialKeySortField::MaterialKeyId => "material_key_id",
            MaterialKeySortField::GenerateDate => "generate_date",
        }
    }
}

/// Filter for ElasticKey listings. Empty lists mean "no filter".
#[derive(Clone, Debug, Default)]
pub struct ElasticKeyFilter {
    pub ids: Vec<ElasticKeyId>,
    pub names: Vec<String>,
    pub algorithms: Vec<Algorithm>,
    pub versioning_allowed: Option<bool>,
    pub import_allowed: Option<bool>,
    pub sort: Vec<(ElasticKeySortField, SortDir)>,
    pub page: Option<Page>,
}

impl ElasticKeyFilter {
    pub fn validate(&self) -> Result<(), KmsError> {
        if self.ids.iter().any(|id| id.as_uuid().is_nil()) {
            return Err(KmsError::InvalidInput("zero UUID in id filter".into()));
        }
        if self.names.iter().any(|name| name.is_empty()) {
            return Err(KmsError::InvalidInput("empty string in name filter".into()));
        }
        if let Some(page) = &self.page {
            page.validate()?;
        }
        Ok(())
    }
}

/// Filter for MaterialKey listings.
#[derive(Clone, Debug, Default)]
pub struct MaterialKeyFilter {
    pub ids: Vec<MaterialKeyId>,
    pub min_generate_date: Option<i64>,
    pub max_generate_date: Option<i64>,
    pub sort: Vec<(MaterialKeySortField, SortDir)>,
    pub page: Option<Page>,
}

impl MaterialKeyFilter {
    pub fn validate(&self) -> Result<(), KmsError> {
        if self.ids.iter().any(|id| id.as_uuid().is_nil()) {
            return Err(KmsError::InvalidInput("zero UUID in id filter".into()));
        }
        if let Some(min) = self.min_generate_date {
            if min > now_millis() {
                return Err(KmsError::InvalidInput(
                    "min generate date is in the future".into(),
                ));
            }
            if let Some(max) = self.max_generate_date {
                if min > max {
                    return Err(KmsError::InvalidInput(
                        "min generate date exceeds max".into(),
                    ));
                }
            }
        }
        if let Some(page) = &self.page {
            page.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Barrier key rows
// ---------------------------------------------------------------------------

/// The three envelope tiers, one table each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierTier {
    Root,
    Intermediate,
    Content,
}

impl BarrierTier {
    fn table(&self) -> &'static str {
        match self {
            BarrierTier::Root => "barrier_root_keys",
            BarrierTier::Intermediate => "barrier_intermediate_keys",
            BarrierTier::Content => "barrier_content_keys",
        }
    }
}

/// One stored barrier key: its own id, its sealed bytes, and the id of the
/// key that sealed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierKey {
    pub uuid: Uuid,
    pub encrypted: Vec<u8>,
    pub kek_uuid: Uuid,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS elastic_keys (
    elastic_key_id      TEXT PRIMARY KEY,
    tenant_id           TEXT NOT NULL,
    name                TEXT NOT NULL CHECK (length(name) > 0),
    description         TEXT NOT NULL DEFAULT '',
    provider            TEXT NOT NULL,
    algorithm           TEXT NOT NULL,
    versioning_allowed  INTEGER NOT NULL,
    import_allowed      INTEGER NOT NULL,
    status              TEXT NOT NULL,
    UNIQUE (tenant_id, name)
);

CREATE TABLE IF NOT EXISTS material_keys (
    material_key_id      TEXT NOT NULL,
    elastic_key_id       TEXT NOT NULL REFERENCES elastic_keys (elastic_key_id),
    clear_public         BLOB,
    encrypted_non_public BLOB NOT NULL,
    generate_date        INTEGER,
    import_date          INTEGER,
    expiration_date      INTEGER,
    revocation_date      INTEGER,
    PRIMARY KEY (elastic_key_id, material_key_id),
    CHECK ((generate_date IS NULL) <> (import_date IS NULL))
);

CREATE TABLE IF NOT EXISTS barrier_root_keys (
    uuid      TEXT PRIMARY KEY,
    encrypted BLOB NOT NULL,
    kek_uuid  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS barrier_intermediate_keys (
    uuid      TEXT PRIMARY KEY,
    encrypted BLOB NOT NULL,
    kek_uuid  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS barrier_content_keys (
    uuid      TEXT PRIMARY KEY,
    encrypted BLOB NOT NULL,
    kek_uuid  TEXT NOT NULL
);
";

/// Pooled SQLite storage. The pool floor of two connections per in-flight
/// request is a deployment constraint only when the barrier is given its own
/// connection; here it shares the caller's transaction handle.
pub struct Repository {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl Repository {
    /// Open (or create) the database at `path` and bootstrap the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KmsError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            // journal_mode echoes the new mode back, so read the row.
            let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            Ok(())
        });
        let pool = r2d2::Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| KmsError::Internal(format!("connection pool: {}", e)))?;
        let conn = pool
            .get()
            .map_err(|e| KmsError::Internal(format!("connection pool: {}", e)))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    /// Run `work` under the requested transaction mode.
    ///
    /// - exactly one terminal action per transaction
    /// - a panic in `work` rolls back, then resumes unwinding
    /// - cancellation is honoured on entry and again before commit
    pub fn with_transaction<T, F>(
        &self,
        ctx: &RequestContext,
        mode: TxMode,
        work: F,
    ) -> Result<T, KmsError>
    where
        F: FnOnce(&Tx<'_>) -> Result<T, KmsError>,
    {
        if ctx.is_cancelled() {
            return Err(KmsError::Cancelled);
        }
        let mut conn = self
            .pool
            .get()
            .map_err(|e| KmsError::Internal(format!("connection pool: {}", e)))?;

        match mode {
            TxMode::AutoCommit => {
                let tx = Tx::new(mode, &conn);
                work(&tx)
            }
            TxMode::ReadOnly | TxMode::ReadWrite => {
                if mode == TxMode::ReadOnly {
                    conn.pragma_update(None, "query_only", true)?;
                }
                let result = Self::run_in_transaction(&mut conn, ctx, mode, work);
                if mode == TxMode::ReadOnly {
                    let _ = conn.pragma_update(None, "query_only", false);
                }
                result
            }
        }
    }

    fn run_in_transaction<T, F>(
        conn: &mut Connection,
        ctx: &RequestContext,
        mode: TxMode,
        work: F,
    ) -> Result<T, KmsError>
    where
        F: FnOnce(&Tx<'_>) -> Result<T, KmsError>,
    {
        let behavior = match mode {
            TxMode::ReadWrite => TransactionBehavior::Immediate,
            _ => TransactionBehavior::Deferred,
        };
        let txn = conn.transaction_with_behavior(behavior)?;

        let outcome = {
            let tx = Tx::new(mode, &txn);
            catch_unwind(AssertUnwindSafe(|| work(&tx)))
        };

        match outcome {
            Err(panic) => {
                let _ = txn.rollback();
                resume_unwind(panic)
            }
            Ok(Ok(value)) => {
                if ctx.is_cancelled() {
                    let _ = txn.rollback();
                    return Err(KmsError::Cancelled);
                }
                txn.commit()?;
                Ok(value)
            }
            Ok(Err(err)) => {
                let _ = txn.rollback();
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction handle
// ---------------------------------------------------------------------------

/// A live transaction. Carries a time-ordered id for correlation; all entity
/// operations hang off this handle so that nested work (e.g. barrier reads
/// during a seal) shares one connection.
pub struct Tx<'a> {
    id: Uuid,
    mode: TxMode,
    conn: &'a Connection,
}

impl<'a> Tx<'a> {
    fn new(mode: TxMode, conn: &'a Connection) -> Self {
        Self {
            id: Uuid::now_v7(),
            mode,
            conn,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    // -- ElasticKey ---------------------------------------------------------

    pub fn add_elastic_key(&self, key: &ElasticKey) -> Result<(), KmsError> {
        self.conn.execute(
            "INSERT INTO elastic_keys (elastic_key_id, tenant_id, name, description, provider,
                                       algorithm, versioning_allowed, import_allowed, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                key.elastic_key_id.to_string(),
                key.tenant_id.to_string(),
                key.name,
                key.description,
                key.provider.name(),
                key.algorithm.to_string(),
                key.versioning_allowed,
                key.import_allowed,
                key.status.name(),
            ],
        )?;
        Ok(())
    }

    /// Tenant-scoped lookup. A key belonging to another tenant is
    /// indistinguishable from an absent one.
    pub fn get_elastic_key(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
    ) -> Result<ElasticKey, KmsError> {
        self.conn
            .query_row(
                "SELECT elastic_key_id, tenant_id, name, description, provider, algorithm,
                        versioning_allowed, import_allowed, status
                 FROM elastic_keys WHERE elastic_key_id = ?1 AND tenant_id = ?2",
                params![id.to_string(), tenant_id.to_string()],
                row_elastic_key,
            )
            .optional()?
            .ok_or(KmsError::NotFound("elastic key"))
    }

    pub fn get_elastic_keys(
        &self,
        tenant_id: TenantId,
        filter: &ElasticKeyFilter,
    ) -> Result<Vec<ElasticKey>, KmsError> {
        filter.validate()?;

        let mut sql = String::from(
            "SELECT elastic_key_id, tenant_id, name, description, provider, algorithm,
                    versioning_allowed, import_allowed, status
             FROM elastic_keys WHERE tenant_id = ?",
        );
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(tenant_id.to_string())];

        if !filter.ids.is_empty() {
            sql.push_str(&format!(
                " AND elastic_key_id IN ({})",
                placeholders(filter.ids.len())
            ));
            for id in &filter.ids {
                args.push(Box::new(id.to_string()));
            }
        }
        if !filter.names.is_empty() {
            sql.push_str(&format!(" AND name IN ({})", placeholders(filter.names.len())));
            for name in &filter.names {
                args.push(Box::new(name.clone()));
            }
        }
        if !filter.algorithms.is_empty() {
            sql.push_str(&format!(
                " AND algorithm IN ({})",
                placeholders(filter.algorithms.len())
            ));
            for algorithm in &filter.algorithms {
                args.push(Box::new(algorithm.to_string()));
            }
        }
        if let Some(versioning) = filter.versioning_allowed {
            sql.push_str(" AND versioning_allowed = ?");
            args.push(Box::new(versioning));
        }
        if let Some(import) = filter.import_allowed {
            sql.push_str(" AND import_allowed = ?");
            args.push(Box::new(import));
        }

        if filter.sort.is_empty() {
            sql.push_str(" ORDER BY elastic_key_id ASC");
        } else {
            let clauses: Vec<String> = filter
                .sort
                .iter()
                .map(|(field, dir)| format!("{} {}", field.column(), dir.sql()))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", clauses.join(", ")));
        }
        push_page(&mut sql, &mut args, filter.page);

        let refs: Vec<&dyn ToSql> = args.iter().map(|arg| arg.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(refs.as_slice(), row_elastic_key)?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Only `name` and `description` are mutable; the remaining attributes
    /// are fixed at insert.
    pub fn update_elastic_key(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        name: &str,
        description: &str,
    ) -> Result<ElasticKey, KmsError> {
        let changed = self.conn.execute(
            "UPDATE elastic_keys SET name = ?1, description = ?2
             WHERE elastic_key_id = ?3 AND tenant_id = ?4",
            params![name, description, id.to_string(), tenant_id.to_string()],
        )?;
        if changed == 0 {
            return Err(KmsError::NotFound("elastic key"));
        }
        self.get_elastic_key(tenant_id, id)
    }

    pub fn update_elastic_key_status(
        &self,
        tenant_id: TenantId,
        id: ElasticKeyId,
        status: KeyStatus,
    ) -> Result<(), KmsError> {
        let changed = self.conn.execute(
            "UPDATE elastic_keys SET status = ?1
             WHERE elastic_key_id = ?2 AND tenant_id = ?3",
            params![status.name(), id.to_string(), tenant_id.to_string()],
        )?;
        if changed == 0 {
            return Err(KmsError::NotFound("elastic key"));
        }
        Ok(())
    }

    // -- MaterialKey --------------------------------------------------------

    pub fn add_material_key(&self, material: &MaterialKey) -> Result<(), KmsError> {
        self.conn.execute(
            "INSERT INTO material_keys (material_key_id, elastic_key_id, clear_public,
                                        encrypted_non_public, generate_date, import_date,
                                        expiration_date, revocation_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                material.material_key_id.to_string(),
                material.elastic_key_id.to_string(),
                material.clear_public,
                material.encrypted_non_public,
                material.generate_date,
                material.import_date,
                material.expiration_date,
                material.revocation_date,
            ],
        )?;
        Ok(())
    }

    /// Latest = greatest id; ids are time-ordered.
    pub fn latest_material_key(&self, id: ElasticKeyId) -> Result<MaterialKey, KmsError> {
        self.conn
            .query_row(
                "SELECT material_key_id, elastic_key_id, clear_public, encrypted_non_public,
                        generate_date, import_date, expiration_date, revocation_date
                 FROM material_keys WHERE elastic_key_id = ?1
                 ORDER BY material_key_id DESC LIMIT 1",
                params![id.to_string()],
                row_material_key,
            )
            .optional()?
            .ok_or(KmsError::NotFound("material key"))
    }

    pub fn material_key_version(
        &self,
        elastic_key_id: ElasticKeyId,
        material_key_id: MaterialKeyId,
    ) -> Result<MaterialKey, KmsError> {
        self.conn
            .query_row(
                "SELECT material_key_id, elastic_key_id, clear_public, encrypted_non_public,
                        generate_date, import_date, expiration_date, revocation_date
                 FROM material_keys WHERE elastic_key_id = ?1 AND material_key_id = ?2",
                params![elastic_key_id.to_string(), material_key_id.to_string()],
                row_material_key,
            )
            .optional()?
            .ok_or(KmsError::NotFound("material key"))
    }

    pub fn material_keys_for_elastic_key(
        &self,
        elastic_key_id: ElasticKeyId,
        filter: &MaterialKeyFilter,
    ) -> Result<Vec<MaterialKey>, KmsError> {
        self.query_material_keys(Some(elastic_key_id), filter)
    }

    /// Unscoped listing across all elastic keys.
    pub fn material_keys(&self, filter: &MaterialKeyFilter) -> Result<Vec<MaterialKey>, KmsError> {
        self.query_material_keys(None, filter)
    }

    fn query_material_keys(
        &self,
        elastic_key_id: Option<ElasticKeyId>,
        filter: &MaterialKeyFilter,
    ) -> Result<Vec<MaterialKey>, KmsError> {
        filter.validate()?;

        let mut sql = String::from(
            "SELECT material_key_id, elastic_key_id, clear_public, encrypted_non_public,
                    generate_date, import_date, expiration_date, revocation_date
             FROM material_keys WHERE 1 = 1",
        );
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(id) = elastic_key_id {
            sql.push_str(" AND elastic_key_id = ?");
            args.push(Box::new(id.to_string()));
        }
        if !filter.ids.is_empty() {
            sql.push_str(&format!(
                " AND material_key_id IN ({})",
                placeholders(filter.ids.len())
            ));
            for id in &filter.ids {
                args.push(Box::new(id.to_string()));
            }
        }
        if let Some(min) = filter.min_generate_date {
            sql.push_str(" AND generate_date >= ?");
            args.push(Box::new(min));
        }
        if let Some(max) = filter.max_generate_date {
            sql.push_str(" AND generate_date <= ?");
            args.push(Box::new(max));
        }

        if filter.sort.is_empty() {
            sql.push_str(" ORDER BY material_key_id ASC");
        } else {
            let clauses: Vec<String> = filter
                .sort
                .iter()
                .map(|(field, dir)| format!("{} {}", field.column(), dir.sql()))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", clauses.join(", ")));
        }
        push_page(&mut sql, &mut args, filter.page);

        let refs: Vec<&dyn ToSql> = args.iter().map(|arg| arg.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(refs.as_slice(), row_material_key)?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Set `revocation_date`, exactly once.
    pub fn revoke_material_key(
        &self,
        elastic_key_id: ElasticKeyId,
        material_key_id: MaterialKeyId,
        revoked_at: i64,
    ) -> Result<MaterialKey, KmsError> {
        let existing = self.material_key_version(elastic_key_id, material_key_id)?;
        if existing.is_revoked() {
            return Err(KmsError::AlreadyRevoked(material_key_id));
        }
        let changed = self.conn.execute(
            "UPDATE material_keys SET revocation_date = ?1
             WHERE elastic_key_id = ?2 AND material_key_id = ?3 AND revocation_date IS NULL",
            params![
                revoked_at,
                elastic_key_id.to_string(),
                material_key_id.to_string()
            ],
        )?;
        if changed == 0 {
            // Lost a race with another revoker.
            return Err(KmsError::AlreadyRevoked(material_key_id));
        }
        self.material_key_version(elastic_key_id, material_key_id)
    }

    // -- Barrier tiers ------------------------------------------------------

    pub fn add_barrier_key(&self, tier: BarrierTier, key: &BarrierKey) -> Result<(), KmsError> {
        let sql = format!(
            "INSERT INTO {} (uuid, encrypted, kek_uuid) VALUES (?1, ?2, ?3)",
            tier.table()
        );
        self.conn.execute(
            &sql,
            params![key.uuid.to_string(), key.encrypted, key.kek_uuid.to_string()],
        )?;
        Ok(())
    }

    pub fn get_barrier_key(
        &self,
        tier: BarrierTier,
        uuid: Uuid,
    ) -> Result<Option<BarrierKey>, KmsError> {
        let sql = format!(
            "SELECT uuid, encrypted, kek_uuid FROM {} WHERE uuid = ?1",
            tier.table()
        );
        Ok(self
            .conn
            .query_row(&sql, params![uuid.to_string()], row_barrier_key)
            .optional()?)
    }

    pub fn latest_barrier_key(&self, tier: BarrierTier) -> Result<Option<BarrierKey>, KmsError> {
        let sql = format!(
            "SELECT uuid, encrypted, kek_uuid FROM {} ORDER BY uuid DESC LIMIT 1",
            tier.table()
        );
        Ok(self.conn.query_row(&sql, [], row_barrier_key).optional()?)
    }

    pub fn barrier_keys(&self, tier: BarrierTier) -> Result<Vec<BarrierKey>, KmsError> {
        let sql = format!(
            "SELECT uuid, encrypted, kek_uuid FROM {} ORDER BY uuid ASC",
            tier.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_barrier_key)?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Deleting an absent key is a no-op.
    pub fn delete_barrier_key(&self, tier: BarrierTier, uuid: Uuid) -> Result<(), KmsError> {
        let sql = format!("DELETE FROM {} WHERE uuid = ?1", tier.table());
        self.conn.execute(&sql, params![uuid.to_string()])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn column_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, e))
}

fn row_elastic_key(row: &Row<'_>) -> rusqlite::Result<ElasticKey> {
    let elastic_key_id = ElasticKeyId::from_uuid(column_uuid(row, 0)?)
        .map_err(|e| conversion_error(0, e))?;
    let tenant_id =
        TenantId::from_uuid(column_uuid(row, 1)?).map_err(|e| conversion_error(1, e))?;
    let provider_text: String = row.get(4)?;
    let provider = Provider::from_name(&provider_text).ok_or_else(|| {
        conversion_error(4, KmsError::Internal(format!("unknown provider {}", provider_text)))
    })?;
    let algorithm_text: String = row.get(5)?;
    let algorithm: Algorithm = algorithm_text
        .parse()
        .map_err(|e| conversion_error(5, e))?;
    let status_text: String = row.get(8)?;
    let status = KeyStatus::from_name(&status_text).ok_or_else(|| {
        conversion_error(8, KmsError::Internal(format!("unknown status {}", status_text)))
    })?;
    Ok(ElasticKey {
        elastic_key_id,
        tenant_id,
        name: row.get(2)?,
        description: row.get(3)?,
        provider,
        algorithm,
        versioning_allowed: row.get(6)?,
        import_allowed: row.get(7)?,
        status,
    })
}

fn row_material_key(row: &Row<'_>) -> rusqlite::Result<MaterialKey> {
    let material_key_id = MaterialKeyId::from_uuid(column_uuid(row, 0)?)
        .map_err(|e| conversion_error(0, e))?;
    let elastic_key_id = ElasticKeyId::from_uuid(column_uuid(row, 1)?)
        .map_err(|e| conversion_error(1, e))?;
    Ok(MaterialKey {
        material_key_id,
        elastic_key_id,
        clear_public: row.get(2)?,
        encrypted_non_public: row.get(3)?,
        generate_date: row.get(4)?,
        import_date: row.get(5)?,
        expiration_date: row.get(6)?,
        revocation_date: row.get(7)?,
    })
}

fn row_barrier_key(row: &Row<'_>) -> rusqlite::Result<BarrierKey> {
    Ok(BarrierKey {
        uuid: column_uuid(row, 0)?,
        encrypted: row.get(1)?,
        kek_uuid: column_uuid(row, 2)?,
    })
}

// ---------------------------------------------------------------------------
// SQL helpers
// ---------------------------------------------------------------------------

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn push_page(sql: &mut String, args: &mut Vec<Box<dyn ToSql>>, page: Option<Page>) {
    if let Some(page) = page {
        sql.push_str(" LIMIT ? OFFSET ?");
        args.push(Box::new(page.size));
        args.push(Box::new(page.number * page.size));
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Translate engine error codes into the stable taxonomy.
impl From<rusqlite::Error> for KmsError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;
        match err {
            rusqlite::Error::QueryReturnedNoRows => KmsError::NotFound("record"),
            rusqlite::Error::SqliteFailure(cause, message) => {
                let text = message.unwrap_or_else(|| cause.to_string());
                match cause.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        KmsError::Conflict(text)
                    }
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => KmsError::InvalidReference(text),
                    ffi::SQLITE_CONSTRAINT_CHECK
                    | ffi::SQLITE_CONSTRAINT_NOTNULL
                    | ffi::SQLITE_TOOBIG => KmsError::InvalidInput(text),
                    _ => KmsError::Internal(text),
                }
            }
            other => KmsError::Internal(other.to_string()),
        }
    }
}
