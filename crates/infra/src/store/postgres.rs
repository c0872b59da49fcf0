//! Postgres-backed inventory store.
//!
//! Bin loads, stored batches and the movement ledger live in one database, so
//! a unit of work is a single transaction. The bin row is locked with
//! `SELECT ... FOR UPDATE` before its version, capacity and stock are
//! re-validated; concurrent commits on the same bin are serialized by the
//! row lock and a stale reader fails the version check.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Concurrent insert of the same batch/movement key |
//! | Database (check violation) | `23514` | `InsufficientCapacity` | `current_load` would leave `[0, capacity]` |
//! | Database (lock/statement timeout) | `55P03`, `57014` | `Timeout` | Row lock or statement exceeded its deadline |
//! | Database (serialization failure) | `40001`, `40P01` | `Concurrency` | Serialization failure or deadlock |
//! | PoolTimedOut | N/A | `Timeout` | No connection available in time |
//! | Other | N/A | `Backend` | Network errors, pool closed, decode failures |
//!
//! ## Runtime
//!
//! The [`InventoryStore`] trait is synchronous. The trait impl drives the
//! async methods on the ambient tokio runtime with `block_in_place`, which
//! requires a multi-threaded runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument, Span};

use slotwise_core::{BinId, ItemId, MovementId, UserId};
use slotwise_inventory::{
    Aisle, AisleIdx, AppliedChange, Bin, BinItem, BinStatus, Item, Movement, MovementStatus,
    NewMovement, Rack, RackIdx, StockChange, StorageTopology, Zone, ZoneIdx,
};

use super::r#trait::{
    transitioned, CommitReceipt, InventoryStore, LedgerEntry, LedgerWrite, StoreError, UnitOfWork,
};

/// DDL for the inventory tables. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS zones (
    code          TEXT PRIMARY KEY,
    temperature   TEXT NOT NULL,
    max_hazard    TEXT NOT NULL DEFAULT 'NONE',
    origin_x      DOUBLE PRECISION NOT NULL DEFAULT 0,
    origin_y      DOUBLE PRECISION NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS aisles (
    zone_code     TEXT NOT NULL REFERENCES zones (code),
    code          TEXT NOT NULL,
    position      INTEGER NOT NULL CHECK (position >= 0),
    width         DOUBLE PRECISION NOT NULL CHECK (width > 0),
    PRIMARY KEY (zone_code, code)
);

CREATE TABLE IF NOT EXISTS racks (
    zone_code     TEXT NOT NULL,
    aisle_code    TEXT NOT NULL,
    code          TEXT NOT NULL,
    level         INTEGER NOT NULL CHECK (level >= 0),
    row_index     INTEGER NOT NULL CHECK (row_index >= 0),
    column_index  INTEGER NOT NULL CHECK (column_index >= 0),
    PRIMARY KEY (zone_code, aisle_code, code),
    FOREIGN KEY (zone_code, aisle_code) REFERENCES aisles (zone_code, code)
);

CREATE TABLE IF NOT EXISTS bins (
    bin_id        UUID PRIMARY KEY,
    code          TEXT NOT NULL UNIQUE,
    zone_code     TEXT NOT NULL,
    aisle_code    TEXT NOT NULL,
    rack_code     TEXT NOT NULL,
    capacity      INTEGER NOT NULL CHECK (capacity > 0),
    current_load  INTEGER NOT NULL DEFAULT 0,
    weight_limit  DOUBLE PRECISION,
    status        TEXT NOT NULL DEFAULT 'ACTIVE',
    version       BIGINT NOT NULL DEFAULT 0,
    CHECK (current_load >= 0 AND current_load <= capacity),
    FOREIGN KEY (zone_code, aisle_code, rack_code) REFERENCES racks (zone_code, aisle_code, code)
);

CREATE TABLE IF NOT EXISTS items (
    item_id               UUID PRIMARY KEY,
    sku                   TEXT NOT NULL,
    category              TEXT NOT NULL,
    hazard_level          TEXT NOT NULL DEFAULT 'NONE',
    required_temperature  TEXT NOT NULL,
    unit_weight           DOUBLE PRECISION NOT NULL DEFAULT 0,
    unit_volume           DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS bin_items (
    bin_id        UUID NOT NULL REFERENCES bins (bin_id),
    item_id       UUID NOT NULL REFERENCES items (item_id),
    batch_number  TEXT NOT NULL DEFAULT '',
    expiry_date   DATE,
    quantity      INTEGER NOT NULL CHECK (quantity > 0),
    PRIMARY KEY (bin_id, item_id, batch_number)
);

CREATE TABLE IF NOT EXISTS movements (
    sequence        BIGSERIAL UNIQUE,
    movement_id     UUID PRIMARY KEY,
    movement_type   TEXT NOT NULL,
    item_id         UUID NOT NULL REFERENCES items (item_id),
    batch_number    TEXT,
    quantity        INTEGER NOT NULL CHECK (quantity > 0),
    priority        TEXT NOT NULL,
    from_bin        UUID REFERENCES bins (bin_id),
    to_bin          UUID REFERENCES bins (bin_id),
    user_id         UUID NOT NULL,
    status          TEXT NOT NULL,
    failure_reason  TEXT,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS movements_from_bin_idx ON movements (from_bin);
CREATE INDEX IF NOT EXISTS movements_to_bin_idx ON movements (to_bin);
"#;

const MOVEMENT_COLUMNS: &str = "sequence, movement_id, movement_type, item_id, batch_number, \
     quantity, priority, from_bin, to_bin, user_id, status, failure_reason, created_at, updated_at";

/// Postgres-backed inventory store.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the inventory tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Write a whole topology (reference data, bins and stored batches).
    ///
    /// Intended for seeding an empty database; existing rows with the same
    /// keys cause a unique violation.
    #[instrument(skip(self, topology), fields(bins = topology.bin_count()), err)]
    pub async fn import_topology(&self, topology: &StorageTopology) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for (_, zone) in topology.zones() {
            sqlx::query(
                "INSERT INTO zones (code, temperature, max_hazard, origin_x, origin_y) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&zone.code)
            .bind(zone.temperature.as_str())
            .bind(zone.max_hazard.as_str())
            .bind(zone.origin_x)
            .bind(zone.origin_y)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_zone", e))?;
        }

        for (_, aisle) in topology.aisles() {
            sqlx::query(
                "INSERT INTO aisles (zone_code, code, position, width) VALUES ($1, $2, $3, $4)",
            )
            .bind(&topology.zone(aisle.zone).code)
            .bind(&aisle.code)
            .bind(aisle.position as i32)
            .bind(aisle.width)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_aisle", e))?;
        }

        for (_, rack) in topology.racks() {
            let aisle = topology.aisle(rack.aisle);
            sqlx::query(
                "INSERT INTO racks (zone_code, aisle_code, code, level, row_index, column_index) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&topology.zone(aisle.zone).code)
            .bind(&aisle.code)
            .bind(&rack.code)
            .bind(rack.level as i32)
            .bind(rack.row as i32)
            .bind(rack.column as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_rack", e))?;
        }

        for (idx, bin) in topology.bins() {
            let rack = topology.rack(bin.rack);
            let aisle = topology.aisle(rack.aisle);
            sqlx::query(
                r#"
                INSERT INTO bins (
                    bin_id, code, zone_code, aisle_code, rack_code,
                    capacity, current_load, weight_limit, status, version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(bin.id.as_uuid())
            .bind(&bin.code)
            .bind(&topology.zone_of(idx).code)
            .bind(&aisle.code)
            .bind(&rack.code)
            .bind(bin.capacity as i32)
            .bind(bin.current_load() as i32)
            .bind(bin.weight_limit)
            .bind(bin.status.as_str())
            .bind(slotwise_core::Versioned::version(bin) as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_bin", e))?;
        }

        for item in topology.items() {
            sqlx::query(
                r#"
                INSERT INTO items (
                    item_id, sku, category, hazard_level, required_temperature,
                    unit_weight, unit_volume
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(&item.sku)
            .bind(&item.category)
            .bind(item.hazard_level.as_str())
            .bind(item.required_temperature.as_str())
            .bind(item.unit_weight)
            .bind(item.unit_volume)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_item", e))?;
        }

        for (idx, _) in topology.bins() {
            for batch in topology.batches(idx) {
                sqlx::query(
                    "INSERT INTO bin_items (bin_id, item_id, batch_number, expiry_date, quantity) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(batch.bin_id.as_uuid())
                .bind(batch.item_id.as_uuid())
                .bind(batch.batch_number.as_deref().unwrap_or(""))
                .bind(batch.expiry_date)
                .bind(batch.quantity as i32)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_bin_item", e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    /// Load the full topology with current loads and batches.
    #[instrument(skip(self), fields(bins = tracing::field::Empty), err)]
    pub async fn load_topology(&self) -> Result<StorageTopology, StoreError> {
        let pool = &*self.pool;
        let zones = fetch_rows::<ZoneRow>(pool, "load_zones", "SELECT * FROM zones ORDER BY code").await?;
        let aisles = fetch_rows::<AisleRow>(
            pool,
            "load_aisles",
            "SELECT * FROM aisles ORDER BY zone_code, position, code",
        )
        .await?;
        let racks = fetch_rows::<RackRow>(
            pool,
            "load_racks",
            "SELECT * FROM racks ORDER BY zone_code, aisle_code, code",
        )
        .await?;
        let bins = fetch_rows::<BinRow>(pool, "load_bins", "SELECT * FROM bins ORDER BY code").await?;
        let items = fetch_rows::<ItemRow>(pool, "load_items", "SELECT * FROM items ORDER BY sku").await?;
        let batches = fetch_rows::<BinItemRow>(
            pool,
            "load_bin_items",
            "SELECT * FROM bin_items ORDER BY bin_id, item_id, batch_number",
        )
        .await?;

        let mut builder = StorageTopology::builder();
        let mut zone_idx: HashMap<String, ZoneIdx> = HashMap::new();
        let mut aisle_idx: HashMap<(String, String), AisleIdx> = HashMap::new();
        let mut rack_idx: HashMap<(String, String, String), RackIdx> = HashMap::new();

        for row in zones {
            let code = row.code.clone();
            zone_idx.insert(code, builder.zone(row.into_zone()?));
        }
        for row in aisles {
            let zone = *zone_idx
                .get(&row.zone_code)
                .ok_or_else(|| corrupt(format!("aisle {} has unknown zone", row.code)))?;
            let idx = builder
                .aisle(Aisle {
                    zone,
                    code: row.code.clone(),
                    position: row.position as u32,
                    width: row.width,
                })
                .map_err(|e| corrupt(e.to_string()))?;
            aisle_idx.insert((row.zone_code, row.code), idx);
        }
        for row in racks {
            let aisle = *aisle_idx
                .get(&(row.zone_code.clone(), row.aisle_code.clone()))
                .ok_or_else(|| corrupt(format!("rack {} has unknown aisle", row.code)))?;
            let idx = builder
                .rack(Rack {
                    aisle,
                    code: row.code.clone(),
                    level: row.level as u32,
                    row: row.row_index as u32,
                    column: row.column_index as u32,
                })
                .map_err(|e| corrupt(e.to_string()))?;
            rack_idx.insert((row.zone_code, row.aisle_code, row.code), idx);
        }
        for row in bins {
            let key = (row.zone_code.clone(), row.aisle_code.clone(), row.rack_code.clone());
            let rack = *rack_idx
                .get(&key)
                .ok_or_else(|| corrupt(format!("bin {} has unknown rack", row.code)))?;
            builder
                .bin(row.into_bin(rack)?)
                .map_err(|e| corrupt(e.to_string()))?;
        }
        for row in items {
            builder
                .item(row.into_item()?)
                .map_err(|e| corrupt(e.to_string()))?;
        }
        for row in batches {
            builder
                .batch(row.into())
                .map_err(|e| corrupt(e.to_string()))?;
        }

        let topology = builder.build().map_err(|e| corrupt(e.to_string()))?;
        Span::current().record("bins", topology.bin_count());
        Ok(topology)
    }

    /// Apply one unit of work in a single transaction.
    #[instrument(
        skip(self, work),
        fields(
            bin_id = %work.bin_id,
            expected_version = ?work.expected_version,
            quantity = work.change.quantity()
        ),
        err
    )]
    pub async fn commit_work(&self, work: UnitOfWork) -> Result<CommitReceipt, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        match commit_in(&mut tx, work).await {
            Ok(receipt) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                debug!(sequence = receipt.sequence, version = receipt.applied.version, "unit of work committed");
                Ok(receipt)
            }
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                Err(err)
            }
        }
    }

    #[instrument(skip(self, movements), fields(count = movements.len()), err)]
    pub async fn insert_movements(
        &self,
        movements: Vec<Movement>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        if movements.is_empty() {
            return Ok(vec![]);
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut entries = Vec::with_capacity(movements.len());
        for movement in movements {
            match insert_movement(&mut tx, &movement).await {
                Ok(sequence) => entries.push(LedgerEntry { sequence, movement }),
                Err(err) => {
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                    return Err(err);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entries)
    }

    #[instrument(skip(self, reason), fields(movement_id = %movement_id, to = to.as_str()), err)]
    pub async fn update_movement_status(
        &self,
        movement_id: MovementId,
        to: MovementStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let result = async {
            let (sequence, current) = lock_movement(&mut tx, movement_id).await?;
            let next = transitioned(&current, to, reason, at)?;
            write_status(&mut tx, &next).await?;
            Ok::<_, StoreError>(LedgerEntry {
                sequence,
                movement: next,
            })
        }
        .await;

        match result {
            Ok(entry) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(entry)
            }
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                Err(err)
            }
        }
    }

    #[instrument(skip(self), err)]
    pub async fn load_movements(
        &self,
        bin_id: Option<BinId>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements \
             WHERE $1::uuid IS NULL OR from_bin = $1 OR to_bin = $1 \
             ORDER BY sequence ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(bin_id.map(|b| *b.as_uuid()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_movements", e))?;

        rows.iter()
            .map(|row| {
                MovementRow::from_row(row)
                    .map_err(|e| corrupt(format!("failed to deserialize movement row: {e}")))?
                    .into_entry()
            })
            .collect()
    }

    #[instrument(skip(self), fields(bin_id = %bin_id, status = status.as_str()), err)]
    pub async fn update_bin_status(
        &self,
        bin_id: BinId,
        status: BinStatus,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE bins
            SET status = $2,
                version = CASE WHEN status <> $2 THEN version + 1 ELSE version END
            WHERE bin_id = $1
            RETURNING version
            "#,
        )
        .bind(bin_id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_bin_status", e))?
        .ok_or_else(|| StoreError::NotFound(format!("bin not found: {bin_id}")))?;

        let version: i64 = row
            .try_get("version")
            .map_err(|e| corrupt(format!("failed to read version: {e}")))?;
        Ok(version as u64)
    }

    fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, StoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Backend(
                "PostgresInventoryStore requires a tokio runtime; call it from within one"
                    .to_string(),
            )
        })?;
        Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
    }
}

impl InventoryStore for PostgresInventoryStore {
    fn snapshot(&self) -> Result<StorageTopology, StoreError> {
        self.block_on(self.load_topology())?
    }

    fn commit(&self, work: UnitOfWork) -> Result<CommitReceipt, StoreError> {
        self.block_on(self.commit_work(work))?
    }

    fn append_movements(&self, movements: Vec<Movement>) -> Result<Vec<LedgerEntry>, StoreError> {
        self.block_on(self.insert_movements(movements))?
    }

    fn transition_movement(
        &self,
        movement_id: MovementId,
        to: MovementStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        self.block_on(self.update_movement_status(movement_id, to, reason, at))?
    }

    fn movements(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        self.block_on(self.load_movements(None))?
    }

    fn movements_for_bin(&self, bin_id: BinId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.block_on(self.load_movements(Some(bin_id)))?
    }

    fn set_bin_status(&self, bin_id: BinId, status: BinStatus) -> Result<u64, StoreError> {
        self.block_on(self.update_bin_status(bin_id, status))?
    }
}

/// Body of a unit of work. The caller owns commit/rollback.
async fn commit_in(
    tx: &mut Transaction<'_, Postgres>,
    work: UnitOfWork,
) -> Result<CommitReceipt, StoreError> {
    let UnitOfWork {
        bin_id,
        expected_version,
        change,
        ledger,
    } = work;

    // Resolve the ledger half first so an invalid transition never touches stock.
    let (movement, existing_sequence) = match ledger {
        LedgerWrite::Append(movement) => (movement, None),
        LedgerWrite::Transition {
            movement_id,
            to,
            reason,
            at,
        } => {
            let (sequence, current) = lock_movement(tx, movement_id).await?;
            (transitioned(&current, to, reason, at)?, Some(sequence))
        }
    };

    let bin = sqlx::query(
        "SELECT code, capacity, current_load, status, version FROM bins WHERE bin_id = $1 FOR UPDATE",
    )
    .bind(bin_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_bin", e))?
    .ok_or_else(|| StoreError::NotFound(format!("bin not found: {bin_id}")))?;
    let bin = LockedBin::from_row(&bin).map_err(|e| corrupt(format!("failed to read bin row: {e}")))?;

    let version = bin.version as u64;
    if !expected_version.matches(version) {
        return Err(StoreError::Concurrency(format!(
            "bin {} is at version {version}, expected {expected_version:?}",
            bin.code
        )));
    }
    if bin.status != BinStatus::Active.as_str() {
        return Err(StoreError::Concurrency(format!(
            "bin {} is {}",
            bin.code, bin.status
        )));
    }
    let quantity = change.quantity();
    if quantity == 0 {
        return Err(StoreError::Backend("stock change quantity must be positive".to_string()));
    }
    let item_id = change.item_id();
    let item_exists = sqlx::query("SELECT 1 FROM items WHERE item_id = $1")
        .bind(item_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("check_item", e))?
        .is_some();
    if !item_exists {
        return Err(StoreError::NotFound(format!("item not found: {item_id}")));
    }

    let batch_key = change.batch_number().unwrap_or("");
    let (delta, batch_quantity) = match &change {
        StockChange::Receive { expiry_date, .. } => {
            let available = (bin.capacity - bin.current_load).max(0) as u32;
            if quantity > available {
                return Err(StoreError::InsufficientCapacity(format!(
                    "bin {}: requested {quantity}, available {available}",
                    bin.code
                )));
            }
            let row = sqlx::query(
                r#"
                INSERT INTO bin_items (bin_id, item_id, batch_number, expiry_date, quantity)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (bin_id, item_id, batch_number)
                DO UPDATE SET
                    quantity = bin_items.quantity + EXCLUDED.quantity,
                    expiry_date = COALESCE(bin_items.expiry_date, EXCLUDED.expiry_date)
                RETURNING quantity
                "#,
            )
            .bind(bin_id.as_uuid())
            .bind(item_id.as_uuid())
            .bind(batch_key)
            .bind(*expiry_date)
            .bind(quantity as i32)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_bin_item", e))?;
            let stored: i32 = row
                .try_get("quantity")
                .map_err(|e| corrupt(format!("failed to read quantity: {e}")))?;
            (quantity as i32, stored as u32)
        }
        StockChange::Issue { .. } => {
            let available: i32 = sqlx::query(
                "SELECT quantity FROM bin_items \
                 WHERE bin_id = $1 AND item_id = $2 AND batch_number = $3 FOR UPDATE",
            )
            .bind(bin_id.as_uuid())
            .bind(item_id.as_uuid())
            .bind(batch_key)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_bin_item", e))?
            .map(|row| row.try_get("quantity"))
            .transpose()
            .map_err(|e| corrupt(format!("failed to read quantity: {e}")))?
            .unwrap_or(0);
            if (quantity as i32) > available {
                return Err(StoreError::InsufficientStock(format!(
                    "bin {}: requested {quantity}, available {available}",
                    bin.code
                )));
            }
            let left = available - quantity as i32;
            let query = if left == 0 {
                sqlx::query(
                    "DELETE FROM bin_items WHERE bin_id = $1 AND item_id = $2 AND batch_number = $3",
                )
            } else {
                sqlx::query(
                    "UPDATE bin_items SET quantity = $4 \
                     WHERE bin_id = $1 AND item_id = $2 AND batch_number = $3",
                )
            };
            let query = query
                .bind(bin_id.as_uuid())
                .bind(item_id.as_uuid())
                .bind(batch_key);
            let query = if left == 0 { query } else { query.bind(left) };
            query
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("issue_bin_item", e))?;
            (-(quantity as i32), left as u32)
        }
    };

    let row = sqlx::query(
        r#"
        UPDATE bins
        SET current_load = current_load + $2, version = version + 1
        WHERE bin_id = $1
        RETURNING current_load, version
        "#,
    )
    .bind(bin_id.as_uuid())
    .bind(delta)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_bin", e))?;
    let current_load: i32 = row
        .try_get("current_load")
        .map_err(|e| corrupt(format!("failed to read current_load: {e}")))?;
    let new_version: i64 = row
        .try_get("version")
        .map_err(|e| corrupt(format!("failed to read version: {e}")))?;

    let sequence = match existing_sequence {
        Some(sequence) => {
            write_status(tx, &movement).await?;
            sequence
        }
        None => insert_movement(tx, &movement).await?,
    };

    Ok(CommitReceipt {
        applied: AppliedChange {
            bin_id,
            version: new_version as u64,
            current_load: current_load as u32,
            batch_quantity,
        },
        movement,
        sequence,
    })
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: &Movement,
) -> Result<u64, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO movements (
            movement_id, movement_type, item_id, batch_number, quantity, priority,
            from_bin, to_bin, user_id, status, failure_reason, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (movement_id) DO NOTHING
        RETURNING sequence
        "#,
    )
    .bind(movement.id.as_uuid())
    .bind(movement.movement_type.as_str())
    .bind(movement.item_id.as_uuid())
    .bind(movement.batch_number.as_deref())
    .bind(movement.quantity as i32)
    .bind(movement.priority.as_str())
    .bind(movement.from_bin.map(|b| *b.as_uuid()))
    .bind(movement.to_bin.map(|b| *b.as_uuid()))
    .bind(movement.user_id.as_uuid())
    .bind(movement.status().as_str())
    .bind(movement.failure_reason())
    .bind(movement.created_at)
    .bind(movement.updated_at())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?
    .ok_or_else(|| StoreError::Backend(format!("movement {} already recorded", movement.id)))?;

    let sequence: i64 = row
        .try_get("sequence")
        .map_err(|e| corrupt(format!("failed to read sequence: {e}")))?;
    Ok(sequence as u64)
}

async fn lock_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement_id: MovementId,
) -> Result<(u64, Movement), StoreError> {
    let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM movements WHERE movement_id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(movement_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_movement", e))?
        .ok_or_else(|| StoreError::NotFound(format!("movement not found: {movement_id}")))?;
    let entry = MovementRow::from_row(&row)
        .map_err(|e| corrupt(format!("failed to deserialize movement row: {e}")))?
        .into_entry()?;
    Ok((entry.sequence, entry.movement))
}

async fn write_status(
    tx: &mut Transaction<'_, Postgres>,
    movement: &Movement,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE movements SET status = $2, failure_reason = $3, updated_at = $4 WHERE movement_id = $1",
    )
    .bind(movement.id.as_uuid())
    .bind(movement.status().as_str())
    .bind(movement.failure_reason())
    .bind(movement.updated_at())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_movement_status", e))?;
    Ok(())
}

async fn fetch_rows<T>(pool: &PgPool, operation: &str, sql: &str) -> Result<Vec<T>, StoreError>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    let rows = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    rows.iter()
        .map(|row| T::from_row(row).map_err(|e| corrupt(format!("{operation}: {e}"))))
        .collect()
}

fn corrupt(msg: impl Into<String>) -> StoreError {
    StoreError::Backend(msg.into())
}

fn parse<T>(column: &str, value: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| corrupt(format!("invalid {column} value {value:?}: {e}")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                Some("23514") => StoreError::InsufficientCapacity(msg),
                Some("55P03") | Some("57014") => StoreError::Timeout(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct LockedBin {
    code: String,
    capacity: i32,
    current_load: i32,
    status: String,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for LockedBin {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LockedBin {
            code: row.try_get("code")?,
            capacity: row.try_get("capacity")?,
            current_load: row.try_get("current_load")?,
            status: row.try_get("status")?,
            version: row.try_get("version")?,
        })
    }
}

#[derive(Debug)]
struct ZoneRow {
    code: String,
    temperature: String,
    max_hazard: String,
    origin_x: f64,
    origin_y: f64,
}

impl<'r> FromRow<'r, PgRow> for ZoneRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ZoneRow {
            code: row.try_get("code")?,
            temperature: row.try_get("temperature")?,
            max_hazard: row.try_get("max_hazard")?,
            origin_x: row.try_get("origin_x")?,
            origin_y: row.try_get("origin_y")?,
        })
    }
}

impl ZoneRow {
    fn into_zone(self) -> Result<Zone, StoreError> {
        Ok(Zone {
            temperature: parse("temperature", &self.temperature)?,
            max_hazard: parse("max_hazard", &self.max_hazard)?,
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            code: self.code,
        })
    }
}

#[derive(Debug)]
struct AisleRow {
    zone_code: String,
    code: String,
    position: i32,
    width: f64,
}

impl<'r> FromRow<'r, PgRow> for AisleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AisleRow {
            zone_code: row.try_get("zone_code")?,
            code: row.try_get("code")?,
            position: row.try_get("position")?,
            width: row.try_get("width")?,
        })
    }
}

#[derive(Debug)]
struct RackRow {
    zone_code: String,
    aisle_code: String,
    code: String,
    level: i32,
    row_index: i32,
    column_index: i32,
}

impl<'r> FromRow<'r, PgRow> for RackRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RackRow {
            zone_code: row.try_get("zone_code")?,
            aisle_code: row.try_get("aisle_code")?,
            code: row.try_get("code")?,
            level: row.try_get("level")?,
            row_index: row.try_get("row_index")?,
            column_index: row.try_get("column_index")?,
        })
    }
}

#[derive(Debug)]
struct BinRow {
    bin_id: uuid::Uuid,
    code: String,
    zone_code: String,
    aisle_code: String,
    rack_code: String,
    capacity: i32,
    weight_limit: Option<f64>,
    status: String,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for BinRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(BinRow {
            bin_id: row.try_get("bin_id")?,
            code: row.try_get("code")?,
            zone_code: row.try_get("zone_code")?,
            aisle_code: row.try_get("aisle_code")?,
            rack_code: row.try_get("rack_code")?,
            capacity: row.try_get("capacity")?,
            weight_limit: row.try_get("weight_limit")?,
            status: row.try_get("status")?,
            version: row.try_get("version")?,
        })
    }
}

impl BinRow {
    /// Load is rebuilt from the stored batches by the topology builder.
    fn into_bin(self, rack: RackIdx) -> Result<Bin, StoreError> {
        let status: BinStatus = parse("status", &self.status)?;
        let mut bin = Bin::new(BinId::from_uuid(self.bin_id), self.code, rack, self.capacity as u32)
            .with_status(status)
            .with_version(self.version as u64);
        bin.weight_limit = self.weight_limit;
        Ok(bin)
    }
}

#[derive(Debug)]
struct ItemRow {
    item_id: uuid::Uuid,
    sku: String,
    category: String,
    hazard_level: String,
    required_temperature: String,
    unit_weight: f64,
    unit_volume: Option<f64>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            item_id: row.try_get("item_id")?,
            sku: row.try_get("sku")?,
            category: row.try_get("category")?,
            hazard_level: row.try_get("hazard_level")?,
            required_temperature: row.try_get("required_temperature")?,
            unit_weight: row.try_get("unit_weight")?,
            unit_volume: row.try_get("unit_volume")?,
        })
    }
}

impl ItemRow {
    fn into_item(self) -> Result<Item, StoreError> {
        Ok(Item {
            id: ItemId::from_uuid(self.item_id),
            hazard_level: parse("hazard_level", &self.hazard_level)?,
            required_temperature: parse("required_temperature", &self.required_temperature)?,
            sku: self.sku,
            category: self.category,
            unit_weight: self.unit_weight,
            unit_volume: self.unit_volume,
        })
    }
}

#[derive(Debug)]
struct BinItemRow {
    bin_id: uuid::Uuid,
    item_id: uuid::Uuid,
    batch_number: String,
    expiry_date: Option<NaiveDate>,
    quantity: i32,
}

impl<'r> FromRow<'r, PgRow> for BinItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(BinItemRow {
            bin_id: row.try_get("bin_id")?,
            item_id: row.try_get("item_id")?,
            batch_number: row.try_get("batch_number")?,
            expiry_date: row.try_get("expiry_date")?,
            quantity: row.try_get("quantity")?,
        })
    }
}

impl From<BinItemRow> for BinItem {
    fn from(row: BinItemRow) -> Self {
        BinItem {
            bin_id: BinId::from_uuid(row.bin_id),
            item_id: ItemId::from_uuid(row.item_id),
            // The empty string stands in for "no batch" so it can be part of the key.
            batch_number: (!row.batch_number.is_empty()).then_some(row.batch_number),
            expiry_date: row.expiry_date,
            quantity: row.quantity as u32,
        }
    }
}

#[derive(Debug)]
struct MovementRow {
    sequence: i64,
    movement_id: uuid::Uuid,
    movement_type: String,
    item_id: uuid::Uuid,
    batch_number: Option<String>,
    quantity: i32,
    priority: String,
    from_bin: Option<uuid::Uuid>,
    to_bin: Option<uuid::Uuid>,
    user_id: uuid::Uuid,
    status: String,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            sequence: row.try_get("sequence")?,
            movement_id: row.try_get("movement_id")?,
            movement_type: row.try_get("movement_type")?,
            item_id: row.try_get("item_id")?,
            batch_number: row.try_get("batch_number")?,
            quantity: row.try_get("quantity")?,
            priority: row.try_get("priority")?,
            from_bin: row.try_get("from_bin")?,
            to_bin: row.try_get("to_bin")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl MovementRow {
    fn into_entry(self) -> Result<LedgerEntry, StoreError> {
        let movement = Movement::restore(
            MovementId::from_uuid(self.movement_id),
            NewMovement {
                movement_type: parse("movement_type", &self.movement_type)?,
                item_id: ItemId::from_uuid(self.item_id),
                batch_number: self.batch_number,
                quantity: self.quantity as u32,
                priority: parse("priority", &self.priority)?,
                from_bin: self.from_bin.map(BinId::from_uuid),
                to_bin: self.to_bin.map(BinId::from_uuid),
                user_id: UserId::from_uuid(self.user_id),
            },
            parse("status", &self.status)?,
            self.failure_reason,
            self.created_at,
            self.updated_at,
        );
        Ok(LedgerEntry {
            sequence: self.sequence as u64,
            movement,
        })
    }
}
