//! The PostgreSQL statement bank.
//!
//! Same contract as the SQLite bank with the dialect differences: `$n`
//! placeholders, `ON CONFLICT` upserts, `GREATEST` for the monotonic expiry
//! update and `OCTET_LENGTH` for payload sizes. Group statements take an
//! optional partition (`$1 IS NULL` selects the whole store) and an expiry
//! mode as produced by `ExpiryFilter::mode`.

/// Schema bootstrap.
pub const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entry (
    "partition"   VARCHAR(255) NOT NULL,
    "key"         VARCHAR(255) NOT NULL,
    utc_creation  BIGINT NOT NULL,
    utc_expiry    BIGINT NOT NULL,
    "interval"    BIGINT NOT NULL,
    payload       BYTEA NOT NULL,
    compressed    BOOLEAN NOT NULL,
    parent_key_0  VARCHAR(255),
    parent_key_1  VARCHAR(255),
    parent_key_2  VARCHAR(255),
    parent_key_3  VARCHAR(255),
    parent_key_4  VARCHAR(255),
    PRIMARY KEY ("partition", "key")
)
"#;

/// Secondary indexes: expiry for sweeps, parent keys for cascades.
pub const CREATE_INDEXES: [&str; 6] = [
    r#"CREATE INDEX IF NOT EXISTS idx_cache_entry_expiry
       ON cache_entry (utc_expiry)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_cache_entry_parent_0
       ON cache_entry ("partition", parent_key_0) WHERE parent_key_0 IS NOT NULL"#,
    r#"CREATE INDEX IF NOT EXISTS idx_cache_entry_parent_1
       ON cache_entry ("partition", parent_key_1) WHERE parent_key_1 IS NOT NULL"#,
    r#"CREATE INDEX IF NOT EXISTS idx_cache_entry_parent_2
       ON cache_entry ("partition", parent_key_2) WHERE parent_key_2 IS NOT NULL"#,
    r#"CREATE INDEX IF NOT EXISTS idx_cache_entry_parent_3
       ON cache_entry ("partition", parent_key_3) WHERE parent_key_3 IS NOT NULL"#,
    r#"CREATE INDEX IF NOT EXISTS idx_cache_entry_parent_4
       ON cache_entry ("partition", parent_key_4) WHERE parent_key_4 IS NOT NULL"#,
];

/// Insert or replace by primary identity.
/// Binds: partition, key, utc_creation, utc_expiry, interval, payload,
/// compressed, parent_key_0..4.
pub const UPSERT_ENTRY: &str = r#"
INSERT INTO cache_entry
    ("partition", "key", utc_creation, utc_expiry, "interval", payload, compressed,
     parent_key_0, parent_key_1, parent_key_2, parent_key_3, parent_key_4)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
ON CONFLICT ("partition", "key") DO UPDATE SET
    utc_creation = EXCLUDED.utc_creation,
    utc_expiry = EXCLUDED.utc_expiry,
    "interval" = EXCLUDED."interval",
    payload = EXCLUDED.payload,
    compressed = EXCLUDED.compressed,
    parent_key_0 = EXCLUDED.parent_key_0,
    parent_key_1 = EXCLUDED.parent_key_1,
    parent_key_2 = EXCLUDED.parent_key_2,
    parent_key_3 = EXCLUDED.parent_key_3,
    parent_key_4 = EXCLUDED.parent_key_4
"#;

/// Full row by identity. Binds: partition, key, mode, now.
pub const PEEK_ENTRY: &str = r#"
SELECT "partition", "key", utc_creation, utc_expiry, "interval", payload, compressed,
       parent_key_0, parent_key_1, parent_key_2, parent_key_3, parent_key_4
FROM cache_entry
WHERE "partition" = $1 AND "key" = $2
  AND ($3 = 2 OR ($3 = 1 AND utc_expiry < $4) OR ($3 = 0 AND utc_expiry >= $4))
"#;

/// Group variant of [`PEEK_ENTRY`]. Binds: partition (nullable), mode, now.
pub const PEEK_ENTRIES: &str = r#"
SELECT "partition", "key", utc_creation, utc_expiry, "interval", payload, compressed,
       parent_key_0, parent_key_1, parent_key_2, parent_key_3, parent_key_4
FROM cache_entry
WHERE ($1 IS NULL OR "partition" = $1)
  AND ($2 = 2 OR ($2 = 1 AND utc_expiry < $3) OR ($2 = 0 AND utc_expiry >= $3))
ORDER BY "partition", "key"
"#;

/// Live-entry existence probe. Binds: partition, key, now.
pub const CONTAINS_ENTRY: &str = r#"
SELECT EXISTS(
    SELECT 1 FROM cache_entry
    WHERE "partition" = $1 AND "key" = $2 AND utc_expiry >= $3
)
"#;

/// Row count by scope and mode. Binds: partition (nullable), mode, now.
pub const COUNT_ENTRIES: &str = r#"
SELECT COUNT(*) FROM cache_entry
WHERE ($1 IS NULL OR "partition" = $1)
  AND ($2 = 2 OR ($2 = 1 AND utc_expiry < $3) OR ($2 = 0 AND utc_expiry >= $3))
"#;

/// Cascading single delete. Binds: partition, key.
pub const DELETE_ENTRY_SINGLE: &str = r#"
WITH RECURSIVE doomed("key") AS (
    SELECT $2::varchar
    UNION
    SELECT e."key"
    FROM cache_entry AS e
    JOIN doomed AS d
      ON e."partition" = $1
     AND d."key" IN (e.parent_key_0, e.parent_key_1, e.parent_key_2,
                     e.parent_key_3, e.parent_key_4)
)
DELETE FROM cache_entry
WHERE "partition" = $1 AND "key" IN (SELECT "key" FROM doomed)
"#;

/// Cascading group delete, seeded by the scope and mode filter.
/// Binds: partition (nullable), mode, now.
pub const DELETE_ENTRIES_GROUP: &str = r#"
WITH RECURSIVE doomed("partition", "key") AS (
    SELECT "partition", "key"
    FROM cache_entry
    WHERE ($1 IS NULL OR "partition" = $1)
      AND ($2 = 2 OR ($2 = 1 AND utc_expiry < $3) OR ($2 = 0 AND utc_expiry >= $3))
    UNION
    SELECT e."partition", e."key"
    FROM cache_entry AS e
    JOIN doomed AS d
      ON e."partition" = d."partition"
     AND d."key" IN (e.parent_key_0, e.parent_key_1, e.parent_key_2,
                     e.parent_key_3, e.parent_key_4)
)
DELETE FROM cache_entry
WHERE ("partition", "key") IN (SELECT "partition", "key" FROM doomed)
"#;

/// Monotonic expiry extension. Binds: partition, key, utc_expiry.
pub const UPDATE_ENTRY_EXPIRY: &str = r#"
UPDATE cache_entry SET utc_expiry = GREATEST(utc_expiry, $3)
WHERE "partition" = $1 AND "key" = $2
"#;

/// Sum of payload lengths by scope. Binds: partition (nullable).
pub const CACHE_SIZE_BYTES: &str = r#"
SELECT COALESCE(SUM(OCTET_LENGTH(payload)), 0)::bigint FROM cache_entry
WHERE ($1 IS NULL OR "partition" = $1)
"#;
