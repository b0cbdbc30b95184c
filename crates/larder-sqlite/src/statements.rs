//! The SQLite statement bank.
//!
//! Every statement is pre-composed with positional `?n` parameters; callers
//! bind, never concatenate. Group statements take an optional partition
//! (`?1 IS NULL` selects the whole store) and an expiry mode as produced by
//! `ExpiryFilter::mode` (0 = live only, 1 = expired only, 2 = all).
//!
//! Cascades are encoded in the delete statements as recursive CTEs; `UNION`
//! deduplicates the working set, so parent-key cycles terminate.

/// Schema bootstrap.
pub const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entry (
    "partition"   TEXT NOT NULL,
    "key"         TEXT NOT NULL,
    utc_creation  INTEGER NOT NULL,
    utc_expiry    INTEGER NOT NULL,
    "interval"    INTEGER NOT NULL,
    payload       BLOB NOT NULL,
    compressed    INTEGER NOT NULL,
    parent_key_0  TEXT,
    parent_key_1  TEXT,
    parent_key_2  TEXT,
    parent_key_3  TEXT,
    parent_key_4  TEXT,
    PRIMARY KEY ("partition", "key")
) STRICT
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
INSERT OR REPLACE INTO cache_entry
    ("partition", "key", utc_creation, utc_expiry, "interval", payload, compressed,
     parent_key_0, parent_key_1, parent_key_2, parent_key_3, parent_key_4)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
"#;

/// Full row by identity. Binds: partition, key, mode, now.
pub const PEEK_ENTRY: &str = r#"
SELECT "partition", "key", utc_creation, utc_expiry, "interval", payload, compressed,
       parent_key_0, parent_key_1, parent_key_2, parent_key_3, parent_key_4
FROM cache_entry
WHERE "partition" = ?1 AND "key" = ?2
  AND (?3 = 2 OR (?3 = 1 AND utc_expiry < ?4) OR (?3 = 0 AND utc_expiry >= ?4))
"#;

/// Group variant of [`PEEK_ENTRY`]. Binds: partition (nullable), mode, now.
pub const PEEK_ENTRIES: &str = r#"
SELECT "partition", "key", utc_creation, utc_expiry, "interval", payload, compressed,
       parent_key_0, parent_key_1, parent_key_2, parent_key_3, parent_key_4
FROM cache_entry
WHERE (?1 IS NULL OR "partition" = ?1)
  AND (?2 = 2 OR (?2 = 1 AND utc_expiry < ?3) OR (?2 = 0 AND utc_expiry >= ?3))
ORDER BY "partition", "key"
"#;

/// Live-entry existence probe. Binds: partition, key, now.
pub const CONTAINS_ENTRY: &str = r#"
SELECT EXISTS(
    SELECT 1 FROM cache_entry
    WHERE "partition" = ?1 AND "key" = ?2 AND utc_expiry >= ?3
)
"#;

/// Row count by scope and mode. Binds: partition (nullable), mode, now.
pub const COUNT_ENTRIES: &str = r#"
SELECT COUNT(*) FROM cache_entry
WHERE (?1 IS NULL OR "partition" = ?1)
  AND (?2 = 2 OR (?2 = 1 AND utc_expiry < ?3) OR (?2 = 0 AND utc_expiry >= ?3))
"#;

/// Cascading single delete. Binds: partition, key.
pub const DELETE_ENTRY_SINGLE: &str = r#"
WITH RECURSIVE doomed("key") AS (
    SELECT ?2
    UNION
    SELECT e."key"
    FROM cache_entry AS e
    JOIN doomed AS d
      ON e."partition" = ?1
     AND d."key" IN (e.parent_key_0, e.parent_key_1, e.parent_key_2,
                     e.parent_key_3, e.parent_key_4)
)
DELETE FROM cache_entry
WHERE "partition" = ?1 AND "key" IN (SELECT "key" FROM doomed)
"#;

/// Cascading group delete, seeded by the scope and mode filter.
/// Binds: partition (nullable), mode, now.
pub const DELETE_ENTRIES_GROUP: &str = r#"
WITH RECURSIVE doomed("partition", "key") AS (
    SELECT "partition", "key"
    FROM cache_entry
    WHERE (?1 IS NULL OR "partition" = ?1)
      AND (?2 = 2 OR (?2 = 1 AND utc_expiry < ?3) OR (?2 = 0 AND utc_expiry >= ?3))
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
UPDATE cache_entry SET utc_expiry = MAX(utc_expiry, ?3)
WHERE "partition" = ?1 AND "key" = ?2
"#;

/// Sum of payload lengths by scope. Binds: partition (nullable).
pub const CACHE_SIZE_BYTES: &str = r#"
SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM cache_entry
WHERE (?1 IS NULL OR "partition" = ?1)
"#;

/// Space reclamation after hard cleanup.
pub const VACUUM: &str = "VACUUM";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascading_deletes_are_recursive_and_deduplicated() {
        for statement in [DELETE_ENTRY_SINGLE, DELETE_ENTRIES_GROUP] {
            assert!(statement.contains("WITH RECURSIVE"));
            assert!(statement.contains("UNION"));
            assert!(!statement.contains("UNION ALL"));
        }
    }

    #[test]
    fn statements_never_interpolate() {
        let bank = [
            UPSERT_ENTRY,
            PEEK_ENTRY,
            PEEK_ENTRIES,
            CONTAINS_ENTRY,
            COUNT_ENTRIES,
            DELETE_ENTRY_SINGLE,
            DELETE_ENTRIES_GROUP,
            UPDATE_ENTRY_EXPIRY,
            CACHE_SIZE_BYTES,
        ];
        for statement in bank {
            assert!(!statement.contains("{}"), "format holes in: {statement}");
            assert!(statement.contains('?'), "no parameters in: {statement}");
        }
    }
}
