//! Sizing for multi-row statements against the cache database

/// Bound parameters SQLite accepts in one statement on older builds.
pub const SQLITE_MAX_BINDS: usize = 999;

/// Rows per multi-row INSERT so that `columns * rows` stays under the bind limit.
pub fn rows_per_statement(columns: usize) -> usize {
    (SQLITE_MAX_BINDS / columns.max(1)).max(1)
}
