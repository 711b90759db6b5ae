use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_archive_results")
        .depends_on(&["0001_initial_schema"])
        // Append-only attempt log
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE IF NOT EXISTS archive_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    link_id TEXT NOT NULL REFERENCES links(id),
    extractor TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    status TEXT NOT NULL,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    cmd TEXT NOT NULL DEFAULT '[]',
    cmd_version TEXT,
    output TEXT,
    error TEXT
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX IF NOT EXISTS idx_archive_results_link ON archive_results(link_id, extractor)",
        ))
        // Newest successful output per extractor
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE IF NOT EXISTS latest_outputs (
    link_id TEXT NOT NULL REFERENCES links(id),
    extractor TEXT NOT NULL,
    output TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (link_id, extractor)
)"#,
        ))
}
