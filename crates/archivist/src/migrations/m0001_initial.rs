use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_initial_schema")
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE IF NOT EXISTS links (
    id TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL UNIQUE,
    domain TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    title TEXT,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    retry_at TEXT,
    end_ts TEXT,
    tie_break TEXT NOT NULL,
    options TEXT NOT NULL DEFAULT '{}'
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX IF NOT EXISTS idx_links_retry_at ON links(retry_at) WHERE retry_at IS NOT NULL",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            r#"CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY NOT NULL,
    link_id TEXT NOT NULL REFERENCES links(id),
    extractor TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    retries INTEGER NOT NULL DEFAULT 0,
    cmd TEXT NOT NULL DEFAULT '[]',
    cmd_version TEXT,
    pwd TEXT,
    output TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    start_ts TEXT,
    end_ts TEXT,
    retry_at TEXT,
    tie_break TEXT NOT NULL,
    UNIQUE(link_id, extractor)
)"#,
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX IF NOT EXISTS idx_jobs_retry_at ON jobs(retry_at) WHERE retry_at IS NOT NULL",
        ))
        .operation(RunSql::portable().for_backend(
            "sqlite",
            "CREATE INDEX IF NOT EXISTS idx_jobs_link_id ON jobs(link_id)",
        ))
}
