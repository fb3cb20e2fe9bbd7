//! Idempotent schema migration, run at start-up against PostgreSQL.

use diesel_async::AsyncPgConnection;
use diesel_async::SimpleAsyncConnection;

/// SQL migration for the repository and build tables.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS zapp_repositories (
    id              BIGSERIAL PRIMARY KEY,
    name            VARCHAR(255) NOT NULL,
    local_path      VARCHAR(1024) NOT NULL,
    remote_url      VARCHAR(1024),
    github_repo     VARCHAR(255),
    default_branch  VARCHAR(255) NOT NULL DEFAULT 'master',
    last_scheme     VARCHAR(255),
    last_platform   JSONB,
    active          BOOLEAN NOT NULL DEFAULT TRUE,
    create_date     TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_zapp_repositories_github ON zapp_repositories (github_repo);

CREATE TABLE IF NOT EXISTS zapp_builds (
    id              BIGSERIAL PRIMARY KEY,
    repository_id   BIGINT NOT NULL REFERENCES zapp_repositories(id) ON DELETE CASCADE,
    scheme          VARCHAR(255),
    platform        JSONB,
    latest_revision VARCHAR(64),
    commit_log      TEXT NOT NULL DEFAULT '',
    log             TEXT NOT NULL DEFAULT '',
    status          VARCHAR(32) NOT NULL DEFAULT 'not_started',
    start_date      TIMESTAMPTZ,
    start_timestamp DOUBLE PRECISION,
    end_date        TIMESTAMPTZ,
    end_timestamp   DOUBLE PRECISION,
    create_date     TIMESTAMPTZ DEFAULT NOW(),
    CHECK (end_timestamp IS NULL OR (start_timestamp IS NOT NULL AND start_timestamp <= end_timestamp))
);

CREATE INDEX IF NOT EXISTS idx_zapp_builds_repository ON zapp_builds (repository_id);
CREATE INDEX IF NOT EXISTS idx_zapp_builds_status ON zapp_builds (status);
CREATE INDEX IF NOT EXISTS idx_zapp_builds_start ON zapp_builds (start_timestamp DESC);
"#;

/// Run the schema migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("zapp migration failed: {e}"))?;
    Ok(())
}
