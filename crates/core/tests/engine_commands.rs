//! End-to-end command tests against a scratch SQLite database.

use std::fs;
use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tempfile::TempDir;

use schemaflow::{EngineConfig, MigrateError, MigrationEngine, MigrationLedger};

fn test_config(root: &TempDir) -> EngineConfig {
    EngineConfig {
        db_path: root.path().join("test.db"),
        migrations_dir: root.path().join("migrations"),
        steps: 0,
        verbose: false,
        force: false,
        dry_run: false,
    }
}

fn write_pair(dir: &Path, version: i64, name: &str, up_sql: &str, down_sql: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(format!("{version}_{name}.up.sql")), up_sql).unwrap();
    fs::write(dir.join(format!("{version}_{name}.down.sql")), down_sql).unwrap();
}

fn write_table_pair(dir: &Path, version: i64, table: &str) {
    write_pair(
        dir,
        version,
        table,
        &format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY, name TEXT NOT NULL);"),
        &format!("DROP TABLE {table};"),
    );
}

async fn open_pool(db: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(db)
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap()
}

async fn table_exists(pool: &SqlitePool, name: &str) -> bool {
    sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
        .unwrap()
        .is_some()
}

#[tokio::test]
async fn up_applies_pending_in_ascending_order() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    // write out of order on purpose
    write_table_pair(&config.migrations_dir, 30, "reports");
    write_table_pair(&config.migrations_dir, 10, "schools");
    write_table_pair(&config.migrations_dir, 20, "teachers");

    let engine = MigrationEngine::connect(config).await.unwrap();
    let summary = engine.up().await.unwrap();
    assert_eq!(summary.applied_versions, vec![10, 20, 30]);

    let version = engine.version().await.unwrap();
    assert_eq!(version.current, 30);
    assert_eq!(version.applied_count, 3);

    let status = engine.status().await.unwrap();
    assert_eq!(status.total_count, 3);
    assert_eq!(status.applied_count, 3);
    let versions: Vec<i64> = status.rows.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![10, 20, 30]);
    assert!(status.rows.iter().all(|r| r.applied));
}

#[tokio::test]
async fn up_twice_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_table_pair(&config.migrations_dir, 1, "schools");

    let engine = MigrationEngine::connect(config).await.unwrap();
    let first = engine.up().await.unwrap();
    assert_eq!(first.applied_versions, vec![1]);

    let second = engine.up().await.unwrap();
    assert!(second.applied_versions.is_empty());
    assert_eq!(second.already_applied, 1);
    assert_eq!(engine.version().await.unwrap().applied_count, 1);
}

#[tokio::test]
async fn failed_script_leaves_no_partial_state() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_table_pair(&config.migrations_dir, 1, "schools");
    // second statement references a table that does not exist
    write_pair(
        &config.migrations_dir,
        2,
        "broken",
        "CREATE TABLE half_done (id INTEGER PRIMARY KEY);\n\
         INSERT INTO no_such_table (id) VALUES (1);",
        "DROP TABLE half_done;",
    );

    let db_path = config.db_path.clone();
    let engine = MigrationEngine::connect(config).await.unwrap();
    let err = engine.up().await.unwrap_err();
    assert!(matches!(err, MigrateError::Execution { version: 2, .. }));

    // migration 1 committed, migration 2 fully rolled back
    let status = engine.status().await.unwrap();
    assert_eq!(status.applied_count, 1);
    assert!(status.rows.iter().any(|r| r.version == 1 && r.applied));
    assert!(status.rows.iter().any(|r| r.version == 2 && !r.applied));

    let pool = open_pool(&db_path).await;
    assert!(table_exists(&pool, "schools").await);
    assert!(!table_exists(&pool, "half_done").await);
}

#[tokio::test]
async fn down_rolls_back_only_most_recent() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    for (version, table) in [(1, "schools"), (2, "teachers"), (3, "reports")] {
        write_table_pair(&config.migrations_dir, version, table);
    }

    let db_path = config.db_path.clone();
    let engine = MigrationEngine::connect(config).await.unwrap();
    engine.up().await.unwrap();

    let rolled_back = engine.down().await.unwrap();
    assert_eq!(rolled_back, Some(3));

    let status = engine.status().await.unwrap();
    assert_eq!(status.applied_count, 2);
    let applied: Vec<i64> = status
        .rows
        .iter()
        .filter(|r| r.applied)
        .map(|r| r.version)
        .collect();
    assert_eq!(applied, vec![1, 2]);

    let pool = open_pool(&db_path).await;
    assert!(!table_exists(&pool, "reports").await);
    assert!(table_exists(&pool, "teachers").await);
}

#[tokio::test]
async fn down_on_empty_ledger_is_noop() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    fs::create_dir_all(&config.migrations_dir).unwrap();

    let engine = MigrationEngine::connect(config).await.unwrap();
    assert_eq!(engine.down().await.unwrap(), None);
}

#[tokio::test]
async fn down_without_matching_script_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_table_pair(&config.migrations_dir, 1, "schools");

    let engine = MigrationEngine::connect(config.clone()).await.unwrap();
    engine.up().await.unwrap();

    fs::remove_file(config.migrations_dir.join("1_schools.down.sql")).unwrap();
    let err = engine.down().await.unwrap_err();
    assert!(matches!(err, MigrateError::NotFound { version: 1, .. }));
    // nothing was rolled back
    assert_eq!(engine.version().await.unwrap().applied_count, 1);
}

#[tokio::test]
async fn down_all_without_force_is_inert() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_table_pair(&config.migrations_dir, 1, "schools");
    write_table_pair(&config.migrations_dir, 2, "teachers");

    let engine = MigrationEngine::connect(config).await.unwrap();
    engine.up().await.unwrap();

    // force is false: success, but no mutation
    let summary = engine.down_all().await.unwrap();
    assert!(summary.rolled_back_versions.is_empty());
    assert_eq!(engine.version().await.unwrap().applied_count, 2);
}

#[tokio::test]
async fn down_all_skips_versions_missing_down_scripts() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    for (version, table) in [(1, "schools"), (2, "teachers"), (3, "reports")] {
        write_table_pair(&config.migrations_dir, version, table);
    }

    let engine = MigrationEngine::connect(config.clone()).await.unwrap();
    engine.up().await.unwrap();

    fs::remove_file(config.migrations_dir.join("2_teachers.down.sql")).unwrap();

    config.force = true;
    let engine = MigrationEngine::connect(config).await.unwrap();
    let summary = engine.down_all().await.unwrap();

    // rolled back 3, skipped 2 with a warning, rolled back 1
    assert_eq!(summary.rolled_back_versions, vec![3, 1]);
    assert_eq!(summary.skipped, 1);

    let status = engine.status().await.unwrap();
    let applied: Vec<i64> = status
        .rows
        .iter()
        .filter(|r| r.applied)
        .map(|r| r.version)
        .collect();
    assert_eq!(applied, vec![2]);
}

#[tokio::test]
async fn dry_run_reports_without_mutating() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    write_table_pair(&config.migrations_dir, 10, "schools");
    write_table_pair(&config.migrations_dir, 20, "teachers");
    config.dry_run = true;

    let db_path = config.db_path.clone();
    let engine = MigrationEngine::connect(config).await.unwrap();
    let summary = engine.up().await.unwrap();

    assert_eq!(summary.applied_versions, vec![10, 20]);
    assert_eq!(engine.version().await.unwrap().applied_count, 0);
    let pool = open_pool(&db_path).await;
    assert!(!table_exists(&pool, "schools").await);
}

#[tokio::test]
async fn step_limit_caps_newly_applied_versions() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    for (version, table) in [(1, "schools"), (2, "teachers"), (3, "reports")] {
        write_table_pair(&config.migrations_dir, version, table);
    }
    config.steps = 2;

    let engine = MigrationEngine::connect(config).await.unwrap();
    let summary = engine.up().await.unwrap();
    assert_eq!(summary.applied_versions, vec![1, 2]);
    assert_eq!(summary.pending_remaining, 1);
    assert_eq!(engine.version().await.unwrap().current, 2);

    // the limit counts newly applied versions, so the next run picks up
    // where this one stopped
    let summary = engine.up().await.unwrap();
    assert_eq!(summary.applied_versions, vec![3]);
}

#[tokio::test]
async fn status_of_empty_directory_reports_zero() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    fs::create_dir_all(&config.migrations_dir).unwrap();

    let engine = MigrationEngine::connect(config).await.unwrap();
    let status = engine.status().await.unwrap();
    assert_eq!(status.total_count, 0);
    assert_eq!(status.applied_count, 0);
    assert!(status.rows.is_empty());
}

#[tokio::test]
async fn duplicate_versions_abort_the_run() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    fs::create_dir_all(&config.migrations_dir).unwrap();
    fs::write(
        config.migrations_dir.join("5_first.up.sql"),
        "CREATE TABLE a (id INTEGER);",
    )
    .unwrap();
    fs::write(
        config.migrations_dir.join("5_second.up.sql"),
        "CREATE TABLE b (id INTEGER);",
    )
    .unwrap();

    let engine = MigrationEngine::connect(config).await.unwrap();
    let err = engine.up().await.unwrap_err();
    assert!(matches!(err, MigrateError::Config(_)));
    assert_eq!(engine.version().await.unwrap().applied_count, 0);
}

#[tokio::test]
async fn unparseable_filenames_are_skipped_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_table_pair(&config.migrations_dir, 1, "schools");
    fs::write(
        config.migrations_dir.join("helpers.up.sql"),
        "CREATE TABLE never_run (id INTEGER);",
    )
    .unwrap();

    let db_path = config.db_path.clone();
    let engine = MigrationEngine::connect(config).await.unwrap();
    let summary = engine.up().await.unwrap();
    assert_eq!(summary.applied_versions, vec![1]);

    let pool = open_pool(&db_path).await;
    assert!(!table_exists(&pool, "never_run").await);
}

#[tokio::test]
async fn concurrent_migrator_fails_fast_on_lock() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_table_pair(&config.migrations_dir, 1, "schools");

    let db_path = config.db_path.clone();
    let engine = MigrationEngine::connect(config).await.unwrap();

    // a second migrator holds the advisory lock
    let other = MigrationLedger::new(open_pool(&db_path).await);
    other.acquire_lock().await.unwrap();

    let err = engine.up().await.unwrap_err();
    assert!(matches!(err, MigrateError::Locked { .. }));

    other.release_lock().await.unwrap();
    let summary = engine.up().await.unwrap();
    assert_eq!(summary.applied_versions, vec![1]);
}

#[tokio::test]
async fn modified_applied_script_warns_but_does_not_block() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_table_pair(&config.migrations_dir, 1, "schools");
    write_table_pair(&config.migrations_dir, 2, "teachers");

    let engine = MigrationEngine::connect(config.clone()).await.unwrap();
    let mut c = config.clone();
    c.steps = 1;
    let limited = MigrationEngine::connect(c).await.unwrap();
    limited.up().await.unwrap();

    // edit the already-applied script: same length, different content
    fs::write(
        config.migrations_dir.join("1_schools.up.sql"),
        "CREATE TABLE sChools (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    )
    .unwrap();

    let summary = engine.up().await.unwrap();
    assert_eq!(summary.applied_versions, vec![2]);
    assert_eq!(engine.version().await.unwrap().applied_count, 2);
}

#[tokio::test]
async fn version_reapplies_after_rollback() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_table_pair(&config.migrations_dir, 1, "schools");

    let engine = MigrationEngine::connect(config).await.unwrap();
    engine.up().await.unwrap();
    assert_eq!(engine.down().await.unwrap(), Some(1));
    assert_eq!(engine.version().await.unwrap().current, 0);

    let summary = engine.up().await.unwrap();
    assert_eq!(summary.applied_versions, vec![1]);
    assert_eq!(engine.version().await.unwrap().current, 1);
}
