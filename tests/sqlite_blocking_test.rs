//! Blocking engine against a real SQLite file through rusqlite.

use fancy_sqlx::resolver::EngineHandle;
use fancy_sqlx::{Engine, FancyError, FancyResult, RusqliteConnector, Statement};
use tempfile::TempDir;

type H = EngineHandle<RusqliteConnector>;

fn setup() -> (TempDir, Engine<RusqliteConnector>) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(RusqliteConnector::new(dir.path().join("app.db")));
    engine
        .x(
            None,
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)",
        )
        .unwrap();
    (dir, engine)
}

fn count(engine: &Engine<RusqliteConnector>) -> i64 {
    engine
        .x(None, "SELECT COUNT(*) FROM users")
        .unwrap()
        .scalar_i64()
        .unwrap()
}

fn insert(name: &str) -> Statement {
    Statement::new("INSERT INTO users (name) VALUES (?)").bind(name)
}

#[test]
fn test_ensure_transaction_commits_each_call() {
    let (_dir, engine) = setup();
    let create_user = engine.ensure_transaction(|conn: &H, name: &str| -> FancyResult<i64> {
        let out = conn.execute(&insert(name))?;
        Ok(out.last_insert_id.unwrap_or_default())
    });

    assert_eq!(create_user.call("alice").unwrap(), 1);
    assert_eq!(create_user.call("bob").unwrap(), 2);
    assert_eq!(count(&engine), 2);
}

#[test]
fn test_atomic_failure_leaves_no_rows() {
    let (_dir, engine) = setup();
    let result: FancyResult<()> = engine.atomic(|_| {
        engine.ax(insert("alice"))?;
        engine.ax(insert("bob"))?;
        // Violates UNIQUE(name).
        engine.ax(insert("alice"))?;
        Ok(())
    });

    assert!(matches!(result, Err(FancyError::Database { .. })));
    assert_eq!(count(&engine), 0);
}

#[test]
fn test_atomic_work_is_visible_only_after_commit() {
    let (_dir, engine) = setup();
    let result: FancyResult<()> = engine.atomic(|_| {
        engine.ax(insert("alice"))?;
        // A second engine has no view of this scope and reads committed data only.
        let other = Engine::new(engine.connector().clone());
        assert_eq!(count(&other), 0);
        let inside = engine.ax("SELECT COUNT(*) FROM users")?.scalar_i64();
        assert_eq!(inside, Some(1));
        Ok(())
    });
    assert!(result.is_ok());
    assert_eq!(count(&engine), 1);
}

#[test]
fn test_body_commit_is_respected() {
    let (_dir, engine) = setup();
    let result: FancyResult<()> = engine.atomic(|_| {
        engine.ax(insert("alice"))?;
        engine.ax("COMMIT")?;
        Ok(())
    });
    assert!(result.is_ok());
    assert_eq!(count(&engine), 1);
}

#[test]
fn test_non_atomic_discards_uncommitted_work() {
    let (_dir, engine) = setup();

    let result: FancyResult<()> = engine.non_atomic(|conn| {
        conn.begin()?;
        engine.nax(insert("alice"))?;
        Ok(())
    });
    assert!(result.is_ok());
    assert_eq!(count(&engine), 0);

    let result: FancyResult<()> = engine.non_atomic(|conn| {
        conn.begin()?;
        engine.atomic(|_| engine.ax(insert("bob")).map(|_| ()))?;
        conn.commit()
    });
    assert!(result.is_ok());
    assert_eq!(count(&engine), 1);
}

#[test]
fn test_explicit_handle_keeps_caller_transaction() {
    let (_dir, engine) = setup();
    let handle = engine.acquire().unwrap();
    handle.begin().unwrap();

    engine.tx(Some(&handle), insert("alice")).unwrap();
    assert!(handle.in_transaction());
    handle.rollback().unwrap();
    handle.close().unwrap();

    assert_eq!(count(&engine), 0);
}
