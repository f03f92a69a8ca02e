//! Resolver behavior on the blocking engine, observed through a recording
//! connector.

mod common;

use common::{AppError, Event, Recorder};
use fancy_sqlx::resolver::EngineHandle;
use fancy_sqlx::{Engine, FancyError, FancyResult, Inject};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio_test::{assert_err, assert_ok};

fn engine() -> (Engine<Recorder>, Recorder) {
    let recorder = Recorder::new();
    (Engine::new(recorder.clone()), recorder)
}

type H = EngineHandle<Recorder>;

// -----------------------------------------------------------------------------
// ensure_connection / x
// -----------------------------------------------------------------------------

#[test]
fn test_x_without_handle_opens_and_releases() {
    let (engine, rec) = engine();
    assert_ok!(engine.x(None, "SELECT 1"));
    assert_eq!(
        rec.events(),
        vec![
            Event::Connect(0),
            Event::Execute(0, "SELECT 1".into()),
            Event::Close(0)
        ]
    );
}

#[test]
fn test_provided_handle_is_passed_through_and_kept_open() {
    let (engine, rec) = engine();
    let handle = engine.acquire().unwrap();

    let same = engine.ensure_connection(|conn: &H, expected: &H| -> FancyResult<bool> {
        Ok(conn.same_as(expected))
    });
    assert!(same.call_with(Inject::from(&handle), &handle).unwrap());
    assert_ok!(engine.x(Some(&handle), "SELECT 1"));

    assert_eq!(rec.connects(), 1);
    assert_eq!(rec.closes(), 0);
    assert_eq!(rec.begins(), 0);
    assert!(!handle.is_closed());
    handle.close().unwrap();
}

#[test]
fn test_ensure_connection_releases_on_error() {
    let (engine, rec) = engine();
    let lookup = engine.ensure_connection(|conn: &H, name: &str| -> Result<(), AppError> {
        conn.execute(&"SELECT * FROM users".into())?;
        Err(AppError::NotFound(name.to_string()))
    });

    let err = lookup.call("alice").unwrap_err();
    assert!(matches!(err, AppError::NotFound(ref n) if n == "alice"));
    assert_eq!(rec.connects(), 1);
    assert_eq!(rec.closes(), 1);
    assert_eq!(rec.rollbacks(), 0);
}

#[test]
fn test_ensure_connection_does_not_begin() {
    let (engine, rec) = engine();
    let in_tx = engine.ensure_connection(|conn: &H, _: ()| -> FancyResult<bool> {
        Ok(conn.in_transaction())
    });
    assert!(!in_tx.call(()).unwrap());
    assert_eq!(rec.begins(), 0);
}

#[test]
fn test_connection_uses_ambient_scope() {
    let (engine, rec) = engine();
    let result: FancyResult<()> = engine.atomic(|outer| {
        engine.with_connection(Inject::Resolve, |inner| {
            assert!(inner.same_as(outer));
            Ok(())
        })
    });
    assert_ok!(result);
    assert_eq!(rec.connects(), 1);
    assert_eq!(rec.commits(), 1);
    assert_eq!(rec.closes(), 1);
}

// -----------------------------------------------------------------------------
// ensure_transaction / tx
// -----------------------------------------------------------------------------

#[test]
fn test_tx_without_handle_commits_once_and_releases() {
    let (engine, rec) = engine();
    assert_ok!(engine.tx(None, "INSERT"));
    assert_eq!(
        rec.events(),
        vec![
            Event::Connect(0),
            Event::Begin(0),
            Event::Execute(0, "INSERT".into()),
            Event::Commit(0),
            Event::Close(0)
        ]
    );
}

#[test]
fn test_tx_failure_rolls_back_once_and_releases() {
    let (engine, rec) = engine();
    let err = assert_err!(engine.tx(None, "FAIL"));
    assert!(matches!(err, FancyError::Database { .. }));
    assert_eq!(rec.commits(), 0);
    assert_eq!(rec.rollbacks(), 1);
    assert_eq!(rec.closes(), 1);
}

#[test]
fn test_tx_joins_transaction_already_open_on_handle() {
    let (engine, rec) = engine();
    let handle = engine.acquire().unwrap();
    handle.begin().unwrap();

    assert_ok!(engine.tx(Some(&handle), "INSERT"));
    assert_err!(engine.tx(Some(&handle), "FAIL"));

    assert_eq!(rec.begins(), 1);
    assert_eq!(rec.commits(), 0);
    assert_eq!(rec.rollbacks(), 0);
    assert!(handle.in_transaction());
    handle.rollback().unwrap();
    handle.close().unwrap();
}

#[test]
fn test_tx_begins_on_provided_handle_without_closing_it() {
    let (engine, rec) = engine();
    let handle = engine.acquire().unwrap();

    assert_ok!(engine.tx(Some(&handle), "INSERT"));
    assert_eq!(rec.begins(), 1);
    assert_eq!(rec.commits(), 1);
    assert_eq!(rec.closes(), 0);
    assert!(!handle.in_transaction());

    assert_err!(engine.tx(Some(&handle), "FAIL"));
    assert_eq!(rec.rollbacks(), 1);
    assert_eq!(rec.closes(), 0);
    handle.close().unwrap();
}

#[test]
fn test_ensure_transaction_sequential_calls_use_distinct_handles() {
    let (engine, rec) = engine();
    let create_user = engine.ensure_transaction(|conn: &H, name: &str| -> FancyResult<u64> {
        let out = conn.execute(&format!("INSERT {name}").into())?;
        Ok(out.rows_affected.unwrap_or(0))
    });

    assert_eq!(create_user.call("alice").unwrap(), 1);
    assert_eq!(create_user.call("bob").unwrap(), 1);

    assert_eq!(rec.commits(), 2);
    assert!(rec.events().contains(&Event::Close(0)));
    assert!(rec.events().contains(&Event::Close(1)));
    assert!(rec.events().contains(&Event::Execute(1, "INSERT bob".into())));
}

#[test]
fn test_user_error_passes_through_after_rollback() {
    let (engine, rec) = engine();
    let create = engine.ensure_transaction(|conn: &H, name: &str| -> Result<(), AppError> {
        conn.execute(&"INSERT".into())?;
        Err(AppError::NotFound(name.to_string()))
    });

    let err = create.call("carol").unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(rec.rollbacks(), 1);
    assert_eq!(rec.commits(), 0);
    assert_eq!(rec.closes(), 1);
}

#[test]
fn test_acquisition_failure_skips_body() {
    let (engine, rec) = engine();
    rec.set_fail_connect(true);

    let mut ran = false;
    let result: FancyResult<()> = engine.with_transaction(Inject::Resolve, |_| {
        ran = true;
        Ok(())
    });

    assert!(matches!(result, Err(FancyError::Connection { .. })));
    assert!(!ran);
    assert!(rec.events().is_empty());
}

// -----------------------------------------------------------------------------
// atomic / ax / atx
// -----------------------------------------------------------------------------

#[test]
fn test_nested_atomic_shares_one_transaction() {
    let (engine, rec) = engine();
    let result: FancyResult<()> = engine.atomic(|outer| {
        engine.ax("A")?;
        engine.atomic(|inner| {
            assert!(inner.same_as(outer));
            engine.ax("B")?;
            Ok(())
        })
    });

    assert_ok!(result);
    assert_eq!(
        rec.events(),
        vec![
            Event::Connect(0),
            Event::Begin(0),
            Event::Execute(0, "A".into()),
            Event::Execute(0, "B".into()),
            Event::Commit(0),
            Event::Close(0)
        ]
    );
    assert!(engine.current_handle().is_none());
}

#[test]
fn test_atomic_rolls_back_on_error() {
    let (engine, rec) = engine();
    let result: FancyResult<()> = engine.atomic(|_| {
        engine.ax("A")?;
        engine.ax("FAIL")?;
        Ok(())
    });

    assert!(matches!(result, Err(FancyError::Database { .. })));
    assert_eq!(rec.commits(), 0);
    assert_eq!(rec.rollbacks(), 1);
    assert_eq!(rec.closes(), 1);
}

#[test]
fn test_inner_error_rolls_back_whole_scope() {
    let (engine, rec) = engine();
    let result: Result<(), AppError> = engine.atomic(|_| {
        engine.ax("A")?;
        engine.atomic(|_| Err(AppError::NotFound("inner".into())))
    });

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(rec.begins(), 1);
    assert_eq!(rec.rollbacks(), 1);
    assert_eq!(rec.commits(), 0);
}

#[test]
fn test_atomic_skips_commit_when_body_ended_transaction() {
    let (engine, rec) = engine();
    let result: FancyResult<()> = engine.atomic(|conn| {
        engine.ax("A")?;
        conn.commit()
    });

    assert_ok!(result);
    assert_eq!(rec.commits(), 1);
    assert_eq!(rec.rollbacks(), 0);
    assert_eq!(rec.closes(), 1);
}

#[test]
fn test_ax_outside_scope_fails_without_connecting() {
    let (engine, rec) = engine();
    let err = assert_err!(engine.ax("SELECT 1"));
    assert!(matches!(err, FancyError::NoActiveScope { operation: "ax" }));
    assert_eq!(
        err.to_string(),
        "ax() must be called within an atomic() scope"
    );
    assert_eq!(rec.connects(), 0);
}

#[test]
fn test_ax_after_transaction_ended_is_rejected() {
    let (engine, _rec) = engine();
    let result: FancyResult<()> = engine.atomic(|conn| {
        conn.rollback()?;
        let err = engine.ax("A").unwrap_err();
        assert!(matches!(err, FancyError::NotInTransaction { operation: "ax" }));

        let nested: FancyResult<()> = engine.atomic(|_| Ok(()));
        assert!(matches!(nested, Err(FancyError::NotInTransaction { .. })));
        Ok(())
    });
    assert_ok!(result);
}

#[test]
fn test_atx_uses_scope_or_own_transaction() {
    let (engine, rec) = engine();

    assert_ok!(engine.atx("OUTSIDE"));
    assert_eq!(rec.connects(), 1);
    assert_eq!(rec.commits(), 1);
    assert_eq!(rec.closes(), 1);

    let result: FancyResult<()> = engine.atomic(|_| {
        engine.atx("INSIDE")?;
        Ok(())
    });
    assert_ok!(result);
    assert_eq!(rec.connects(), 2);
    assert_eq!(rec.begins(), 2);
    assert!(rec.events().contains(&Event::Execute(1, "INSIDE".into())));
}

#[test]
fn test_panic_in_atomic_rolls_back_and_restores_scope() {
    let (engine, rec) = engine();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _: FancyResult<()> = engine.atomic(|_| {
            engine.ax("A")?;
            panic!("boom");
        });
    }));

    assert!(outcome.is_err());
    assert_eq!(rec.rollbacks(), 1);
    assert_eq!(rec.closes(), 1);
    assert!(engine.current_handle().is_none());
}

#[test]
fn test_separate_engines_have_separate_scopes() {
    let (a, rec_a) = engine();
    let (b, rec_b) = engine();
    let result: FancyResult<()> = a.atomic(|_| {
        assert!(b.current_handle().is_none());
        assert!(matches!(b.ax("B"), Err(FancyError::NoActiveScope { .. })));
        a.ax("A")?;
        Ok(())
    });
    assert_ok!(result);
    assert_eq!(rec_a.connects(), 1);
    assert_eq!(rec_b.connects(), 0);
}

// -----------------------------------------------------------------------------
// non_atomic / nax
// -----------------------------------------------------------------------------

#[test]
fn test_non_atomic_opens_no_transaction() {
    let (engine, rec) = engine();
    let result: FancyResult<()> = engine.non_atomic(|outer| {
        engine.nax("A")?;
        engine.non_atomic(|inner| {
            assert!(inner.same_as(outer));
            engine.nax("B")?;
            Ok(())
        })
    });

    assert_ok!(result);
    assert_eq!(rec.connects(), 1);
    assert_eq!(rec.begins(), 0);
    assert_eq!(rec.commits(), 0);
    assert_eq!(rec.closes(), 1);
}

#[test]
fn test_nax_outside_scope_uses_fresh_handle() {
    let (engine, rec) = engine();
    assert_ok!(engine.nax("A"));
    assert_eq!(rec.connects(), 1);
    assert_eq!(rec.begins(), 0);
    assert_eq!(rec.closes(), 1);
}

#[test]
fn test_ax_inside_non_atomic_requires_transaction() {
    let (engine, _rec) = engine();
    let result: FancyResult<()> = engine.non_atomic(|_| {
        let err = engine.ax("A").unwrap_err();
        assert!(matches!(err, FancyError::NotInTransaction { operation: "ax" }));
        Ok(())
    });
    assert_ok!(result);
}

#[test]
fn test_atomic_inside_non_atomic() {
    let (engine, rec) = engine();

    let result: FancyResult<()> = engine.non_atomic(|_| engine.atomic(|_| Ok(())));
    assert!(matches!(result, Err(FancyError::AtomicInsideNonAtomic)));

    let result: FancyResult<()> = engine.non_atomic(|outer| {
        outer.begin()?;
        engine.atomic(|inner| {
            assert!(inner.same_as(outer));
            engine.ax("A")?;
            Ok::<(), FancyError>(())
        })?;
        // The shared transaction belongs to the non_atomic() body.
        assert!(outer.in_transaction());
        outer.commit()
    });
    assert_ok!(result);
    assert_eq!(rec.connects(), 2);
    assert_eq!(rec.commits(), 1);
}

#[test]
fn test_non_atomic_inside_atomic_reuses_atomic_handle() {
    let (engine, rec) = engine();
    let result: FancyResult<()> = engine.atomic(|outer| {
        engine.non_atomic(|inner| {
            assert!(inner.same_as(outer));
            assert!(inner.in_transaction());
            engine.ax("A")?;
            Ok(())
        })
    });
    assert_ok!(result);
    assert_eq!(rec.connects(), 1);
    assert_eq!(rec.commits(), 1);
}
