//! Recording connector shared by the integration tests.
//!
//! Every driver call is appended to an event log so tests can assert exact
//! begin/commit/rollback/close counts. Special statements:
//! - `FAIL` returns a database error
//! - `SLEEP` waits 200ms before running (async only)
//! - `COMMIT` / `ROLLBACK` end the transaction like a raw statement would
//!
//! [`Recorder::set_delay`] makes an async driver call wait before it takes
//! effect, so a scope can be cancelled in the middle of it.

#![allow(dead_code)]

use fancy_sqlx::db::{AsyncConnection, AsyncConnector, Connection, Connector};
use fancy_sqlx::models::{DatabaseType, QueryOutput, Statement};
use fancy_sqlx::{FancyError, FancyResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(usize),
    Begin(usize),
    Commit(usize),
    Rollback(usize),
    Close(usize),
    Execute(usize, String),
}

/// Driver calls that can be slowed down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Connect,
    Begin,
    Commit,
    Rollback,
}

#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    next_id: Arc<AtomicUsize>,
    fail_connect: Arc<AtomicBool>,
    delays: Arc<Mutex<HashMap<Step, Duration>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn connects(&self) -> usize {
        self.count(|e| matches!(e, Event::Connect(_)))
    }

    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, Event::Begin(_)))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(_)))
    }

    pub fn closes(&self) -> usize {
        self.count(|e| matches!(e, Event::Close(_)))
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, step: Step, delay: Duration) {
        self.delays.lock().unwrap().insert(step, delay);
    }

    pub fn clear_delays(&self) {
        self.delays.lock().unwrap().clear();
    }

    async fn pause(&self, step: Step) {
        let delay = self.delays.lock().unwrap().get(&step).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn open(&self) -> FancyResult<RecordingConnection> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(FancyError::connection("connection refused", "start the server"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.push(Event::Connect(id));
        Ok(RecordingConnection {
            id,
            in_tx: false,
            log: self.clone(),
        })
    }
}

pub struct RecordingConnection {
    id: usize,
    in_tx: bool,
    log: Recorder,
}

impl RecordingConnection {
    fn run(&mut self, statement: &Statement) -> FancyResult<QueryOutput> {
        self.log.push(Event::Execute(self.id, statement.sql.clone()));
        match statement.sql.as_str() {
            "FAIL" => Err(FancyError::database("forced failure", None, "none")),
            "COMMIT" | "ROLLBACK" => {
                self.in_tx = false;
                Ok(QueryOutput::write_result(0, None))
            }
            _ => Ok(QueryOutput::write_result(1, None)),
        }
    }
}

impl Connection for RecordingConnection {
    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    fn begin(&mut self) -> FancyResult<()> {
        if self.in_tx {
            return Err(FancyError::invalid_input("already in a transaction"));
        }
        self.log.push(Event::Begin(self.id));
        self.in_tx = true;
        Ok(())
    }

    fn commit(&mut self) -> FancyResult<()> {
        self.log.push(Event::Commit(self.id));
        self.in_tx = false;
        Ok(())
    }

    fn rollback(&mut self) -> FancyResult<()> {
        self.log.push(Event::Rollback(self.id));
        self.in_tx = false;
        Ok(())
    }

    fn execute(&mut self, statement: &Statement) -> FancyResult<QueryOutput> {
        self.run(statement)
    }

    fn close(&mut self) -> FancyResult<()> {
        self.log.push(Event::Close(self.id));
        self.in_tx = false;
        Ok(())
    }
}

impl AsyncConnection for RecordingConnection {
    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn begin(&mut self) -> FancyResult<()> {
        self.log.pause(Step::Begin).await;
        Connection::begin(self)
    }

    async fn commit(&mut self) -> FancyResult<()> {
        self.log.pause(Step::Commit).await;
        Connection::commit(self)
    }

    async fn rollback(&mut self) -> FancyResult<()> {
        self.log.pause(Step::Rollback).await;
        Connection::rollback(self)
    }

    async fn execute(&mut self, statement: &Statement) -> FancyResult<QueryOutput> {
        if statement.sql == "SLEEP" {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.run(statement)
    }

    async fn close(&mut self) -> FancyResult<()> {
        Connection::close(self)
    }
}

impl Connector for Recorder {
    type Connection = RecordingConnection;

    fn connect(&self) -> FancyResult<RecordingConnection> {
        self.open()
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}

impl AsyncConnector for Recorder {
    type Connection = RecordingConnection;

    async fn connect(&self) -> FancyResult<RecordingConnection> {
        self.pause(Step::Connect).await;
        self.open()
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}

/// Application error used to check that body errors pass through untouched.
#[derive(Debug)]
pub enum AppError {
    Db(FancyError),
    NotFound(String),
}

impl From<FancyError> for AppError {
    fn from(err: FancyError) -> Self {
        Self::Db(err)
    }
}
