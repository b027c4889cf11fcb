#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use schemalock::error::SqlError;
use schemalock::session::{LockRow, LockSession, SqlParam};

/// Statement kinds the scripted session recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Columns,
    Create,
    Drop,
    Insert,
    Begin,
    Select,
    Update,
    Commit,
}

fn classify(sql: &str) -> Step {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("SELECT LOWER") {
        Step::Columns
    } else if upper.starts_with("CREATE") {
        Step::Create
    } else if upper.starts_with("DROP") {
        Step::Drop
    } else if upper.starts_with("INSERT") {
        Step::Insert
    } else if upper.starts_with("BEGIN") {
        Step::Begin
    } else if upper.starts_with("SELECT") {
        Step::Select
    } else if upper.starts_with("UPDATE") {
        Step::Update
    } else if upper.starts_with("COMMIT") {
        Step::Commit
    } else {
        panic!("Unexpected statement: {sql}")
    }
}

/// Shared state behind a [`ScriptedSession`].
#[derive(Debug, Default)]
pub struct Script {
    /// Every statement run, in order.
    pub log: Vec<String>,
    /// Whether the lock table exists.
    pub table_exists: bool,
    /// Lock state per resource.
    pub rows: HashMap<String, i64>,
    /// Outcomes to inject, consumed one per matching statement. `None`
    /// lets that statement through.
    pub failures: HashMap<Step, VecDeque<Option<SqlError>>>,
    /// Rows as of the open transaction's BEGIN.
    pub snapshot: Option<HashMap<String, i64>>,
    /// Remove the row right before the next N selects.
    pub vanish_before_select: usize,
    /// Free every row once, after this many selects have run.
    pub release_after_selects: Option<usize>,
    /// Selects seen so far.
    pub selects: usize,
}

impl Script {
    pub fn count(&self, step: Step) -> usize {
        self.log.iter().filter(|sql| classify(sql) == step).count()
    }
}

/// In-memory session that interprets the lock statements and injects
/// failures on demand.
#[derive(Clone, Default)]
pub struct ScriptedSession {
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next unscripted `step` statement with `code`.
    pub fn fail(&self, step: Step, code: &str) -> &Self {
        let err = SqlError::new(code, format!("injected {step:?} failure"));
        self.push(step, Some(err))
    }

    /// Lets the next unscripted `step` statement through.
    pub fn pass(&self, step: Step) -> &Self {
        self.push(step, None)
    }

    fn push(&self, step: Step, outcome: Option<SqlError>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .failures
            .entry(step)
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn vanish_before_select(&self, times: usize) {
        self.script.lock().unwrap().vanish_before_select = times;
    }

    pub fn release_after_selects(&self, selects: usize) {
        self.script.lock().unwrap().release_after_selects = Some(selects);
    }

    pub fn set_row(&self, resource: &str, state: i64) {
        let mut script = self.script.lock().unwrap();
        script.table_exists = true;
        script.rows.insert(resource.to_string(), state);
    }

    pub fn row(&self, resource: &str) -> Option<i64> {
        self.script.lock().unwrap().rows.get(resource).copied()
    }

    pub fn count(&self, step: Step) -> usize {
        self.script.lock().unwrap().count(step)
    }

    pub fn log(&self) -> Vec<String> {
        self.script.lock().unwrap().log.clone()
    }

    fn run(&self, sql: &str, params: &[SqlParam]) -> Result<Option<i64>, SqlError> {
        let mut script = self.script.lock().unwrap();
        script.log.push(sql.to_string());
        let step = classify(sql);

        let injected = script
            .failures
            .get_mut(&step)
            .and_then(VecDeque::pop_front)
            .flatten();
        if let Some(err) = injected {
            match step {
                // A failed commit rolls the transaction back.
                Step::Commit => {
                    if let Some(rows) = script.snapshot.take() {
                        script.rows = rows;
                    }
                }
                // duplicate_table: another runner created it first.
                Step::Create if err.code() == "42P07" => script.table_exists = true,
                _ => {}
            }
            return Err(err);
        }

        let resource = |index: usize| match params.get(index) {
            Some(SqlParam::Text(name)) => name.clone(),
            other => panic!("Expected resource name parameter, got {other:?}"),
        };
        let state = |param: Option<&SqlParam>| match param {
            Some(SqlParam::BigInt(value)) => *value,
            Some(SqlParam::Bool(value)) => i64::from(*value),
            other => panic!("Expected state parameter, got {other:?}"),
        };

        match step {
            Step::Columns => Ok(None),
            Step::Create => {
                script.table_exists = true;
                Ok(Some(0))
            }
            Step::Drop => {
                script.table_exists = false;
                script.rows.clear();
                Ok(Some(0))
            }
            Step::Insert => {
                let name = resource(0);
                if script.rows.contains_key(&name) {
                    return Err(SqlError::new("23505", "duplicate key value"));
                }
                let value = state(params.get(1));
                script.rows.insert(name, value);
                Ok(Some(1))
            }
            Step::Begin => {
                script.snapshot = Some(script.rows.clone());
                Ok(Some(0))
            }
            Step::Commit => {
                script.snapshot = None;
                Ok(Some(0))
            }
            Step::Select => {
                let name = resource(0);
                script.selects += 1;
                if script.vanish_before_select > 0 {
                    script.vanish_before_select -= 1;
                    script.rows.remove(&name);
                }
                let selects = script.selects;
                if script.release_after_selects.is_some_and(|after| selects > after) {
                    script.release_after_selects = None;
                    script.rows.values_mut().for_each(|v| *v = 0);
                }
                Ok(script.rows.get(&name).copied())
            }
            Step::Update => {
                let value = state(params.first());
                let name = resource(1);
                match script.rows.get_mut(&name) {
                    Some(row) => {
                        *row = value;
                        Ok(Some(1))
                    }
                    None => Ok(Some(0)),
                }
            }
        }
    }
}

#[async_trait]
impl LockSession for ScriptedSession {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, SqlError> {
        let affected = self.run(sql, params)?.unwrap_or(0);
        Ok(u64::try_from(affected).unwrap_or(0))
    }

    async fn query_i64(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Option<i64>, SqlError> {
        self.run(sql, params)
    }

    async fn query_strings(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<String>, SqlError> {
        self.run(sql, params)?;
        let exists = self.script.lock().unwrap().table_exists;
        Ok(if exists {
            vec![
                "resource_name".to_string(),
                "lock_state".to_string(),
                "ts".to_string(),
            ]
        } else {
            Vec::new()
        })
    }

    async fn query_lock_rows(
        &mut self,
        _sql: &str,
        _params: &[SqlParam],
    ) -> Result<Vec<LockRow>, SqlError> {
        let script = self.script.lock().unwrap();
        let mut rows: Vec<LockRow> = script
            .rows
            .iter()
            .map(|(resource, state)| LockRow {
                resource: resource.clone(),
                state: *state,
                acquired_at: None,
            })
            .collect();
        rows.sort_by(|a, b| a.resource.cmp(&b.resource));
        Ok(rows)
    }
}
