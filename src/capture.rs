//! Change capture: recovering the rows a mutating statement touched.
//!
//! SQLite is driven here as if it could not return affected rows. Before the
//! statement runs, a TEMP scratch table shaped like the model's table and a
//! TEMP trigger feeding it are created; afterwards the scratch table is read
//! and both objects are dropped again.
//!
//! [`Armed`] owns that pair. Dropping it without calling [`Armed::disarm`]
//! still tears everything down, so no exit path leaks a trigger.

use tracing::warn;

use crate::cast::Row;
use crate::error::{Result, TroveError};
use crate::router::Session;
use crate::sql::{self, Select, Statement};

const PREFIX: &str = "trove_capture_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    Insert,
    Update,
    Delete,
}

impl CaptureEvent {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CaptureEvent::Insert => "insert",
            CaptureEvent::Update => "update",
            CaptureEvent::Delete => "delete",
        }
    }

    // deleted rows only exist as `old`
    fn row(&self) -> &'static str {
        match self {
            CaptureEvent::Delete => "old",
            _ => "new",
        }
    }
}

/// Name of the scratch table for `table`.
pub fn scratch_name(table: &str) -> String {
    format!("{PREFIX}{table}")
}

pub fn trigger_name(table: &str, event: CaptureEvent) -> String {
    format!("{PREFIX}{table}_{}", event.as_sql())
}

/// Capture objects currently present on the session's connection.
pub fn artifacts(session: &mut Session<'_>) -> Result<Vec<String>> {
    let statement = Statement::new(format!(
        "select name from sqlite_temp_master where name like '{PREFIX}%' order by name"
    ));
    Ok(session
        .query(&statement, true)?
        .into_iter()
        .filter_map(|row| row.into_iter().next().and_then(|(_, name)| name.as_text().map(str::to_owned)))
        .collect())
}

// ------------- Armed -------------
pub struct Armed<'s, 'c> {
    session: &'s mut Session<'c>,
    trigger: String,
    scratch: String,
    disarmed: bool,
}

impl<'s, 'c> Armed<'s, 'c> {
    /// Creates the scratch table and the trigger. On failure whatever part
    /// was created is dropped again and `CaptureSetup` is returned.
    pub fn arm(
        session: &'s mut Session<'c>,
        model: &str,
        table: &str,
        event: CaptureEvent,
        columns: &[String],
    ) -> Result<Self> {
        let armed = Armed {
            session,
            trigger: trigger_name(table, event),
            scratch: scratch_name(table),
            disarmed: false,
        };
        let setup = [
            sql::create_scratch(&armed.scratch, table),
            sql::create_capture_trigger(&armed.trigger, event.as_sql(), table, &armed.scratch, event.row(), columns),
        ];
        for statement in &setup {
            armed
                .session
                .run(statement, true)
                .map_err(|e| TroveError::CaptureSetup {
                    model: model.to_owned(),
                    message: e.to_string(),
                })?;
        }
        Ok(armed)
    }

    pub fn session(&mut self) -> &mut Session<'c> {
        self.session
    }

    /// Every row the trigger copied so far, in the order it fired.
    pub fn collect(&mut self) -> Result<Vec<Row>> {
        let statement = Select::table(&self.scratch).build();
        self.session.query(&statement, true)
    }

    pub fn disarm(mut self) -> Result<()> {
        self.disarmed = true;
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        // both drops are attempted, the first failure is reported
        let trigger = self.session.run(&sql::drop_trigger(&self.trigger), true);
        let scratch = self.session.run(&sql::drop_scratch(&self.scratch), true);
        trigger.and(scratch).map(|_| ())
    }
}

impl Drop for Armed<'_, '_> {
    fn drop(&mut self) {
        if !self.disarmed {
            if let Err(e) = self.teardown() {
                warn!(trigger = %self.trigger, scratch = %self.scratch, "capture teardown failed: {e}");
            }
        }
    }
}

// ------------- capture -------------
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captured {
    /// Change count reported by SQLite for the statement.
    pub affected: usize,
    pub rows: Vec<Row>,
}

/// Runs `statement` with change capture armed for `event` on `table`.
pub fn capture(
    session: &mut Session<'_>,
    model: &str,
    table: &str,
    event: CaptureEvent,
    columns: &[String],
    statement: &Statement,
) -> Result<Captured> {
    let mut armed = Armed::arm(session, model, table, event, columns)?;
    let affected = armed.session().run(statement, false)?;
    let rows = armed.collect()?;
    armed.disarm()?;
    Ok(Captured { affected, rows })
}
