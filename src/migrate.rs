use log::{info, warn, Level};
use logging_timer::timer;
use rusqlite::{Connection, Statement};

use crate::error::VmSqlError;

/// Ordered column names of a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowShape {
    pub columns: Vec<String>,
}

impl RowShape {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        RowShape {
            columns: columns.iter().map(|c| c.as_ref().to_owned()).collect(),
        }
    }

    pub fn from_statement(stmt: &Statement<'_>) -> Self {
        Self::new(&stmt.column_names())
    }
}

/// Column lists for an `INSERT ... SELECT` between two tables.
///
/// `dest_columns[i]` receives `source_columns[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    pub dest_columns: Vec<String>,
    pub source_columns: Vec<String>,
}

impl CopyPlan {
    /// Whether any destination column differs from its source.
    pub fn renames(&self) -> bool {
        self.dest_columns != self.source_columns
    }

    pub fn insert_sql(&self, old_table: &str, new_table: &str) -> String {
        let join = |columns: &[String]| {
            columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            quote_identifier(new_table),
            join(&self.dest_columns),
            join(&self.source_columns),
            quote_identifier(old_table),
        )
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Map every column of `shape` to itself, except `old_name` which maps to
/// `new_name`. Column order is preserved.
pub fn plan_rename(shape: &RowShape, old_name: &str, new_name: &str) -> CopyPlan {
    let dest_columns = shape
        .columns
        .iter()
        .map(|c| {
            if c == old_name {
                new_name.to_owned()
            } else {
                c.clone()
            }
        })
        .collect();

    CopyPlan {
        dest_columns,
        source_columns: shape.columns.clone(),
    }
}

/// Copy all rows of `old_table` into the empty `new_table`, whose only
/// difference is that `old_name` is called `new_name`.
///
/// The column list is taken from a sampled row, so an empty source copies
/// nothing. Returns the number of rows copied.
pub fn copy_with_rename(
    conn: &Connection,
    old_table: &str,
    new_table: &str,
    old_name: &str,
    new_name: &str,
) -> Result<usize, VmSqlError> {
    let _tmr = timer!(Level::Debug; "copy_with_rename", "{} -> {}", old_table, new_table);

    let shape = {
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} LIMIT 1",
            quote_identifier(old_table)
        ))?;
        let shape = RowShape::from_statement(&stmt);

        let mut rows = stmt.query([])?;
        if rows.next()?.is_none() {
            info!("Table '{}' is empty, nothing to copy", old_table);
            return Ok(0);
        }
        shape
    };

    let plan = plan_rename(&shape, old_name, new_name);
    if !plan.renames() {
        warn!(
            "Column '{}' not found in '{}', copying columns unchanged",
            old_name, old_table
        );
    }

    let copied = conn.execute(&plan.insert_sql(old_table, new_table), [])?;
    info!(
        "Copied {} rows from '{}' to '{}' ({} -> {})",
        copied, old_table, new_table, old_name, new_name
    );

    Ok(copied)
}
