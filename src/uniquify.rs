use log::debug;
use rusqlite::{params, Connection};
use strum::{Display, EnumString};

use crate::error::VmSqlError;
use crate::timestamp;

/// Kinds of named resources the manager stores, one table per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ResourceType {
    Agent,
    Alert,
    Config,
    Filter,
    Group,
    LscCredential,
    Note,
    Override,
    Permission,
    PortList,
    Report,
    ReportFormat,
    Role,
    Schedule,
    Slave,
    Tag,
    Target,
    Task,
    User,
}

impl ResourceType {
    /// Parse a type tag. Unknown tags are a caller bug, never noisy data.
    pub fn from_tag(tag: &str) -> Result<Self, VmSqlError> {
        tag.parse()
            .map_err(|_| VmSqlError::InvalidArgument(format!("Invalid resource type: {}", tag)))
    }

    pub fn table(&self) -> String {
        format!("{}s", self)
    }

    pub fn trash_table(&self) -> String {
        format!("{}s_trash", self)
    }

    /// Character between a name and its uniquifying number. User names
    /// cannot contain spaces, so users get an underscore.
    pub fn separator(&self) -> char {
        match self {
            ResourceType::User => '_',
            _ => ' ',
        }
    }
}

/// A name to make unique, and who it will belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateName {
    pub proposed: String,
    pub suffix: String,
    pub owner: Option<i64>,
}

impl CandidateName {
    pub fn new(proposed: &str, suffix: &str, owner: Option<i64>) -> Self {
        CandidateName {
            proposed: proposed.to_owned(),
            suffix: suffix.to_owned(),
            owner,
        }
    }

    fn numbered(&self, separator: char, number: u64) -> String {
        format!("{}{}{}{}", self.proposed, self.suffix, separator, number)
    }
}

/// Answers whether a resource name is already taken.
pub trait NameRegistry {
    fn exists(
        &self,
        resource: ResourceType,
        name: &str,
        owner: Option<i64>,
    ) -> Result<bool, VmSqlError>;
}

/// Build the first of "{proposed}{suffix}{sep}1", "...2", ... that `exists`
/// reports as free.
///
/// The check and the caller's later insert are separate steps. Another
/// writer can take the same name in between unless the caller holds a
/// transaction strong enough to prevent it, or the table has a uniqueness
/// constraint to fall back on.
pub fn make_unique<F>(
    candidate: &CandidateName,
    resource: ResourceType,
    mut exists: F,
) -> Result<String, VmSqlError>
where
    F: FnMut(&str, Option<i64>) -> Result<bool, VmSqlError>,
{
    let separator = resource.separator();
    let mut number = 1u64;
    loop {
        let name = candidate.numbered(separator, number);
        if !exists(&name, candidate.owner)? {
            return Ok(name);
        }
        debug!("Name '{}' is taken, trying the next number", name);
        number += 1;
    }
}

/// `make_unique` against a `NameRegistry`.
pub fn make_unique_in(
    candidate: &CandidateName,
    resource: ResourceType,
    registry: &dyn NameRegistry,
) -> Result<String, VmSqlError> {
    make_unique(candidate, resource, |name, owner| {
        registry.exists(resource, name, owner)
    })
}

/// Checks names against the resource tables on a connection.
///
/// An owned name collides with names of the same owner and with unowned
/// names. An unowned name collides with every name.
pub struct TableRegistry<'a> {
    conn: &'a Connection,
}

impl<'a> TableRegistry<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        TableRegistry { conn }
    }
}

impl NameRegistry for TableRegistry<'_> {
    fn exists(
        &self,
        resource: ResourceType,
        name: &str,
        owner: Option<i64>,
    ) -> Result<bool, VmSqlError> {
        let table = resource.table();
        let count: i64 = match owner {
            Some(owner) => self.conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE name = ?1 AND ((owner IS NULL) OR (owner = ?2))",
                    table
                ),
                params![name, owner],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE name = ?1", table),
                params![name],
                |row| row.get(0),
            )?,
        };

        Ok(count > 0)
    }
}

/// Whether a resource row with `id` exists, in the live table or the trash.
pub fn resource_exists(
    conn: &Connection,
    resource: ResourceType,
    id: i64,
    in_trash: bool,
) -> Result<bool, VmSqlError> {
    if id == 0 {
        return Ok(false);
    }

    let table = if in_trash {
        resource.trash_table()
    } else {
        resource.table()
    };

    let exists: bool = conn.query_row(
        &format!("SELECT EXISTS (SELECT 1 FROM {} WHERE id = ?)", table),
        [id],
        |row| row.get(0),
    )?;

    Ok(exists)
}

/// Display name of the resource with UUID `uuid`, or `None` if no such row.
///
/// Notes and overrides are named after the NVT they annotate and reports
/// after their date, since none of those tables has a name column.
pub fn resource_name(
    conn: &Connection,
    resource: ResourceType,
    uuid: &str,
    in_trash: bool,
) -> Result<Option<String>, VmSqlError> {
    let table = if in_trash {
        resource.trash_table()
    } else {
        resource.table()
    };

    let sql = match resource {
        ResourceType::Note | ResourceType::Override => format!(
            "SELECT '{} for: ' || coalesce((SELECT name FROM nvts WHERE nvts.oid = {}.nvt), '')
             FROM {} WHERE uuid = ?1",
            if resource == ResourceType::Note {
                "Note"
            } else {
                "Override"
            },
            table,
            table
        ),
        ResourceType::Report => format!("SELECT date FROM {} WHERE uuid = ?1", table),
        _ => format!("SELECT name FROM {} WHERE uuid = ?1", table),
    };

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([uuid])?;
    let row = match rows.next()? {
        Some(row) => row,
        None => return Ok(None),
    };

    let name = if resource == ResourceType::Report {
        row.get::<_, Option<i64>>(0)?
            .and_then(timestamp::iso_time)
    } else {
        row.get::<_, Option<String>>(0)?
    };

    Ok(Some(name.unwrap_or_default()))
}
