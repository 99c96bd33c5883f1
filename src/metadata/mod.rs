pub(crate) mod savepoint;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::{ContainerError, Result};
use savepoint::{SavepointCounter, SavepointGuard};

/// `type` column codes (§6). `Unknown` is never persisted.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(i64)]
pub enum ElementType {
    Folder = 1,
    File = 2,
    SymLink = 3,
    DirectLink = 4,
}

impl ElementType {
    fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Folder),
            2 => Ok(Self::File),
            3 => Ok(Self::SymLink),
            4 => Ok(Self::DirectLink),
            _ => Err(ContainerError::IsDamaged),
        }
    }
}

/// A row of `FileSystem`. The `specific_data` column is an addition to the
/// column set named in the distilled schema — see DESIGN.md — needed to
/// persist SymLink targets and DirectLink ids across reopen; the seven
/// originally-named columns keep their order and types unchanged.
#[derive(Debug, Clone)]
pub(crate) struct ElementRow {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub element_type: ElementType,
    pub created: i64,
    pub modified: i64,
    pub meta: String,
    pub specific_data: String,
}

/// A row of `FileStreams`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamRow {
    pub id: i64,
    pub file_id: i64,
    pub stream_order: i64,
    pub start: i64,
    pub size: i64,
    pub used: i64,
}

/// Typed, savepoint-capable access over the three logical tables (§4.1).
pub(crate) struct MetadataStore {
    conn: Connection,
    savepoints: Mutex<SavepointCounter>,
}

const SCHEMA_TABLES: [&str; 3] = ["Sets", "FileSystem", "FileStreams"];

/// Expected column name for each table in `SCHEMA_TABLES`, same order.
/// `FileSystem`'s `specific_data` is this crate's own addition to the
/// distilled schema (see DESIGN.md) so it's checked for like any other
/// required column.
const SCHEMA_COLUMNS: [&[&str]; 3] = [
    &["id", "storage_data_size", "storage_data"],
    &["id", "parent_id", "name", "type", "created", "modified", "meta", "specific_data"],
    &["id", "file_id", "stream_order", "start", "size", "used"],
];

impl MetadataStore {
    pub(crate) fn open(path: &Path, create: bool) -> Result<Self> {
        if create && path.exists() {
            return Err(ContainerError::AlreadyExists);
        }
        if !create && !path.exists() {
            return Err(ContainerError::NotFound);
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_PRIVATE_CACHE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch("PRAGMA auto_vacuum = FULL;")?;

        let store = Self { conn, savepoints: Mutex::new(SavepointCounter::default()) };
        if create {
            store.create_schema()?;
        } else {
            store.validate_schema()?;
        }
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE Sets(id INTEGER PRIMARY KEY NOT NULL, storage_data_size INTEGER, storage_data BLOB);
             CREATE TABLE FileSystem(id INTEGER PRIMARY KEY NOT NULL, parent_id INTEGER, name TEXT, \
                type INTEGER, created INTEGER, modified INTEGER, meta TEXT, specific_data TEXT);
             CREATE TABLE FileStreams(id INTEGER PRIMARY KEY NOT NULL, file_id INTEGER NOT NULL, \
                stream_order INTEGER, start INTEGER, size INTEGER, used INTEGER);",
        )?;
        Ok(())
    }

    /// The schema validation hook (§9 Open Question #1): checks the three
    /// tables exist with their expected columns. Preserved permissive on
    /// extra columns/tables for data-compatibility, unlike the source's
    /// stub-true `CheckDBValidy`.
    fn validate_schema(&self) -> Result<()> {
        for (table, expected_columns) in SCHEMA_TABLES.iter().zip(SCHEMA_COLUMNS.iter()) {
            let count: i64 = self
                .conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1;",
                    params![table],
                    |row| row.get(0),
                )
                .map_err(ContainerError::from)?;
            if count == 0 {
                return Err(ContainerError::IsDamaged);
            }

            let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
            let actual_columns: std::collections::HashSet<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))
                .map_err(ContainerError::from)?
                .collect::<rusqlite::Result<_>>()
                .map_err(ContainerError::from)?;

            for column in *expected_columns {
                if !actual_columns.contains(*column) {
                    return Err(ContainerError::IsDamaged);
                }
            }
        }
        tracing::debug!("schema validation passed");
        Ok(())
    }

    pub(crate) fn clear(&self) -> Result<()> {
        self.conn.execute_batch(
            "DROP TABLE Sets; DROP TABLE FileSystem; DROP TABLE FileStreams; VACUUM;",
        )?;
        self.create_schema()
    }

    pub(crate) fn begin_savepoint(&self) -> Result<SavepointGuard<'_>> {
        let name = self.savepoints.lock().unwrap().next_name();
        SavepointGuard::begin(&self.conn, name).map_err(ContainerError::from)
    }

    // --- Settings -------------------------------------------------------

    pub(crate) fn get_settings(&self) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row("SELECT storage_data FROM Sets WHERE id = 1;", [], |row| row.get(0))
            .optional()
            .map_err(ContainerError::from)
    }

    pub(crate) fn set_settings(&self, data: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO Sets(id, storage_data_size, storage_data) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET storage_data_size = excluded.storage_data_size, \
                storage_data = excluded.storage_data;",
            params![data.len() as i64, data],
        )?;
        Ok(())
    }

    // --- FileSystem -------------------------------------------------------

    pub(crate) fn insert_root(&self, now: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO FileSystem(id, parent_id, name, type, created, modified, meta, specific_data) \
             VALUES (1, 0, '/', ?1, ?2, ?2, '', '');",
            params![ElementType::Folder as i64, now],
        )?;
        Ok(())
    }

    pub(crate) fn get_element(&self, id: i64) -> Result<ElementRow> {
        self.conn
            .query_row(
                "SELECT id, parent_id, name, type, created, modified, meta, specific_data \
                 FROM FileSystem WHERE id = ?1;",
                params![id],
                Self::map_element_row,
            )
            .optional()?
            .ok_or(ContainerError::NotFound)
    }

    pub(crate) fn find_child(&self, parent_id: i64, name: &str) -> Result<Option<ElementRow>> {
        let mut rows: Vec<ElementRow> = self
            .conn
            .prepare(
                "SELECT id, parent_id, name, type, created, modified, meta, specific_data \
                 FROM FileSystem WHERE parent_id = ?1 AND name = ?2;",
            )?
            .query_map(params![parent_id, name], Self::map_element_row)?
            .collect::<rusqlite::Result<_>>()?;

        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(rows.remove(0))),
            _ => Err(ContainerError::IsDamaged),
        }
    }

    pub(crate) fn children(&self, parent_id: i64) -> Result<Vec<ElementRow>> {
        let rows = self
            .conn
            .prepare(
                "SELECT id, parent_id, name, type, created, modified, meta, specific_data \
                 FROM FileSystem WHERE parent_id = ?1 ORDER BY name;",
            )?
            .query_map(params![parent_id], Self::map_element_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    pub(crate) fn has_children(&self, parent_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM FileSystem WHERE parent_id = ?1;",
            params![parent_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert_element(
        &self,
        parent_id: i64,
        name: &str,
        element_type: ElementType,
        now: i64,
        meta: &str,
        specific_data: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO FileSystem(parent_id, name, type, created, modified, meta, specific_data) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6);",
            params![parent_id, name, element_type as i64, now, meta, specific_data],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn update_parent(&self, id: i64, new_parent_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE FileSystem SET parent_id = ?2 WHERE id = ?1;",
            params![id, new_parent_id],
        )?;
        Ok(())
    }

    pub(crate) fn update_name(&self, id: i64, new_name: &str) -> Result<()> {
        self.conn.execute("UPDATE FileSystem SET name = ?2 WHERE id = ?1;", params![id, new_name])?;
        Ok(())
    }

    pub(crate) fn update_meta(&self, id: i64, meta: &str, now: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE FileSystem SET meta = ?2, modified = ?3 WHERE id = ?1;",
            params![id, meta, now],
        )?;
        Ok(())
    }

    pub(crate) fn touch_modified(&self, id: i64, now: i64) -> Result<()> {
        self.conn.execute("UPDATE FileSystem SET modified = ?2 WHERE id = ?1;", params![id, now])?;
        Ok(())
    }

    pub(crate) fn delete_element(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM FileSystem WHERE id = ?1;", params![id])?;
        Ok(())
    }

    fn map_element_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ElementRow> {
        let type_code: i64 = row.get(3)?;
        let element_type = ElementType::from_code(type_code)
            .map_err(|_| rusqlite::Error::InvalidColumnType(3, "type".into(), rusqlite::types::Type::Integer))?;
        Ok(ElementRow {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            name: row.get(2)?,
            element_type,
            created: row.get(4)?,
            modified: row.get(5)?,
            meta: row.get(6)?,
            specific_data: row.get(7)?,
        })
    }

    // --- FileStreams ------------------------------------------------------

    pub(crate) fn streams_for_file(&self, file_id: i64) -> Result<Vec<StreamRow>> {
        let rows = self
            .conn
            .prepare(
                "SELECT id, file_id, stream_order, start, size, used FROM FileStreams \
                 WHERE file_id = ?1 ORDER BY stream_order, id;",
            )?
            .query_map(params![file_id], Self::map_stream_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Free streams across the whole container, ordered by descending size
    /// (ties by ascending id) — the order allocation adopts them in (§4.4).
    pub(crate) fn free_streams(&self) -> Result<Vec<StreamRow>> {
        let rows = self
            .conn
            .prepare(
                "SELECT id, file_id, stream_order, start, size, used FROM FileStreams \
                 WHERE used = 0 ORDER BY size DESC, id ASC;",
            )?
            .query_map([], Self::map_stream_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    pub(crate) fn max_stream_order(&self, file_id: i64) -> Result<i64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT max(stream_order) FROM FileStreams WHERE file_id = ?1;",
            params![file_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(-1))
    }

    pub(crate) fn insert_stream(
        &self,
        file_id: i64,
        stream_order: i64,
        start: u64,
        size: u64,
        used: u64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO FileStreams(file_id, stream_order, start, size, used) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![file_id, stream_order, start as i64, size as i64, used as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn adopt_stream(&self, id: i64, new_file_id: i64, new_stream_order: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE FileStreams SET file_id = ?2, stream_order = ?3, used = 0 WHERE id = ?1;",
            params![id, new_file_id, new_stream_order],
        )?;
        Ok(())
    }

    pub(crate) fn update_stream_used(&self, id: i64, used: u64) -> Result<()> {
        self.conn.execute("UPDATE FileStreams SET used = ?2 WHERE id = ?1;", params![id, used as i64])?;
        Ok(())
    }

    /// Marks a stream unowned (§4.3 remove policy): `used = 0` is sufficient,
    /// since [`Self::free_streams`] selects on `used` alone and ignores which
    /// file a free stream's `file_id` still happens to point at.
    pub(crate) fn free_stream(&self, id: i64) -> Result<()> {
        self.update_stream_used(id, 0)
    }

    fn map_stream_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StreamRow> {
        Ok(StreamRow {
            id: row.get(0)?,
            file_id: row.get(1)?,
            stream_order: row.get(2)?,
            start: row.get(3)?,
            size: row.get(4)?,
            used: row.get(5)?,
        })
    }
}
