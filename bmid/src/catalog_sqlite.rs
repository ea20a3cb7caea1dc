// Copyright (c) 2023 Yan Ka, Chiu.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions, and the following disclaimer,
//    without modification, immediately at the beginning of the file.
// 2. The name of the author may not be used to endorse or promote products
//    derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
// ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
// ARE DISCLAIMED. IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE FOR
// ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
// OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
// HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
// LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
// OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
// SUCH DAMAGE.

//! `rusqlite`-backed [`Catalog`]. One connection behind a `Mutex`, the same
//! `perform`/`execute`/`query_row` trio the rest of this codebase's sqlite
//! wrappers use, plus schema bootstrap on open.

use bmi::catalog::{Catalog, ImageKind, Project};
use bmi::error::CatalogError;
use rusqlite::{Connection, OptionalExtension, Params, Row};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS project (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        provision_network TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS image (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        project_id INTEGER NOT NULL REFERENCES project(id),
        kind TEXT NOT NULL,
        parent_id INTEGER REFERENCES image(id),
        public_snapshot INTEGER NOT NULL DEFAULT 0,
        UNIQUE(project_id, name)
    );
";

fn kind_to_str(kind: ImageKind) -> &'static str {
    match kind {
        ImageKind::UserUpload => "user_upload",
        ImageKind::ProvisionClone => "provision_clone",
        ImageKind::Snapshot => "snapshot",
    }
}

fn kind_from_str(s: &str) -> ImageKind {
    match s {
        "provision_clone" => ImageKind::ProvisionClone,
        "snapshot" => ImageKind::Snapshot,
        _ => ImageKind::UserUpload,
    }
}

/// `SQLITE_CONSTRAINT_UNIQUE`; see sqlite3.h.
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;
/// `SQLITE_CONSTRAINT_FOREIGNKEY`; see sqlite3.h.
const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;

enum Constraint {
    Unique,
    ForeignKey,
}

fn classify(err: &rusqlite::Error) -> Option<Constraint> {
    match err {
        rusqlite::Error::SqliteFailure(ffi_err, _) => match ffi_err.extended_code {
            SQLITE_CONSTRAINT_UNIQUE => Some(Constraint::Unique),
            SQLITE_CONSTRAINT_FOREIGNKEY => Some(Constraint::ForeignKey),
            _ => None,
        },
        _ => None,
    }
}

fn to_catalog_error(context: &str, err: rusqlite::Error) -> CatalogError {
    match classify(&err) {
        Some(Constraint::Unique) => CatalogError::UniqueViolation(context.to_string()),
        Some(Constraint::ForeignKey) => CatalogError::FkViolation(context.to_string()),
        None => CatalogError::EngineError(err.into()),
    }
}

pub struct SqliteCatalog {
    db: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<SqliteCatalog> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteCatalog { db: Mutex::new(conn) })
    }

    /// In-memory database, used by this crate's own tests so they don't
    /// touch the filesystem.
    pub fn open_in_memory() -> rusqlite::Result<SqliteCatalog> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteCatalog { db: Mutex::new(conn) })
    }

    fn perform<F, T>(&self, func: F) -> T
    where
        F: FnOnce(&Connection) -> T,
    {
        let conn = self.db.lock().unwrap();
        func(&conn)
    }

    fn execute<P: Params>(&self, sql: &str, params: P) -> rusqlite::Result<usize> {
        let conn = self.db.lock().unwrap();
        conn.execute(sql, params)
    }

    fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> rusqlite::Result<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.db.lock().unwrap();
        conn.query_row(sql, params, f)
    }

}

impl Catalog for SqliteCatalog {
    fn insert_project(&self, name: &str, provision_network: &str) -> Result<i64, CatalogError> {
        self.execute(
            "INSERT INTO project (name, provision_network) VALUES (?1, ?2)",
            (name, provision_network),
        )
        .map_err(|e| to_catalog_error(name, e))?;
        Ok(self.db.lock().unwrap().last_insert_rowid())
    }

    fn delete_project_by_name(&self, name: &str) -> Result<(), CatalogError> {
        self.perform(|conn| -> Result<(), CatalogError> {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CatalogError::EngineError(e.into()))?;
            let project_id: Option<i64> = tx
                .query_row("SELECT id FROM project WHERE name = ?1", [name], |r| r.get(0))
                .optional()
                .map_err(|e| CatalogError::EngineError(e.into()))?;
            if let Some(project_id) = project_id {
                // Cascades to images at the application level; sqlite's
                // own foreign keys are opt-in and don't cascade deletes.
                tx.execute("DELETE FROM image WHERE project_id = ?1", [project_id])
                    .map_err(|e| CatalogError::EngineError(e.into()))?;
                tx.execute("DELETE FROM project WHERE id = ?1", [project_id])
                    .map_err(|e| CatalogError::EngineError(e.into()))?;
            }
            tx.commit().map_err(|e| CatalogError::EngineError(e.into()))?;
            Ok(())
        })
    }

    fn project_id_by_name(&self, name: &str) -> Option<i64> {
        self.query_row("SELECT id FROM project WHERE name = ?1", [name], |r| r.get(0))
            .optional()
            .unwrap_or(None)
    }

    fn project_by_id(&self, id: i64) -> Option<Project> {
        self.query_row(
            "SELECT id, name, provision_network FROM project WHERE id = ?1",
            [id],
            |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    provision_network: row.get(2)?,
                })
            },
        )
        .optional()
        .unwrap_or(None)
    }

    fn insert_image(
        &self,
        name: &str,
        project_id: i64,
        kind: ImageKind,
        parent_id: Option<i64>,
        public_snapshot: bool,
    ) -> Result<i64, CatalogError> {
        self.execute(
            "INSERT INTO image (name, project_id, kind, parent_id, public_snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                name,
                project_id,
                kind_to_str(kind),
                parent_id,
                public_snapshot as i64,
            ),
        )
        .map_err(|e| to_catalog_error(name, e))?;
        Ok(self.db.lock().unwrap().last_insert_rowid())
    }

    fn image_id_by_name_in_project(&self, name: &str, project_id: i64) -> Option<i64> {
        self.query_row(
            "SELECT id FROM image WHERE name = ?1 AND project_id = ?2",
            (name, project_id),
            |r| r.get(0),
        )
        .optional()
        .unwrap_or(None)
    }

    fn image_name_by_id(&self, id: i64) -> Option<String> {
        self.query_row("SELECT name FROM image WHERE id = ?1", [id], |r| r.get(0))
            .optional()
            .unwrap_or(None)
    }

    fn delete_image_by_name_in_project(&self, name: &str, project_id: i64) -> Result<(), CatalogError> {
        self.execute(
            "DELETE FROM image WHERE name = ?1 AND project_id = ?2",
            (name, project_id),
        )
        .map_err(|e| CatalogError::EngineError(e.into()))?;
        Ok(())
    }

    fn images_in_project(&self, project_id: i64) -> Result<Vec<String>, CatalogError> {
        self.perform(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM image WHERE project_id = ?1")
                .map_err(|e| CatalogError::EngineError(e.into()))?;
            let rows = stmt
                .query_map([project_id], |r| r.get::<_, String>(0))
                .map_err(|e| CatalogError::EngineError(e.into()))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CatalogError::EngineError(e.into()))
        })
    }

    fn snapshots_in_project(&self, project_id: i64) -> Result<Vec<String>, CatalogError> {
        self.perform(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM image WHERE project_id = ?1 AND kind = 'snapshot'")
                .map_err(|e| CatalogError::EngineError(e.into()))?;
            let rows = stmt
                .query_map([project_id], |r| r.get::<_, String>(0))
                .map_err(|e| CatalogError::EngineError(e.into()))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CatalogError::EngineError(e.into()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_project() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let id = catalog.insert_project("bmi_infra", "vlan/native").unwrap();
        assert_eq!(catalog.project_id_by_name("bmi_infra"), Some(id));
        let project = catalog.project_by_id(id).unwrap();
        assert_eq!(project.provision_network, "vlan/native");
    }

    #[test]
    fn duplicate_project_name_is_unique_violation() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.insert_project("bmi_infra", "vlan/native").unwrap();
        let err = catalog.insert_project("bmi_infra", "vlan/other").unwrap_err();
        assert!(matches!(err, CatalogError::UniqueViolation(_)));
    }

    #[test]
    fn insert_image_with_bogus_project_is_fk_violation() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let err = catalog
            .insert_image("x.img", 999, ImageKind::UserUpload, None, false)
            .unwrap_err();
        assert!(matches!(err, CatalogError::FkViolation(_)));
    }

    #[test]
    fn duplicate_image_name_in_project_is_unique_violation() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let pid = catalog.insert_project("bmi_infra", "vlan/native").unwrap();
        catalog
            .insert_image("hadoopMaster.img", pid, ImageKind::UserUpload, None, false)
            .unwrap();
        let err = catalog
            .insert_image("hadoopMaster.img", pid, ImageKind::UserUpload, None, false)
            .unwrap_err();
        assert!(matches!(err, CatalogError::UniqueViolation(_)));
    }

    #[test]
    fn delete_project_cascades_to_images() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let pid = catalog.insert_project("bmi_infra", "vlan/native").unwrap();
        catalog
            .insert_image("hadoopMaster.img", pid, ImageKind::UserUpload, None, false)
            .unwrap();
        catalog.delete_project_by_name("bmi_infra").unwrap();
        assert_eq!(catalog.project_id_by_name("bmi_infra"), None);
        assert_eq!(catalog.image_id_by_name_in_project("hadoopMaster.img", pid), None);
    }

    #[test]
    fn delete_project_by_name_is_idempotent() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.delete_project_by_name("does-not-exist").unwrap();
    }

    #[test]
    fn images_and_snapshots_in_project_filter_by_kind() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let pid = catalog.insert_project("bmi_infra", "vlan/native").unwrap();
        let parent = catalog
            .insert_image("hadoopMaster.img", pid, ImageKind::UserUpload, None, false)
            .unwrap();
        catalog
            .insert_image("blblb1", pid, ImageKind::Snapshot, Some(parent), false)
            .unwrap();
        let mut images = catalog.images_in_project(pid).unwrap();
        images.sort();
        assert_eq!(images, vec!["blblb1".to_string(), "hadoopMaster.img".to_string()]);
        assert_eq!(catalog.snapshots_in_project(pid).unwrap(), vec!["blblb1".to_string()]);
    }
}
