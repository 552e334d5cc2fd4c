//! PRD repository: opaque content with a linear version chain per document.

use super::StateStore;
use super::models::Prd;
use crate::errors::StoreError;
use crate::util;
use rusqlite::{Row, params};

const PRD_COLUMNS: &str =
    "id, workspace_id, content, version, parent_id, chain_id, change_summary, created_at";

fn map_prd_row(row: &Row) -> rusqlite::Result<Prd> {
    Ok(Prd {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        content: row.get(2)?,
        version: row.get(3)?,
        parent_id: row.get(4)?,
        chain_id: row.get(5)?,
        change_summary: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl StateStore {
    /// Add a new PRD, starting a fresh version chain at version 1.
    pub fn add_prd(&self, workspace_id: &str, content: &str) -> Result<Prd, StoreError> {
        let id = util::new_id();
        let chain_id = util::new_id();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO prds (id, workspace_id, content, version, chain_id, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5)",
                params![id, workspace_id, content, chain_id, util::now_iso()],
            )?;
            conn.query_row(
                &format!("SELECT {PRD_COLUMNS} FROM prds WHERE id = ?1"),
                params![id],
                map_prd_row,
            )
            .map_err(Into::into)
        })
    }

    /// Append a new version to an existing chain. The parent must be the
    /// chain head; versions form a linear history.
    pub fn add_prd_version(
        &self,
        parent_id: &str,
        content: &str,
        change_summary: &str,
    ) -> Result<Prd, StoreError> {
        let id = util::new_id();
        self.with_tx(move |tx| {
            let parent = tx
                .query_row(
                    &format!("SELECT {PRD_COLUMNS} FROM prds WHERE id = ?1"),
                    params![parent_id],
                    map_prd_row,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "prd",
                        id: parent_id.to_string(),
                    },
                    other => other.into(),
                })?;

            let head: i64 = tx.query_row(
                "SELECT MAX(version) FROM prds WHERE chain_id = ?1",
                params![parent.chain_id],
                |row| row.get(0),
            )?;
            if parent.version != head {
                return Err(StoreError::Integrity(format!(
                    "prd {parent_id} is not the chain head (v{} != v{head})",
                    parent.version
                )));
            }

            tx.execute(
                "INSERT INTO prds (id, workspace_id, content, version, parent_id, chain_id,
                                   change_summary, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    parent.workspace_id,
                    content,
                    parent.version + 1,
                    parent_id,
                    parent.chain_id,
                    change_summary,
                    util::now_iso()
                ],
            )?;
            tx.query_row(
                &format!("SELECT {PRD_COLUMNS} FROM prds WHERE id = ?1"),
                params![id],
                map_prd_row,
            )
            .map_err(Into::into)
        })
    }

    pub fn get_prd(&self, id: &str) -> Result<Prd, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {PRD_COLUMNS} FROM prds WHERE id = ?1"),
                params![id],
                map_prd_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                    entity: "prd",
                    id: id.to_string(),
                },
                other => other.into(),
            })
        })
    }

    /// Latest version of every chain in the workspace.
    pub fn list_prds(&self, workspace_id: &str) -> Result<Vec<Prd>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PRD_COLUMNS} FROM prds p
                 WHERE workspace_id = ?1
                   AND version = (SELECT MAX(version) FROM prds WHERE chain_id = p.chain_id)
                 ORDER BY created_at"
            ))?;
            let prds = stmt
                .query_map(params![workspace_id], map_prd_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(prds)
        })
    }

    /// All versions in the chain containing `id`, oldest first.
    pub fn prd_versions(&self, id: &str) -> Result<Vec<Prd>, StoreError> {
        let prd = self.get_prd(id)?;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PRD_COLUMNS} FROM prds WHERE chain_id = ?1 ORDER BY version"
            ))?;
            let prds = stmt
                .query_map(params![prd.chain_id], map_prd_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(prds)
        })
    }

    /// Latest PRD version in the workspace (by creation time across chains).
    pub fn latest_prd(&self, workspace_id: &str) -> Result<Option<Prd>, StoreError> {
        Ok(self.list_prds(workspace_id)?.into_iter().last())
    }

    /// Hard-delete a whole chain.
    pub fn delete_prd_chain(&self, id: &str) -> Result<(), StoreError> {
        let prd = self.get_prd(id)?;
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM prds WHERE chain_id = ?1", params![prd.chain_id])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (StateStore, String) {
        let store = StateStore::open_in_memory().unwrap();
        let ws = store.create_workspace("/repo").unwrap();
        (store, ws.id)
    }

    #[test]
    fn add_then_show_returns_equal_content() {
        let (store, ws) = fixture();
        let prd = store.add_prd(&ws, "Build a CLI that prints Hello").unwrap();
        let loaded = store.get_prd(&prd.id).unwrap();
        assert_eq!(loaded.content, "Build a CLI that prints Hello");
        assert_eq!(loaded.version, 1);
        assert!(loaded.parent_id.is_none());
    }

    #[test]
    fn versions_form_linear_history() {
        let (store, ws) = fixture();
        let v1 = store.add_prd(&ws, "v1").unwrap();
        let v2 = store.add_prd_version(&v1.id, "v2", "tighten scope").unwrap();
        let v3 = store.add_prd_version(&v2.id, "v3", "add auth").unwrap();

        assert_eq!(v2.chain_id, v1.chain_id);
        assert_eq!(v3.version, 3);
        assert_eq!(v3.parent_id.as_deref(), Some(v2.id.as_str()));

        let versions = store.prd_versions(&v1.id).unwrap();
        assert_eq!(
            versions.iter().map(|p| p.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        // Branching off a non-head version is refused.
        let err = store.add_prd_version(&v1.id, "fork", "no").unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }

    #[test]
    fn list_shows_chain_heads_only() {
        let (store, ws) = fixture();
        let a1 = store.add_prd(&ws, "a1").unwrap();
        store.add_prd_version(&a1.id, "a2", "rev").unwrap();
        store.add_prd(&ws, "b1").unwrap();

        let heads = store.list_prds(&ws).unwrap();
        assert_eq!(heads.len(), 2);
        assert!(heads.iter().any(|p| p.content == "a2"));
        assert!(heads.iter().any(|p| p.content == "b1"));
    }

    #[test]
    fn delete_removes_whole_chain() {
        let (store, ws) = fixture();
        let v1 = store.add_prd(&ws, "v1").unwrap();
        let v2 = store.add_prd_version(&v1.id, "v2", "rev").unwrap();
        store.delete_prd_chain(&v2.id).unwrap();
        assert!(matches!(
            store.get_prd(&v1.id).unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }
}
