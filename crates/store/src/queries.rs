use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};

use blamemux_types::{
    ActionType, AuthorIndex, AuthorLines, BlameRecord, BlamemuxError, FileRevision, FileType,
    NewCommit, Ownership, ProcessedSet, RepoKind, RepoStats, RepositoryRecord, Result,
    RevisionCursor, SchemaStatus, Store,
};

use crate::schema::{BLAME_SQL, BLAME_TABLE, FILE_TYPES_SQL, FILE_TYPES_TABLE};
use crate::{create_stage_table, table_exists, SqliteStore};

/// Guards against link cycles when walking `file_links` to the root.
const MAX_PATH_DEPTH: usize = 256;

// ── Helpers ───────────────────────────────────────────────────────────────

fn row_to_repository(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepositoryRecord> {
    Ok(RepositoryRecord {
        id: row.get(0)?,
        uri: row.get(1)?,
        name: row.get(2)?,
        kind: RepoKind::parse(&row.get::<_, String>(3)?),
    })
}

fn count(conn: &Connection, sql: &str, repository_id: i64) -> Result<usize> {
    let n: i64 = conn.query_row(sql, params![repository_id], |r| r.get(0))?;
    Ok(n as usize)
}

/// Build `dir/sub/name` for every id in `names` by chasing `parents`.
fn build_paths(names: &HashMap<i64, String>, parents: &HashMap<i64, i64>) -> HashMap<i64, String> {
    let mut paths = HashMap::with_capacity(names.len());
    for (&id, name) in names {
        let mut parts = vec![name.as_str()];
        let mut current = id;
        for _ in 0..MAX_PATH_DEPTH {
            match parents.get(&current) {
                Some(&parent) if parent >= 0 => match names.get(&parent) {
                    Some(parent_name) => {
                        parts.push(parent_name.as_str());
                        current = parent;
                    }
                    None => break,
                },
                _ => break,
            }
        }
        parts.reverse();
        paths.insert(id, parts.join("/"));
    }
    paths
}

// ── impl Store ────────────────────────────────────────────────────────────

impl Store for SqliteStore {
    // ── Repositories ──────────────────────────────────────────────────────

    fn add_repository(&self, uri: &str, name: &str, kind: &RepoKind) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO repositories (uri, name, type) VALUES (?1, ?2, ?3)",
            params![uri, name, kind.as_str()],
        )?;
        let id = conn.query_row(
            "SELECT id FROM repositories WHERE uri = ?1",
            params![uri],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    fn repository_id(&self, uri: &str) -> Result<Option<i64>> {
        let conn = self.conn();
        let id = conn
            .query_row(
                "SELECT id FROM repositories WHERE uri = ?1",
                params![uri],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, uri, name, type FROM repositories ORDER BY id")?;
        let repos: rusqlite::Result<Vec<RepositoryRecord>> =
            stmt.query_map([], row_to_repository)?.collect();
        Ok(repos?)
    }

    // ── History writes ────────────────────────────────────────────────────

    fn add_person(&self, name: &str, email: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO people (name, email) VALUES (?1, ?2)",
            params![name, email],
        )?;
        let id = conn.query_row(
            "SELECT id FROM people WHERE name = ?1 AND email = ?2",
            params![name, email],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    fn commit_exists(&self, repository_id: i64, rev: &str) -> Result<bool> {
        let conn = self.conn();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scmlog WHERE repository_id = ?1 AND rev = ?2",
            params![repository_id, rev],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    fn add_commit(&self, commit: &NewCommit) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO scmlog
                (rev, committer_id, author_id, date, message, composed_rev, repository_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                commit.rev,
                commit.committer_id,
                commit.author_id,
                commit.date,
                commit.message,
                commit.composed_rev as i64,
                commit.repository_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn add_file(&self, repository_id: i64, file_name: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO files (file_name, repository_id) VALUES (?1, ?2)",
            params![file_name, repository_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn add_file_link(&self, parent_id: i64, file_id: i64, commit_id: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO file_links (parent_id, file_id, commit_id) VALUES (?1, ?2, ?3)",
            params![parent_id, file_id, commit_id],
        )?;
        Ok(())
    }

    fn add_action(&self, action: ActionType, file_id: i64, commit_id: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO actions (type, file_id, commit_id) VALUES (?1, ?2, ?3)",
            params![action.as_str(), file_id, commit_id],
        )?;
        Ok(())
    }

    fn discard_commit(&self, commit_id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let repository_id: Option<i64> = tx
            .query_row(
                "SELECT repository_id FROM scmlog WHERE id = ?1",
                params![commit_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(repository_id) = repository_id else {
            return Ok(());
        };
        tx.execute("DELETE FROM actions WHERE commit_id = ?1", params![commit_id])?;
        tx.execute("DELETE FROM file_links WHERE commit_id = ?1", params![commit_id])?;
        tx.execute(
            "DELETE FROM files
             WHERE repository_id = ?1
               AND id NOT IN (SELECT file_id FROM file_links)",
            params![repository_id],
        )?;
        tx.execute("DELETE FROM scmlog WHERE id = ?1", params![commit_id])?;
        tx.commit()?;
        Ok(())
    }

    fn current_paths(&self, repository_id: i64) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();

        let mut stmt = conn.prepare("SELECT id, file_name FROM files WHERE repository_id = ?1")?;
        let names: HashMap<i64, String> = stmt
            .query_map(params![repository_id], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        // Later links win.
        let mut stmt = conn.prepare(
            "SELECT fl.file_id, fl.parent_id FROM file_links fl
             JOIN files f ON f.id = fl.file_id
             WHERE f.repository_id = ?1
             ORDER BY fl.commit_id, fl.id",
        )?;
        let mut parents = HashMap::new();
        let mut rows = stmt.query(params![repository_id])?;
        while let Some(row) = rows.next()? {
            parents.insert(row.get::<_, i64>(0)?, row.get::<_, i64>(1)?);
        }

        let mut stmt = conn.prepare(
            "SELECT a.file_id, a.type FROM actions a
             JOIN files f ON f.id = a.file_id
             WHERE f.repository_id = ?1
             ORDER BY a.commit_id, a.id",
        )?;
        let mut last_action: HashMap<i64, String> = HashMap::new();
        let mut rows = stmt.query(params![repository_id])?;
        while let Some(row) = rows.next()? {
            last_action.insert(row.get(0)?, row.get(1)?);
        }

        let mut live: Vec<(String, i64)> = build_paths(&names, &parents)
            .into_iter()
            .filter(|(id, _)| last_action.get(id).map(String::as_str) != Some("D"))
            .map(|(id, path)| (path, id))
            .collect();
        live.sort();
        Ok(live)
    }

    // ── History reads ─────────────────────────────────────────────────────

    fn file_revisions(
        &self,
        repository_id: i64,
        after: Option<RevisionCursor>,
        limit: usize,
    ) -> Result<Vec<FileRevision>> {
        let conn = self.conn();
        let after = after.unwrap_or(RevisionCursor {
            date: i64::MIN,
            commit_id: i64::MIN,
            action_id: i64::MIN,
        });
        let mut stmt = conn.prepare(
            "SELECT a.id, s.id, a.file_id, s.rev, a.type, s.composed_rev, s.date
             FROM actions a
             JOIN scmlog s ON s.id = a.commit_id
             WHERE s.repository_id = ?1
               AND (s.date, s.id, a.id) > (?2, ?3, ?4)
             ORDER BY s.date, s.id, a.id
             LIMIT ?5",
        )?;
        let raw: Vec<(i64, i64, i64, String, String, i64, i64)> = stmt
            .query_map(
                params![
                    repository_id,
                    after.date,
                    after.commit_id,
                    after.action_id,
                    limit as i64
                ],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                        r.get(6)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<_>>()?;

        raw.into_iter()
            .map(|(action_id, commit_id, file_id, revision, action, composed, date)| {
                let action = ActionType::parse(&action).ok_or_else(|| {
                    BlamemuxError::Ingest(format!(
                        "unknown action type '{}' for action {}",
                        action, action_id
                    ))
                })?;
                Ok(FileRevision {
                    action_id,
                    commit_id,
                    file_id,
                    revision,
                    action,
                    composed: composed != 0,
                    date,
                })
            })
            .collect()
    }

    fn file_path(&self, file_id: i64, commit_id: i64) -> Result<String> {
        let conn = self.conn();
        let date: i64 = conn
            .query_row(
                "SELECT date FROM scmlog WHERE id = ?1",
                params![commit_id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| BlamemuxError::NotFound(format!("commit {}", commit_id)))?;

        let mut parts = Vec::new();
        let mut current = file_id;
        for _ in 0..MAX_PATH_DEPTH {
            let name: String = conn
                .query_row(
                    "SELECT file_name FROM files WHERE id = ?1",
                    params![current],
                    |r| r.get(0),
                )
                .optional()?
                .ok_or_else(|| BlamemuxError::NotFound(format!("file {}", current)))?;
            parts.push(name);

            let parent: Option<i64> = conn
                .query_row(
                    "SELECT fl.parent_id FROM file_links fl
                     JOIN scmlog s ON s.id = fl.commit_id
                     WHERE fl.file_id = ?1
                       AND (s.date < ?2 OR (s.date = ?2 AND s.id <= ?3))
                     ORDER BY s.date DESC, s.id DESC, fl.id DESC
                     LIMIT 1",
                    params![current, date, commit_id],
                    |r| r.get(0),
                )
                .optional()?;
            match parent {
                Some(p) if p >= 0 => current = p,
                _ => {
                    parts.reverse();
                    return Ok(parts.join("/"));
                }
            }
        }
        Err(BlamemuxError::Ingest(format!(
            "path of file {} @ commit {} is nested too deeply",
            file_id, commit_id
        )))
    }

    fn authors(&self) -> Result<AuthorIndex> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name FROM people ORDER BY id")?;
        let index = stmt
            .query_map([], |r| Ok((r.get::<_, String>(1)?, r.get::<_, i64>(0)?)))?
            .collect::<rusqlite::Result<AuthorIndex>>()?;
        Ok(index)
    }

    // ── FileTypes stage ───────────────────────────────────────────────────

    fn create_file_types_table(&self) -> Result<SchemaStatus> {
        let conn = self.conn();
        Ok(create_stage_table(&conn, FILE_TYPES_TABLE, FILE_TYPES_SQL)?)
    }

    fn unclassified_files(&self, repository_id: i64) -> Result<Vec<(i64, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT f.id, f.file_name FROM files f
             WHERE f.repository_id = ?1
               AND EXISTS (SELECT 1 FROM actions a WHERE a.file_id = f.id)
               AND NOT EXISTS (SELECT 1 FROM file_types ft WHERE ft.file_id = f.id)
             ORDER BY f.id",
        )?;
        let files: rusqlite::Result<Vec<(i64, String)>> = stmt
            .query_map(params![repository_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect();
        Ok(files?)
    }

    fn insert_file_types(&self, rows: &[(i64, FileType)]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO file_types (file_id, type) VALUES (?1, ?2)")?;
            for (file_id, file_type) in rows {
                stmt.execute(params![file_id, file_type.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn backout_file_types(&self, repository_id: i64) -> Result<usize> {
        let conn = self.conn();
        if !table_exists(&conn, FILE_TYPES_TABLE)? {
            return Ok(0);
        }
        let n = conn.execute(
            "DELETE FROM file_types
             WHERE file_id IN (SELECT id FROM files WHERE repository_id = ?1)",
            params![repository_id],
        )?;
        Ok(n)
    }

    fn code_files(&self, repository_id: i64) -> Result<HashSet<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT f.id FROM file_types ft
             JOIN files f ON f.id = ft.file_id
             WHERE ft.type IN ('code', 'unknown')
               AND f.repository_id = ?1",
        )?;
        let ids: rusqlite::Result<HashSet<i64>> =
            stmt.query_map(params![repository_id], |r| r.get(0))?.collect();
        Ok(ids?)
    }

    // ── Blame stage ───────────────────────────────────────────────────────

    fn create_blame_table(&self) -> Result<SchemaStatus> {
        let conn = self.conn();
        Ok(create_stage_table(&conn, BLAME_TABLE, BLAME_SQL)?)
    }

    fn next_blame_id(&self) -> Result<i64> {
        let conn = self.conn();
        let max_id: Option<i64> =
            conn.query_row("SELECT MAX(id) FROM blame", [], |r| r.get(0))?;
        Ok(max_id.map_or(1, |id| id + 1))
    }

    fn processed_pairs(&self, repository_id: i64) -> Result<ProcessedSet> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT b.file_id, b.commit_id FROM blame b
             JOIN files f ON b.file_id = f.id
             WHERE f.repository_id = ?1",
        )?;
        let pairs = stmt
            .query_map(params![repository_id], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<ProcessedSet>>()?;
        Ok(pairs)
    }

    fn insert_blame_batch(&self, rows: &[BlameRecord]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO blame (id, file_id, commit_id, author_id, n_lines)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.id,
                    row.file_id,
                    row.commit_id,
                    row.author_id,
                    row.n_lines
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn backout_blame(&self, repository_id: i64) -> Result<usize> {
        let conn = self.conn();
        if !table_exists(&conn, BLAME_TABLE)? {
            return Ok(0);
        }
        let n = conn.execute(
            "DELETE FROM blame
             WHERE commit_id IN (SELECT s.id FROM scmlog s WHERE s.repository_id = ?1)",
            params![repository_id],
        )?;
        Ok(n)
    }

    // ── Admin ─────────────────────────────────────────────────────────────

    fn repo_stats(&self, repository_id: i64) -> Result<RepoStats> {
        let conn = self.conn();
        let (uri, kind): (String, String) = conn
            .query_row(
                "SELECT uri, type FROM repositories WHERE id = ?1",
                params![repository_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| BlamemuxError::NotFound(format!("repository {}", repository_id)))?;

        let commit_count = count(
            &conn,
            "SELECT COUNT(*) FROM scmlog WHERE repository_id = ?1",
            repository_id,
        )?;
        let classified_files = if table_exists(&conn, FILE_TYPES_TABLE)? {
            count(
                &conn,
                "SELECT COUNT(*) FROM file_types ft JOIN files f ON f.id = ft.file_id
                 WHERE f.repository_id = ?1",
                repository_id,
            )?
        } else {
            0
        };
        let blame_rows = if table_exists(&conn, BLAME_TABLE)? {
            count(
                &conn,
                "SELECT COUNT(*) FROM blame b JOIN scmlog s ON s.id = b.commit_id
                 WHERE s.repository_id = ?1",
                repository_id,
            )?
        } else {
            0
        };

        Ok(RepoStats {
            uri,
            kind,
            commit_count,
            classified_files,
            blame_rows,
        })
    }

    fn owners(&self, file_id: i64) -> Result<Option<Ownership>> {
        let conn = self.conn();
        if !table_exists(&conn, BLAME_TABLE)? {
            return Ok(None);
        }
        let latest: Option<(i64, String)> = conn
            .query_row(
                "SELECT b.commit_id, s.rev FROM blame b
                 JOIN scmlog s ON s.id = b.commit_id
                 WHERE b.file_id = ?1
                 ORDER BY s.date DESC, s.id DESC
                 LIMIT 1",
                params![file_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((commit_id, rev)) = latest else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT p.name, b.n_lines FROM blame b
             JOIN people p ON p.id = b.author_id
             WHERE b.file_id = ?1 AND b.commit_id = ?2
             ORDER BY b.n_lines DESC, p.name",
        )?;
        let authors: rusqlite::Result<Vec<AuthorLines>> = stmt
            .query_map(params![file_id, commit_id], |r| {
                Ok(AuthorLines {
                    author: r.get(0)?,
                    n_lines: r.get(1)?,
                })
            })?
            .collect();

        Ok(Some(Ownership {
            file_id,
            commit_id,
            rev,
            authors: authors?,
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
