/// Base history schema. Idempotent; run on every open.
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA foreign_keys=ON;

CREATE TABLE IF NOT EXISTS repositories (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    uri  TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS people (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL,
    email TEXT,
    UNIQUE (name, email)
);

CREATE TABLE IF NOT EXISTS scmlog (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    rev           TEXT NOT NULL,
    committer_id  INTEGER REFERENCES people(id),
    author_id     INTEGER REFERENCES people(id),
    date          INTEGER NOT NULL,
    message       TEXT,
    composed_rev  INTEGER NOT NULL DEFAULT 0,
    repository_id INTEGER NOT NULL REFERENCES repositories(id),
    UNIQUE (repository_id, rev)
);

CREATE TABLE IF NOT EXISTS files (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name     TEXT NOT NULL,
    repository_id INTEGER NOT NULL REFERENCES repositories(id)
);

CREATE TABLE IF NOT EXISTS file_links (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER NOT NULL,
    file_id   INTEGER NOT NULL REFERENCES files(id),
    commit_id INTEGER NOT NULL REFERENCES scmlog(id)
);

CREATE INDEX IF NOT EXISTS idx_file_links_file
    ON file_links (file_id, commit_id);

CREATE TABLE IF NOT EXISTS actions (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    type      TEXT NOT NULL,
    file_id   INTEGER NOT NULL REFERENCES files(id),
    commit_id INTEGER NOT NULL REFERENCES scmlog(id)
);

CREATE INDEX IF NOT EXISTS idx_actions_commit
    ON actions (commit_id);

CREATE INDEX IF NOT EXISTS idx_actions_file
    ON actions (file_id);
"#;

pub const FILE_TYPES_TABLE: &str = "file_types";

pub const FILE_TYPES_SQL: &str = r#"
CREATE TABLE file_types (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL UNIQUE REFERENCES files(id),
    type    TEXT NOT NULL
);
"#;

pub const BLAME_TABLE: &str = "blame";

pub const BLAME_SQL: &str = r#"
CREATE TABLE blame (
    id        INTEGER PRIMARY KEY NOT NULL,
    file_id   INTEGER REFERENCES files(id),
    commit_id INTEGER REFERENCES scmlog(id),
    author_id INTEGER REFERENCES people(id),
    n_lines   INTEGER
);

CREATE INDEX idx_blame_file_commit
    ON blame (file_id, commit_id);
"#;
