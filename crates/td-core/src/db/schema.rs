//! SQLite schema for the `.todos/issues.db` store.
//!
//! - `issues` holds the current state of every issue, soft-deleted rows
//!   included (`deleted_at IS NOT NULL`)
//! - activity tables (`logs`, `handoffs`, `comments`) are append-mostly
//! - edge tables (`issue_files`, `issue_dependencies`, `work_session_issues`,
//!   `board_issue_positions`) use deterministic text ids
//! - `action_log` is the append-only audit trail backing undo and sync push
//! - `sync_*` tables carry replication cursors, history, conflicts and
//!   per-field clocks
//!
//! No foreign keys are declared between entity tables: replicated events may
//! arrive in any order and the merge layer repairs references itself.

/// Migration v1: issues, activity, links, work sessions, history and the
/// action log. Activity rows still use integer ids here.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS issues (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    acceptance TEXT NOT NULL DEFAULT '',
    type TEXT NOT NULL DEFAULT 'task'
        CHECK (type IN ('bug', 'feature', 'task', 'epic', 'chore')),
    status TEXT NOT NULL DEFAULT 'open'
        CHECK (status IN ('open', 'in_progress', 'blocked', 'in_review', 'closed')),
    priority TEXT NOT NULL DEFAULT 'P2'
        CHECK (priority IN ('P0', 'P1', 'P2', 'P3', 'P4')),
    points INTEGER NOT NULL DEFAULT 0,
    labels TEXT NOT NULL DEFAULT '',
    parent_id TEXT,
    creator_session TEXT,
    implementer_session TEXT,
    reviewer_session TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    closed_at TEXT,
    deleted_at TEXT,
    minor INTEGER NOT NULL DEFAULT 0 CHECK (minor IN (0, 1)),
    sprint TEXT NOT NULL DEFAULT '',
    created_branch TEXT NOT NULL DEFAULT '',
    defer_at TEXT,
    due_at TEXT,
    CHECK (parent_id IS NULL OR parent_id <> id)
);

CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    work_session_id TEXT,
    type TEXT NOT NULL DEFAULT 'progress',
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS handoffs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    done TEXT NOT NULL DEFAULT '[]',
    remaining TEXT NOT NULL DEFAULT '[]',
    decisions TEXT NOT NULL DEFAULT '[]',
    uncertain TEXT NOT NULL DEFAULT '[]',
    git_snapshot_id TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS issue_files (
    id TEXT PRIMARY KEY,
    issue_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'implementation'
        CHECK (role IN ('implementation', 'test', 'reference', 'config')),
    sha_at_link TEXT NOT NULL DEFAULT '',
    linked_at TEXT NOT NULL,
    UNIQUE (issue_id, file_path)
);

CREATE TABLE IF NOT EXISTS issue_dependencies (
    id TEXT PRIMARY KEY,
    blocked_id TEXT NOT NULL,
    blocker_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (blocked_id, blocker_id),
    CHECK (blocked_id <> blocker_id)
);

CREATE TABLE IF NOT EXISTS git_snapshots (
    id TEXT PRIMARY KEY,
    issue_id TEXT,
    commit_sha TEXT NOT NULL,
    branch TEXT NOT NULL DEFAULT '',
    dirty_files INTEGER NOT NULL DEFAULT 0,
    untracked_files INTEGER NOT NULL DEFAULT 0,
    captured_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS work_sessions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    session_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    active INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0, 1)),
    log_fanout TEXT NOT NULL DEFAULT 'tagged'
);

CREATE TABLE IF NOT EXISTS work_session_issues (
    id TEXT PRIMARY KEY,
    work_session_id TEXT NOT NULL,
    issue_id TEXT NOT NULL,
    tagged_at TEXT NOT NULL,
    UNIQUE (work_session_id, issue_id)
);

CREATE TABLE IF NOT EXISTS issue_session_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    action TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS action_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    previous_data TEXT,
    new_data TEXT,
    timestamp TEXT NOT NULL,
    undo_of INTEGER
);

CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority);
CREATE INDEX IF NOT EXISTS idx_issues_parent ON issues(parent_id);
CREATE INDEX IF NOT EXISTS idx_issues_updated ON issues(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_logs_issue ON logs(issue_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_handoffs_issue ON handoffs(issue_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id, created_at);
CREATE INDEX IF NOT EXISTS idx_deps_blocker ON issue_dependencies(blocker_id);
CREATE INDEX IF NOT EXISTS idx_files_path ON issue_files(file_path);
CREATE INDEX IF NOT EXISTS idx_history_issue ON issue_session_history(issue_id, session_id);
CREATE INDEX IF NOT EXISTS idx_action_log_session ON action_log(session_id, id DESC);
CREATE INDEX IF NOT EXISTS idx_action_log_undo ON action_log(undo_of);
";

/// Migration v2: rewrite integer primary keys of `logs`, `handoffs` and
/// `comments` to prefixed text ids, and carry the rewrite into the action log
/// so undo and sync still resolve the rows.
///
/// Every rewrite is guarded by `typeof(id) = 'integer'`, so re-running the
/// statements over already-migrated rows changes nothing.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE logs_v2 (
    id TEXT PRIMARY KEY,
    issue_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    work_session_id TEXT,
    type TEXT NOT NULL DEFAULT 'progress',
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
INSERT INTO logs_v2 (id, issue_id, session_id, work_session_id, type, message, timestamp)
SELECT CASE WHEN typeof(id) = 'integer' THEN 'lg-' || printf('%08x', id) ELSE id END,
       issue_id, session_id, work_session_id, type, message, timestamp
FROM logs;
DROP TABLE logs;
ALTER TABLE logs_v2 RENAME TO logs;
CREATE INDEX IF NOT EXISTS idx_logs_issue ON logs(issue_id, timestamp);

CREATE TABLE handoffs_v2 (
    id TEXT PRIMARY KEY,
    issue_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    done TEXT NOT NULL DEFAULT '[]',
    remaining TEXT NOT NULL DEFAULT '[]',
    decisions TEXT NOT NULL DEFAULT '[]',
    uncertain TEXT NOT NULL DEFAULT '[]',
    git_snapshot_id TEXT,
    timestamp TEXT NOT NULL
);
INSERT INTO handoffs_v2 (id, issue_id, session_id, done, remaining, decisions, uncertain,
                         git_snapshot_id, timestamp)
SELECT CASE WHEN typeof(id) = 'integer' THEN 'ho-' || printf('%08x', id) ELSE id END,
       issue_id, session_id, done, remaining, decisions, uncertain, git_snapshot_id, timestamp
FROM handoffs;
DROP TABLE handoffs;
ALTER TABLE handoffs_v2 RENAME TO handoffs;
CREATE INDEX IF NOT EXISTS idx_handoffs_issue ON handoffs(issue_id, timestamp);

CREATE TABLE comments_v2 (
    id TEXT PRIMARY KEY,
    issue_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    deleted_at TEXT
);
INSERT INTO comments_v2 (id, issue_id, session_id, text, created_at, deleted_at)
SELECT CASE WHEN typeof(id) = 'integer' THEN 'cm-' || printf('%08x', id) ELSE id END,
       issue_id, session_id, text, created_at, deleted_at
FROM comments;
DROP TABLE comments;
ALTER TABLE comments_v2 RENAME TO comments;
CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id, created_at);

UPDATE action_log
SET entity_id = CASE
        WHEN entity_type IN ('logs', 'log') THEN 'lg-'
        WHEN entity_type IN ('handoffs', 'handoff') THEN 'ho-'
        ELSE 'cm-'
    END || printf('%08x', CAST(entity_id AS INTEGER))
WHERE entity_type IN ('logs', 'log', 'handoffs', 'handoff', 'comments', 'comment')
  AND entity_id <> ''
  AND entity_id NOT GLOB '*[^0-9]*';

UPDATE action_log
SET previous_data = CASE
        WHEN previous_data IS NOT NULL AND json_valid(previous_data)
        THEN json_set(previous_data, '$.id', entity_id)
        ELSE previous_data
    END,
    new_data = CASE
        WHEN new_data IS NOT NULL AND json_valid(new_data)
        THEN json_set(new_data, '$.id', entity_id)
        ELSE new_data
    END
WHERE entity_type IN ('logs', 'log', 'handoffs', 'handoff', 'comments', 'comment');
";

/// Migration v3: boards, board positions and notes.
pub const MIGRATION_V3_SQL: &str = r"
CREATE TABLE IF NOT EXISTS boards (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    query TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_boards_name_live
    ON boards(name) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS board_issue_positions (
    id TEXT PRIMARY KEY,
    board_id TEXT NOT NULL,
    issue_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    UNIQUE (board_id, issue_id)
);

CREATE INDEX IF NOT EXISTS idx_positions_board ON board_issue_positions(board_id, position);

CREATE TABLE IF NOT EXISTS notes (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    pinned INTEGER NOT NULL DEFAULT 0 CHECK (pinned IN (0, 1)),
    archived INTEGER NOT NULL DEFAULT 0 CHECK (archived IN (0, 1)),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
";

/// Migration v4: replication state.
pub const MIGRATION_V4_SQL: &str = r"
CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    direction TEXT NOT NULL CHECK (direction IN ('push', 'pull')),
    action_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    server_seq INTEGER,
    device_id TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    field TEXT NOT NULL,
    local_value TEXT,
    remote_value TEXT,
    remote_device TEXT NOT NULL DEFAULT '',
    server_seq INTEGER,
    reason TEXT NOT NULL DEFAULT 'stale_remote',
    recorded_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS sync_field_clocks (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    field TEXT NOT NULL,
    ts TEXT NOT NULL,
    device_id TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id, field)
);

CREATE TABLE IF NOT EXISTS sync_applied (
    device_id TEXT NOT NULL,
    client_action_id INTEGER NOT NULL,
    server_seq INTEGER NOT NULL,
    applied_at TEXT NOT NULL,
    PRIMARY KEY (device_id, client_action_id)
);

CREATE TABLE IF NOT EXISTS sync_pending (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_seq INTEGER NOT NULL,
    device_id TEXT NOT NULL,
    client_action_id INTEGER NOT NULL,
    action_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    payload TEXT,
    client_timestamp TEXT NOT NULL,
    received_at TEXT NOT NULL,
    UNIQUE (device_id, client_action_id)
);

CREATE INDEX IF NOT EXISTS idx_sync_history_ts ON sync_history(id DESC);
CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity ON sync_conflicts(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_sync_pending_entity ON sync_pending(entity_type, entity_id);
";

/// Migration v5: group action-log rows written by one mutation under a
/// shared `batch_id` (the id of the batch's first row). Older rows keep
/// `NULL` and count as single-row batches.
pub const MIGRATION_V5_SQL: &str = r"
ALTER TABLE action_log ADD COLUMN batch_id INTEGER;
CREATE INDEX IF NOT EXISTS idx_action_log_batch ON action_log(session_id, batch_id);
";

/// Indexes expected after all migrations have run.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_issues_status",
    "idx_issues_priority",
    "idx_issues_parent",
    "idx_issues_updated",
    "idx_logs_issue",
    "idx_handoffs_issue",
    "idx_comments_issue",
    "idx_deps_blocker",
    "idx_files_path",
    "idx_history_issue",
    "idx_action_log_session",
    "idx_action_log_undo",
    "idx_boards_name_live",
    "idx_positions_board",
    "idx_sync_history_ts",
    "idx_sync_conflicts_entity",
    "idx_sync_pending_entity",
    "idx_action_log_batch",
];
