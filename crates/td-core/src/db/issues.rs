//! Issue rows: mapping, point reads, filtered lists and tree walks.

use crate::error::{Result, TdError, not_found_on_empty};
use crate::model::{Issue, IssueType, Priority, Status};
use crate::time;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter, types::ToSql};
use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// Bound on parent/child walks. Deeper trees are treated as corrupt.
pub const MAX_TREE_DEPTH: usize = 100;

/// Column list for `SELECT ... FROM issues i`.
pub const SELECT_COLUMNS: &str = "i.id, i.title, i.description, i.acceptance, i.type, \
     i.status, i.priority, i.points, i.labels, i.parent_id, i.creator_session, \
     i.implementer_session, i.reviewer_session, i.created_at, i.updated_at, i.closed_at, \
     i.deleted_at, i.minor, i.sprint, i.created_branch, i.defer_at, i.due_at";

fn parse_column<T: FromStr>(row: &Row<'_>, name: &str) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(name)?;
    raw.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })
}

/// Labels are stored sorted and comma-joined.
#[must_use]
pub fn labels_to_db(labels: &[String]) -> String {
    labels.join(",")
}

#[must_use]
pub fn labels_from_db(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Map a row selected with [`SELECT_COLUMNS`].
///
/// # Errors
///
/// Returns an error when a column holds a value outside its domain.
pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let labels: String = row.get("labels")?;
    let points: i64 = row.get("points")?;
    Ok(Issue {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        acceptance: row.get("acceptance")?,
        issue_type: parse_column::<IssueType>(row, "type")?,
        status: parse_column::<Status>(row, "status")?,
        priority: parse_column::<Priority>(row, "priority")?,
        points: u8::try_from(points).unwrap_or(0),
        labels: labels_from_db(&labels),
        parent_id: row.get("parent_id")?,
        creator_session: row.get("creator_session")?,
        implementer_session: row.get("implementer_session")?,
        reviewer_session: row.get("reviewer_session")?,
        created_at: time::column(row, "created_at")?,
        updated_at: time::column(row, "updated_at")?,
        closed_at: time::opt_column(row, "closed_at")?,
        deleted_at: time::opt_column(row, "deleted_at")?,
        minor: row.get("minor")?,
        sprint: row.get("sprint")?,
        created_branch: row.get("created_branch")?,
        defer_at: time::opt_column(row, "defer_at")?,
        due_at: time::opt_column(row, "due_at")?,
    })
}

/// Load an issue including soft-deleted rows.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find(conn: &Connection, id: &str) -> Result<Option<Issue>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM issues i WHERE i.id = ?1");
    Ok(conn.query_row(&sql, [id], from_row).optional()?)
}

/// Load a live (not soft-deleted) issue.
///
/// # Errors
///
/// Returns `not_found` when the id is unknown or soft-deleted.
pub fn get(conn: &Connection, id: &str) -> Result<Issue> {
    let sql =
        format!("SELECT {SELECT_COLUMNS} FROM issues i WHERE i.id = ?1 AND i.deleted_at IS NULL");
    not_found_on_empty(conn.query_row(&sql, [id], from_row), "issue", id)
}

/// Load an issue whether or not it is soft-deleted.
///
/// # Errors
///
/// Returns `not_found` when the id is unknown.
pub fn get_any(conn: &Connection, id: &str) -> Result<Issue> {
    find(conn, id)?.ok_or_else(|| TdError::not_found("issue", id))
}

/// Whether any row (live or deleted) uses `id`.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn id_taken(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM issues WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )?)
}

/// Insert or replace the full row for `issue`.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert(conn: &Connection, issue: &Issue) -> Result<()> {
    conn.execute(
        "INSERT INTO issues (id, title, description, acceptance, type, status, priority, points,
             labels, parent_id, creator_session, implementer_session, reviewer_session,
             created_at, updated_at, closed_at, deleted_at, minor, sprint, created_branch,
             defer_at, due_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
             ?18, ?19, ?20, ?21, ?22)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             description = excluded.description,
             acceptance = excluded.acceptance,
             type = excluded.type,
             status = excluded.status,
             priority = excluded.priority,
             points = excluded.points,
             labels = excluded.labels,
             parent_id = excluded.parent_id,
             creator_session = excluded.creator_session,
             implementer_session = excluded.implementer_session,
             reviewer_session = excluded.reviewer_session,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             closed_at = excluded.closed_at,
             deleted_at = excluded.deleted_at,
             minor = excluded.minor,
             sprint = excluded.sprint,
             created_branch = excluded.created_branch,
             defer_at = excluded.defer_at,
             due_at = excluded.due_at",
        params![
            issue.id,
            issue.title,
            issue.description,
            issue.acceptance,
            issue.issue_type.as_str(),
            issue.status.as_str(),
            issue.priority.as_str(),
            i64::from(issue.points),
            labels_to_db(&issue.labels),
            issue.parent_id,
            issue.creator_session,
            issue.implementer_session,
            issue.reviewer_session,
            time::to_db(&issue.created_at),
            time::to_db(&issue.updated_at),
            time::opt_to_db(issue.closed_at.as_ref()),
            time::opt_to_db(issue.deleted_at.as_ref()),
            issue.minor,
            issue.sprint,
            issue.created_branch,
            time::opt_to_db(issue.defer_at.as_ref()),
            time::opt_to_db(issue.due_at.as_ref()),
        ],
    )?;
    Ok(())
}

/// Remove the row outright. Only undo-of-create-by-sync and tests use this;
/// user deletes are soft.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn hard_delete(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM issues WHERE id = ?1", [id])?;
    Ok(())
}

/// Sortable issue fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Priority,
    Created,
    Updated,
    Closed,
    Due,
    Title,
    Status,
    Points,
    Id,
}

impl SortField {
    pub const ALL: [Self; 9] = [
        Self::Priority,
        Self::Created,
        Self::Updated,
        Self::Closed,
        Self::Due,
        Self::Title,
        Self::Status,
        Self::Points,
        Self::Id,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Closed => "closed",
            Self::Due => "due",
            Self::Title => "title",
            Self::Status => "status",
            Self::Points => "points",
            Self::Id => "id",
        }
    }

    const fn column(self) -> &'static str {
        match self {
            Self::Priority => "i.priority",
            Self::Created => "i.created_at",
            Self::Updated => "i.updated_at",
            Self::Closed => "i.closed_at",
            Self::Due => "i.due_at",
            Self::Title => "i.title",
            Self::Status => "i.status",
            Self::Points => "i.points",
            Self::Id => "i.id",
        }
    }
}

impl FromStr for SortField {
    type Err = TdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" | "pri" => Ok(Self::Priority),
            "created" | "created_at" => Ok(Self::Created),
            "updated" | "updated_at" => Ok(Self::Updated),
            "closed" | "closed_at" => Ok(Self::Closed),
            "due" | "due_at" => Ok(Self::Due),
            "title" => Ok(Self::Title),
            "status" => Ok(Self::Status),
            "points" => Ok(Self::Points),
            "id" => Ok(Self::Id),
            other => Err(TdError::invalid(format!(
                "unknown sort field '{other}': expected one of priority, created, updated, \
                 closed, due, title, status, points, id"
            ))),
        }
    }
}

/// A sort key with direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IssueSort {
    pub field: SortField,
    pub descending: bool,
}

impl IssueSort {
    #[must_use]
    pub const fn asc(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    #[must_use]
    pub const fn desc(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    /// `ORDER BY` clause, with `id` as a stable tie-breaker.
    #[must_use]
    pub fn sql_clause(self) -> String {
        let dir = if self.descending { "DESC" } else { "ASC" };
        match self.field {
            SortField::Id => format!("ORDER BY i.id {dir}"),
            SortField::Priority => {
                format!("ORDER BY i.priority {dir}, i.updated_at DESC, i.id ASC")
            }
            field => format!("ORDER BY {} {dir}, i.id ASC", field.column()),
        }
    }

    /// In-memory comparator equivalent to [`IssueSort::sql_clause`].
    #[must_use]
    pub fn compare(self, a: &Issue, b: &Issue) -> std::cmp::Ordering {
        let primary = match self.field {
            SortField::Priority => a.priority.cmp(&b.priority),
            SortField::Created => a.created_at.cmp(&b.created_at),
            SortField::Updated => a.updated_at.cmp(&b.updated_at),
            SortField::Closed => a.closed_at.cmp(&b.closed_at),
            SortField::Due => a.due_at.cmp(&b.due_at),
            SortField::Title => a.title.cmp(&b.title),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
            SortField::Points => a.points.cmp(&b.points),
            SortField::Id => a.id.cmp(&b.id),
        };
        let primary = if self.descending {
            primary.reverse()
        } else {
            primary
        };
        let secondary = if self.field == SortField::Priority {
            b.updated_at.cmp(&a.updated_at)
        } else {
            std::cmp::Ordering::Equal
        };
        primary.then(secondary).then_with(|| a.id.cmp(&b.id))
    }
}

impl Default for IssueSort {
    fn default() -> Self {
        Self::asc(SortField::Priority)
    }
}

impl fmt::Display for IssueSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            f.write_char('-')?;
        }
        f.write_str(self.field.as_str())
    }
}

impl FromStr for IssueSort {
    type Err = TdError;

    /// `created`, `-created`, `+priority`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('-') {
            Ok(Self::desc(rest.parse()?))
        } else {
            Ok(Self::asc(s.strip_prefix('+').unwrap_or(s).parse()?))
        }
    }
}

/// Filter used by `list` and context builders.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub statuses: Vec<Status>,
    pub issue_type: Option<IssueType>,
    pub priority: Option<Priority>,
    pub label: Option<String>,
    pub parent_id: Option<String>,
    pub include_deleted: bool,
    pub only_deleted: bool,
    pub sort: IssueSort,
    pub limit: Option<usize>,
}

/// Run `SELECT ... FROM issues i WHERE <where_sql> <order> LIMIT n`.
///
/// `where_sql` uses positional `?` placeholders matched by `params`.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn select_where(
    conn: &Connection,
    where_sql: &str,
    params: &[Box<dyn ToSql>],
    sort: IssueSort,
    limit: Option<usize>,
) -> Result<Vec<Issue>> {
    let mut sql = format!("SELECT {SELECT_COLUMNS} FROM issues i");
    if !where_sql.trim().is_empty() {
        let _ = write!(sql, " WHERE {where_sql}");
    }
    let _ = write!(sql, " {}", sort.sql_clause());
    if let Some(limit) = limit {
        let _ = write!(sql, " LIMIT {limit}");
    }
    tracing::debug!(%sql, params = params.len(), "select issues");
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
    let rows = stmt.query_map(params_from_iter(params_ref), from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// List issues matching `filter`.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn list(conn: &Connection, filter: &IssueFilter) -> Result<Vec<Issue>> {
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if filter.only_deleted {
        conditions.push("i.deleted_at IS NOT NULL".to_string());
    } else if !filter.include_deleted {
        conditions.push("i.deleted_at IS NULL".to_string());
    }
    if !filter.statuses.is_empty() {
        conditions.push(format!(
            "i.status IN ({})",
            super::placeholders(filter.statuses.len())
        ));
        for status in &filter.statuses {
            values.push(Box::new(status.as_str()));
        }
    }
    if let Some(kind) = filter.issue_type {
        conditions.push("i.type = ?".to_string());
        values.push(Box::new(kind.as_str()));
    }
    if let Some(priority) = filter.priority {
        conditions.push("i.priority = ?".to_string());
        values.push(Box::new(priority.as_str()));
    }
    if let Some(label) = &filter.label {
        conditions.push("(',' || i.labels || ',') LIKE ?".to_string());
        values.push(Box::new(format!("%,{},%", label.to_ascii_lowercase())));
    }
    if let Some(parent) = &filter.parent_id {
        conditions.push("i.parent_id = ?".to_string());
        values.push(Box::new(parent.clone()));
    }

    select_where(conn, &conditions.join(" AND "), &values, filter.sort, filter.limit)
}

/// Direct live children of `parent_id`.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn children(conn: &Connection, parent_id: &str) -> Result<Vec<Issue>> {
    list(
        conn,
        &IssueFilter {
            parent_id: Some(parent_id.to_string()),
            sort: IssueSort::asc(SortField::Id),
            ..IssueFilter::default()
        },
    )
}

fn child_ids(conn: &Connection, parent_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM issues WHERE parent_id = ?1 AND deleted_at IS NULL ORDER BY id",
    )?;
    let rows = stmt.query_map([parent_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Every live descendant of `root`, breadth first, excluding `root`.
///
/// # Errors
///
/// Returns an execution error when the walk revisits a node (a parent cycle)
/// or goes deeper than [`MAX_TREE_DEPTH`].
pub fn descendant_ids(conn: &Connection, root: &str) -> Result<Vec<String>> {
    let mut seen: HashSet<String> = HashSet::from([root.to_string()]);
    let mut out = Vec::new();
    let mut frontier = vec![root.to_string()];
    let mut depth = 0;
    while !frontier.is_empty() {
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            return Err(TdError::Execution(format!(
                "descendants of {root} exceed max depth {MAX_TREE_DEPTH}"
            )));
        }
        let mut next = Vec::new();
        for parent in &frontier {
            for child in child_ids(conn, parent)? {
                if !seen.insert(child.clone()) {
                    return Err(TdError::Execution(format!(
                        "parent cycle detected under {root} at {child}"
                    )));
                }
                out.push(child.clone());
                next.push(child);
            }
        }
        frontier = next;
    }
    Ok(out)
}

/// Whether making `new_parent` the parent of `child` would close a cycle.
/// Walks up from `new_parent`; an overlong chain counts as a cycle.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn would_create_parent_cycle(conn: &Connection, child: &str, new_parent: &str) -> Result<bool> {
    let mut current = Some(new_parent.to_string());
    let mut steps = 0;
    while let Some(id) = current {
        if id == child {
            return Ok(true);
        }
        steps += 1;
        if steps > MAX_TREE_DEPTH {
            return Ok(true);
        }
        current = conn
            .query_row("SELECT parent_id FROM issues WHERE id = ?1", [&id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use chrono::{Duration, Utc};

    fn seed(store: &Store, issues: &[Issue]) {
        store
            .write(|tx| {
                for issue in issues {
                    upsert(tx, issue)?;
                }
                Ok(())
            })
            .expect("seed");
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let store = Store::open_in_memory().expect("store");
        let mut issue = Issue::new("td-aaaaaa", "Login fails", Utc::now());
        issue.labels = vec!["auth".into(), "backend".into()];
        issue.priority = Priority::P1;
        issue.minor = true;
        seed(&store, &[issue.clone()]);

        let loaded = store.read(|c| get(c, "td-aaaaaa")).expect("get");
        assert_eq!(loaded.title, "Login fails");
        assert_eq!(loaded.labels, vec!["auth", "backend"]);
        assert_eq!(loaded.priority, Priority::P1);
        assert!(loaded.minor);
        assert_eq!(loaded.created_at.timestamp_micros(), issue.created_at.timestamp_micros());
    }

    #[test]
    fn soft_deleted_rows_hidden_from_default_reads() {
        let store = Store::open_in_memory().expect("store");
        let mut gone = Issue::new("td-bbbbbb", "gone", Utc::now());
        gone.deleted_at = Some(Utc::now());
        seed(&store, &[gone, Issue::new("td-cccccc", "here", Utc::now())]);

        let err = store.read(|c| get(c, "td-bbbbbb")).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NotFound);
        assert!(store.read(|c| get_any(c, "td-bbbbbb")).is_ok());

        let live = store.read(|c| list(c, &IssueFilter::default())).expect("list");
        assert_eq!(live.len(), 1);
        let deleted = store
            .read(|c| {
                list(
                    c,
                    &IssueFilter {
                        only_deleted: true,
                        ..IssueFilter::default()
                    },
                )
            })
            .expect("list deleted");
        assert_eq!(deleted[0].id, "td-bbbbbb");
    }

    #[test]
    fn label_filter_matches_whole_labels() {
        let store = Store::open_in_memory().expect("store");
        let mut a = Issue::new("td-aaaaaa", "a", Utc::now());
        a.labels = vec!["ui".into()];
        let mut b = Issue::new("td-bbbbbb", "b", Utc::now());
        b.labels = vec!["build".into(), "uix".into()];
        seed(&store, &[a, b]);
        let hits = store
            .read(|c| {
                list(
                    c,
                    &IssueFilter {
                        label: Some("ui".into()),
                        ..IssueFilter::default()
                    },
                )
            })
            .expect("list");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "td-aaaaaa");
    }

    #[test]
    fn descendants_walk_tree_and_detect_cycles() {
        let store = Store::open_in_memory().expect("store");
        let now = Utc::now();
        let root = Issue::new("td-000001", "root", now);
        let mut child = Issue::new("td-000002", "child", now);
        child.parent_id = Some("td-000001".into());
        let mut grandchild = Issue::new("td-000003", "grandchild", now);
        grandchild.parent_id = Some("td-000002".into());
        seed(&store, &[root, child, grandchild]);

        let ids = store.read(|c| descendant_ids(c, "td-000001")).expect("walk");
        assert_eq!(ids, vec!["td-000002", "td-000003"]);

        // Corrupt: A -> B -> A
        store
            .write(|tx| {
                tx.execute(
                    "UPDATE issues SET parent_id = 'td-000002' WHERE id = 'td-000001'",
                    [],
                )?;
                Ok(())
            })
            .expect("corrupt");
        let err = store.read(|c| descendant_ids(c, "td-000001")).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn parent_cycle_check() {
        let store = Store::open_in_memory().expect("store");
        let now = Utc::now();
        let a = Issue::new("td-00000a", "a", now);
        let mut b = Issue::new("td-00000b", "b", now);
        b.parent_id = Some("td-00000a".into());
        seed(&store, &[a, b]);
        assert!(store
            .read(|c| would_create_parent_cycle(c, "td-00000a", "td-00000b"))
            .expect("check"));
        assert!(!store
            .read(|c| would_create_parent_cycle(c, "td-00000b", "td-00000a"))
            .expect("check"));
    }

    #[test]
    fn sort_clause_and_comparator_agree() {
        let now = Utc::now();
        let mut a = Issue::new("td-aaaaaa", "a", now);
        a.priority = Priority::P1;
        let mut b = Issue::new("td-bbbbbb", "b", now + Duration::seconds(1));
        b.priority = Priority::P0;
        let sort: IssueSort = "-created".parse().expect("sort");
        assert_eq!(sort.sql_clause(), "ORDER BY i.created_at DESC, i.id ASC");
        assert_eq!(sort.compare(&a, &b), std::cmp::Ordering::Greater);
        let by_priority = IssueSort::default();
        assert_eq!(by_priority.compare(&a, &b), std::cmp::Ordering::Greater);
        assert_eq!(sort.to_string(), "-created");
    }
}
