//! Read models assembled from several tables: the full issue view behind
//! `show`, and ordered board contents.

use crate::db::history::{self, HistoryEntry};
use crate::db::{Store, activity, issues, links, planning};
use crate::error::{Result, TdError};
use crate::model::{Board, Comment, Dependency, Handoff, Issue, IssueFile, Log};
use crate::tdq::{self, QueryOptions};
use serde::Serialize;
use std::collections::HashMap;

/// Everything known about one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueDetail {
    pub issue: Issue,
    pub logs: Vec<Log>,
    pub handoffs: Vec<Handoff>,
    pub comments: Vec<Comment>,
    pub files: Vec<IssueFile>,
    /// Edges where this issue waits on another.
    pub blocked_by: Vec<Dependency>,
    /// Edges where another issue waits on this one.
    pub blocks: Vec<Dependency>,
    pub children: Vec<Issue>,
    pub history: Vec<HistoryEntry>,
}

/// # Errors
///
/// `not_found` for unknown ids; soft-deleted issues are returned when
/// `include_deleted` is set.
pub fn issue_detail(store: &Store, id: &str, include_deleted: bool) -> Result<IssueDetail> {
    store.read(|conn| {
        let issue = if include_deleted {
            issues::get_any(conn, id)?
        } else {
            issues::get(conn, id)?
        };
        Ok(IssueDetail {
            logs: activity::logs_for_issue(conn, &issue.id, None)?,
            handoffs: activity::handoffs_for_issue(conn, &issue.id)?,
            comments: activity::comments_for_issue(conn, &issue.id)?,
            files: links::files_for_issue(conn, &issue.id)?,
            blocked_by: links::blockers_of(conn, &issue.id)?,
            blocks: links::dependents_of(conn, &issue.id)?,
            children: issues::children(conn, &issue.id)?,
            history: history::for_issue(conn, &issue.id)?,
            issue,
        })
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    pub issue: Issue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardContents {
    pub board: Board,
    pub entries: Vec<BoardEntry>,
}

/// Issues matching the board query: positioned issues first by ascending
/// position, then the rest in query order.
///
/// # Errors
///
/// `not_found` for an unknown board; query errors as for [`tdq::query`].
pub fn board_contents(store: &Store, key: &str, opts: &QueryOptions) -> Result<BoardContents> {
    store.read(|conn| {
        let board = planning::find_live_board(conn, key)?
            .ok_or_else(|| TdError::not_found("board", key))?;
        let matched = tdq::query(conn, &board.query, opts)?;
        let positions: HashMap<String, i64> = planning::positions_for_board(conn, &board.id)?
            .into_iter()
            .map(|p| (p.issue_id, p.position))
            .collect();

        let (mut placed, rest): (Vec<BoardEntry>, Vec<BoardEntry>) = matched
            .into_iter()
            .map(|issue| BoardEntry {
                position: positions.get(&issue.id).copied(),
                issue,
            })
            .partition(|e| e.position.is_some());
        placed.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| a.issue.id.cmp(&b.issue.id))
        });
        placed.extend(rest);
        Ok(BoardContents {
            board,
            entries: placed,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MutationContext;
    use crate::mutation::activity as act;
    use crate::mutation::issues::{self as mi, NewIssue};
    use crate::mutation::planning as mp;
    use crate::model::LogType;

    #[test]
    fn detail_collects_related_rows() {
        let store = Store::open_in_memory().unwrap();
        let ctx = MutationContext::new("ses_a");
        let parent = mi::create(&store, &ctx, NewIssue::titled("parent")).unwrap().value;
        let child = mi::create(
            &store,
            &ctx,
            NewIssue {
                parent_id: Some(parent.id.clone()),
                ..NewIssue::titled("child")
            },
        )
        .unwrap()
        .value;
        act::add_log(&store, &ctx, &parent.id, LogType::Decision, "split it").unwrap();
        act::add_comment(&store, &ctx, &parent.id, "looks right").unwrap();
        act::add_dependency(&store, &ctx, &parent.id, &child.id).unwrap();

        let detail = issue_detail(&store, &parent.id, false).unwrap();
        assert_eq!(detail.children.len(), 1);
        assert_eq!(detail.logs.len(), 1);
        assert_eq!(detail.comments.len(), 1);
        assert_eq!(detail.blocked_by[0].blocker_id, child.id);
        let child_detail = issue_detail(&store, &child.id, false).unwrap();
        assert_eq!(child_detail.blocks[0].blocked_id, parent.id);
    }

    #[test]
    fn positioned_issues_lead_the_board() {
        let store = Store::open_in_memory().unwrap();
        let ctx = MutationContext::new("ses_a");
        let mut ids = Vec::new();
        for title in ["one", "two", "three"] {
            ids.push(mi::create(&store, &ctx, NewIssue::titled(title)).unwrap().value.id);
        }
        mp::create_board(&store, &ctx, "all", "status = open", "").unwrap();
        mp::position_issue(&store, &ctx, "all", &ids[2], 10).unwrap();
        mp::position_issue(&store, &ctx, "all", &ids[1], 20).unwrap();

        let opts = QueryOptions::new("ses_a", chrono::Utc::now());
        let contents = board_contents(&store, "ALL", &opts).unwrap();
        let order: Vec<&str> = contents.entries.iter().map(|e| e.issue.id.as_str()).collect();
        assert_eq!(order, vec![ids[2].as_str(), ids[1].as_str(), ids[0].as_str()]);
        assert_eq!(contents.entries[0].position, Some(10));
        assert_eq!(contents.entries[2].position, None);
    }

    #[test]
    fn unknown_board_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let opts = QueryOptions::new("s", chrono::Utc::now());
        let err = board_contents(&store, "nope", &opts).unwrap_err();
        assert_eq!(err.code().code(), "not_found");
    }
}
