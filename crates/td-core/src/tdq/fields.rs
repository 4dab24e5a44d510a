//! Static field registry.
//!
//! Issue fields are addressed bare (`status`). Related entities use a dotted
//! prefix: `log.`, `comment.`, `handoff.`, `file.`, and `epic.` for the
//! nearest epic ancestor, which exposes every issue field.

use std::fmt;

/// Value domain of a field; decides operators, literal parsing and SQL shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    Id,
    Session,
    Status,
    IssueType,
    Priority,
    LogType,
    FileRole,
    Number,
    Date,
    Labels,
    Bool,
}

impl FieldKind {
    #[must_use]
    pub const fn is_enum(self) -> bool {
        matches!(
            self,
            Self::Status | Self::IssueType | Self::Priority | Self::LogType | Self::FileRole
        )
    }

    /// Kinds compared as free text (case-insensitive equality, substring `~`).
    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Id | Self::Session)
    }

    /// Whether `<`, `<=`, `>`, `>=` are meaningful.
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        matches!(self, Self::Priority | Self::Number | Self::Date)
    }

    /// Whether `~` and `!~` are meaningful.
    #[must_use]
    pub const fn supports_contains(self) -> bool {
        matches!(self, Self::Text | Self::Id | Self::Session | Self::Labels)
    }
}

/// Which entity a field is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Issue,
    Log,
    Comment,
    Handoff,
    File,
    Epic,
}

impl Scope {
    #[must_use]
    pub const fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Issue => None,
            Self::Log => Some("log"),
            Self::Comment => Some("comment"),
            Self::Handoff => Some("handoff"),
            Self::File => Some("file"),
            Self::Epic => Some("epic"),
        }
    }

    fn fields(self) -> &'static [FieldDef] {
        match self {
            Self::Issue | Self::Epic => ISSUE_FIELDS,
            Self::Log => LOG_FIELDS,
            Self::Comment => COMMENT_FIELDS,
            Self::Handoff => HANDOFF_FIELDS,
            Self::File => FILE_FIELDS,
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "log" | "logs" => Some(Self::Log),
            "comment" | "comments" => Some(Self::Comment),
            "handoff" | "handoffs" => Some(Self::Handoff),
            "file" | "files" => Some(Self::File),
            "epic" => Some(Self::Epic),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Column in `issues i`; empty for related-entity fields.
    pub column: &'static str,
    pub aliases: &'static [&'static str],
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    column: &'static str,
    aliases: &'static [&'static str],
) -> FieldDef {
    FieldDef {
        name,
        kind,
        column,
        aliases,
    }
}

pub static ISSUE_FIELDS: &[FieldDef] = &[
    field("id", FieldKind::Id, "i.id", &[]),
    field("title", FieldKind::Text, "i.title", &[]),
    field("description", FieldKind::Text, "i.description", &["desc", "body"]),
    field("acceptance", FieldKind::Text, "i.acceptance", &["ac"]),
    field("type", FieldKind::IssueType, "i.type", &["issue_type", "kind"]),
    field("status", FieldKind::Status, "i.status", &["state"]),
    field("priority", FieldKind::Priority, "i.priority", &["pri", "p"]),
    field("points", FieldKind::Number, "i.points", &["estimate", "story_points"]),
    field("labels", FieldKind::Labels, "i.labels", &["label", "tag", "tags"]),
    field("parent", FieldKind::Id, "i.parent_id", &["parent_id"]),
    field("creator", FieldKind::Session, "i.creator_session", &["creator_session"]),
    field(
        "implementer",
        FieldKind::Session,
        "i.implementer_session",
        &["implementer_session", "assignee"],
    ),
    field("reviewer", FieldKind::Session, "i.reviewer_session", &["reviewer_session"]),
    field("created", FieldKind::Date, "i.created_at", &["created_at"]),
    field("updated", FieldKind::Date, "i.updated_at", &["updated_at"]),
    field("closed", FieldKind::Date, "i.closed_at", &["closed_at"]),
    field("due", FieldKind::Date, "i.due_at", &["due_at", "due_date"]),
    field("defer", FieldKind::Date, "i.defer_at", &["defer_at", "deferred", "defer_until"]),
    field("sprint", FieldKind::Text, "i.sprint", &[]),
    field("branch", FieldKind::Text, "i.created_branch", &["created_branch"]),
    field("minor", FieldKind::Bool, "i.minor", &[]),
];

pub static LOG_FIELDS: &[FieldDef] = &[
    field("message", FieldKind::Text, "", &["text", "msg"]),
    field("type", FieldKind::LogType, "", &["log_type", "kind"]),
    field("session", FieldKind::Session, "", &["session_id"]),
    field("created", FieldKind::Date, "", &["timestamp", "created_at"]),
];

pub static COMMENT_FIELDS: &[FieldDef] = &[
    field("text", FieldKind::Text, "", &["message", "body"]),
    field("session", FieldKind::Session, "", &["session_id", "author"]),
    field("created", FieldKind::Date, "", &["created_at", "timestamp"]),
];

pub static HANDOFF_FIELDS: &[FieldDef] = &[
    field("done", FieldKind::Text, "", &[]),
    field("remaining", FieldKind::Text, "", &["todo"]),
    field("decisions", FieldKind::Text, "", &["decision"]),
    field("uncertain", FieldKind::Text, "", &["uncertainty", "questions"]),
    field("session", FieldKind::Session, "", &["session_id"]),
    field("created", FieldKind::Date, "", &["timestamp", "created_at"]),
];

pub static FILE_FIELDS: &[FieldDef] = &[
    field("path", FieldKind::Text, "", &["file_path", "name"]),
    field("role", FieldKind::FileRole, "", &[]),
];

/// A resolved field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub scope: Scope,
    pub def: &'static FieldDef,
}

impl FieldRef {
    #[must_use]
    pub const fn kind(self) -> FieldKind {
        self.def.kind
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope.prefix() {
            Some(prefix) => write!(f, "{prefix}.{}", self.def.name),
            None => f.write_str(self.def.name),
        }
    }
}

fn lookup(scope: Scope, name: &str) -> Option<&'static FieldDef> {
    scope.fields().iter().find(|def| {
        def.name.eq_ignore_ascii_case(name)
            || def.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    })
}

/// Resolve a field name, aliases and case included.
#[must_use]
pub fn resolve(name: &str) -> Option<FieldRef> {
    match name.split_once('.') {
        None => lookup(Scope::Issue, name).map(|def| FieldRef {
            scope: Scope::Issue,
            def,
        }),
        Some((prefix, rest)) => {
            let scope = Scope::from_prefix(prefix)?;
            lookup(scope, rest).map(|def| FieldRef { scope, def })
        }
    }
}

/// Every canonical field name, for help output and error hints.
#[must_use]
pub fn all_names() -> Vec<String> {
    let scopes = [
        Scope::Issue,
        Scope::Log,
        Scope::Comment,
        Scope::Handoff,
        Scope::File,
    ];
    let mut names: Vec<String> = scopes
        .iter()
        .flat_map(|&scope| {
            scope
                .fields()
                .iter()
                .map(move |def| FieldRef { scope, def }.to_string())
        })
        .collect();
    names.push("epic.<field>".to_string());
    names
}

/// Related entity a `has(...)` call can test for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Related {
    Log,
    Comment,
    Handoff,
    File,
    Children,
    Blockers,
}

impl Related {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "log" | "logs" => Some(Self::Log),
            "comment" | "comments" => Some(Self::Comment),
            "handoff" | "handoffs" => Some(Self::Handoff),
            "file" | "files" => Some(Self::File),
            "child" | "children" => Some(Self::Children),
            "blocker" | "blockers" | "deps" | "dependencies" => Some(Self::Blockers),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Log => "logs",
            Self::Comment => "comments",
            Self::Handoff => "handoffs",
            Self::File => "files",
            Self::Children => "children",
            Self::Blockers => "blockers",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_aliases_and_case() {
        let f = resolve("Created_At").unwrap();
        assert_eq!(f.scope, Scope::Issue);
        assert_eq!(f.def.name, "created");
        assert_eq!(f.def.column, "i.created_at");

        let f = resolve("LOG.msg").unwrap();
        assert_eq!(f.to_string(), "log.message");
        assert_eq!(resolve("epic.pri").unwrap().to_string(), "epic.priority");
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert!(resolve("colour").is_none());
        assert!(resolve("log.colour").is_none());
        assert!(resolve("board.name").is_none());
    }

    #[test]
    fn issue_fields_all_have_columns() {
        assert!(ISSUE_FIELDS.iter().all(|f| f.column.starts_with("i.")));
        assert!(all_names().contains(&"handoff.remaining".to_string()));
    }
}
