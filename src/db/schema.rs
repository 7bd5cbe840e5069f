//! Schema snapshots: columns, indexes, foreign keys and engine-level table
//! facts. Fetched fresh per request by the drivers and treated as immutable
//! while a statement is built; a table altered mid-request produces a runtime
//! error on execution, never a stale cached plan.

use crate::sql::quote::parse_quoted_list;

/// Column privileges granted to the connected role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Privileges {
    pub select: bool,
    pub insert: bool,
    pub update: bool,
}

impl Default for Privileges {
    fn default() -> Self {
        Privileges {
            select: true,
            insert: true,
            update: true,
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Field {
    pub name: String,
    /// Bare type tag: `int`, `varchar`, `enum`, `numeric`, ...
    pub type_tag: String,
    /// Declared type including length/precision: `decimal(10,2) unsigned`.
    pub full_type: String,
    /// Length/precision text, or the quoted member list for ENUM/SET.
    pub length: String,
    pub unsigned: bool,
    pub null: bool,
    pub auto_increment: bool,
    pub default: Option<String>,
    /// ON UPDATE clause, e.g. `CURRENT_TIMESTAMP`.
    pub on_update: Option<String>,
    pub collation: Option<String>,
    pub comment: String,
    pub primary: bool,
    pub privileges: Privileges,
}

impl Field {
    pub fn is_numeric(&self) -> bool {
        let tag = self.type_tag.as_str();
        if tag.contains("int") && !tag.contains("interval") && !tag.contains("point") {
            return true;
        }
        [
            "numeric", "real", "float", "double", "decimal", "money", "serial",
        ]
        .iter()
        .any(|name| tag.contains(name))
    }

    pub fn is_char(&self) -> bool {
        let tag = self.type_tag.as_str();
        tag.contains("char")
            || tag.contains("text")
            || tag == "enum"
            || tag == "set"
            || tag == "name"
    }

    pub fn is_datetime(&self) -> bool {
        let tag = self.type_tag.as_str();
        tag.contains("date") || tag.contains("timestamp")
    }

    pub fn is_blob(&self) -> bool {
        let tag = self.type_tag.as_str();
        tag.contains("blob") || tag.contains("bytea") || tag.contains("raw")
    }

    pub fn is_bit(&self) -> bool {
        self.type_tag.contains("bit")
    }

    pub fn is_json(&self) -> bool {
        self.type_tag.starts_with("json")
    }

    /// Whether the stored value auto-refreshes on UPDATE, which makes the
    /// "keep original" edit function re-assign the column to itself.
    pub fn on_update_is_current_timestamp(&self) -> bool {
        self.on_update
            .as_deref()
            .map(|expr| expr.to_uppercase().starts_with("CURRENT_TIMESTAMP"))
            .unwrap_or(false)
    }

    /// ENUM/SET member list parsed out of the declared length, unquoted.
    pub fn enum_values(&self) -> Vec<String> {
        parse_quoted_list(&self.length)
            .into_iter()
            .map(|item| {
                let inner = item
                    .strip_prefix('\'')
                    .and_then(|rest| rest.strip_suffix('\''))
                    .unwrap_or(item.as_str())
                    .to_string();
                inner.replace("\\'", "'").replace("''", "'")
            })
            .collect()
    }
}

/// Index classification. PRIMARY outranks UNIQUE when resolving row identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Primary,
    Unique,
    Plain,
    Fulltext,
    Spatial,
}

/// One indexed column with its optional prefix length and direction.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPart {
    pub column: String,
    pub length: Option<u32>,
    pub desc: bool,
}

impl IndexPart {
    pub fn column(name: impl Into<String>) -> IndexPart {
        IndexPart {
            column: name.into(),
            length: None,
            desc: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: String,
    pub kind: IndexKind,
    pub parts: Vec<IndexPart>,
}

impl Index {
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|part| part.column.as_str())
    }

    pub fn is_unique(&self) -> bool {
        matches!(self.kind, IndexKind::Primary | IndexKind::Unique)
    }
}

/// Referential action on delete/update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FkAction {
    #[default]
    Restrict,
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl FkAction {
    pub fn parse(text: &str) -> FkAction {
        match text.trim().to_uppercase().as_str() {
            "NO ACTION" => FkAction::NoAction,
            "CASCADE" => FkAction::Cascade,
            "SET NULL" => FkAction::SetNull,
            "SET DEFAULT" => FkAction::SetDefault,
            _ => FkAction::Restrict,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            FkAction::Restrict => "RESTRICT",
            FkAction::NoAction => "NO ACTION",
            FkAction::Cascade => "CASCADE",
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign-key constraint; source and target columns are matched by
/// position. `database`/`schema` are set only when the reference leaves the
/// current one.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub name: String,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: String,
    pub source: Vec<String>,
    pub target: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

/// Engine-level table facts backing the approximate-count decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStatus {
    pub name: String,
    /// Storage engine tag; empty on PostgreSQL.
    pub engine: String,
    /// Engine-reported row estimate, when the engine keeps one.
    pub rows: Option<u64>,
}
