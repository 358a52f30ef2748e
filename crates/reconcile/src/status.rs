//! Observed state vocabulary: statuses, detail payloads and the reporter
//! commands use to push them upward.

use crate::variables::Variables;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Observed state of an instruction, a group or a table cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not observed yet, or the observation failed
    #[default]
    Unknown,
    /// Not applicable; used for neutral table cells
    #[serde(rename = "")]
    None,
    /// Drift detected, apply would change something
    Todo,
    /// An apply is in progress
    Running,
    /// Actual state matches desired state
    Applied,
    /// The last apply failed, or the target cannot converge
    Failed,
}

impl Status {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::None => "",
            Self::Todo => "todo",
            Self::Running => "running",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Applied => 1,
            Self::Running => 2,
            Self::Todo => 3,
            Self::None => 4,
            Self::Failed => 5,
        }
    }

    /// Flat precedence merge: Failed > None > Todo > Running > Applied > Unknown.
    ///
    /// Used by commands to combine per-item statuses (table rows, package
    /// lists) into one.
    pub fn if_higher_priority(self, other: Self) -> Self {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }

    /// Aggregate sibling statuses in declaration order.
    ///
    /// A Todo is only recorded when no Failed or Unknown came before it, so
    /// pending work behind an unresolved sibling is not advertised as
    /// actionable. The final result is chosen as
    /// Running > Failed > Unknown > Todo > Applied; None is neutral.
    pub fn fold<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Status>,
    {
        let mut running = false;
        let mut failed = false;
        let mut unknown = false;
        let mut todo = false;

        for status in statuses {
            match status {
                Self::Running => running = true,
                Self::Failed => failed = true,
                Self::Unknown => unknown = true,
                Self::Todo => {
                    if !failed && !unknown {
                        todo = true;
                    }
                }
                Self::Applied | Self::None => {}
            }
        }

        if running {
            Self::Running
        } else if failed {
            Self::Failed
        } else if unknown {
            Self::Unknown
        } else if todo {
            Self::Todo
        } else {
            Self::Applied
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One cell of a [`Table`] detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "s")]
    pub status: Status,
    #[serde(rename = "c")]
    pub content: String,
}

impl Cell {
    pub fn new(status: Status, content: impl Into<String>) -> Self {
        Self {
            status,
            content: content.into(),
        }
    }

    /// Cell without status colouring
    pub fn plain(content: impl Into<String>) -> Self {
        Self::new(Status::None, content)
    }
}

/// Tabular detail: optional header plus rows of status-coloured cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(rename = "h", default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<String>,
    #[serde(rename = "r", default)]
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn with_header<I, S>(header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, cells: Vec<Cell>) {
        self.rows.push(cells);
    }

    fn render(&self) -> String {
        let columns = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0);
        let mut widths = vec![0usize; columns];
        for (i, h) in self.header.iter().enumerate() {
            widths[i] = widths[i].max(h.chars().count());
        }
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.content.chars().count());
            }
        }

        let mut out = String::new();
        let mut line = |cells: Vec<&str>| {
            let joined = cells
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{c:<width$}", width = widths[i]))
                .collect::<Vec<_>>()
                .join("  ");
            out.push_str(joined.trim_end());
            out.push('\n');
        };
        if !self.header.is_empty() {
            line(self.header.iter().map(String::as_str).collect());
        }
        for row in &self.rows {
            line(row.iter().map(|c| c.content.as_str()).collect());
        }
        out
    }
}

/// Transcript of an external tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminal {
    #[serde(rename = "cmd", default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(rename = "out")]
    pub output: String,
}

/// Payload attached to a status to explain it.
///
/// Serialized as `{"t": <type>, "d": <payload>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "lowercase")]
pub enum Detail {
    Text(String),
    #[serde(rename = "textdiff")]
    TextDiff {
        before: String,
        after: String,
    },
    Table(Table),
    Terminal(Terminal),
    Error(String),
}

impl Detail {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn error(err: impl fmt::Display) -> Self {
        Self::Error(err.to_string())
    }

    pub fn diff(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self::TextDiff {
            before: before.into(),
            after: after.into(),
        }
    }

    /// Type tag as used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::TextDiff { .. } => "textdiff",
            Self::Table(_) => "table",
            Self::Terminal(_) => "terminal",
            Self::Error(_) => "error",
        }
    }

    /// Plain-text rendering for terminals and logs.
    ///
    /// Diffs are rendered as a unified diff from the current content to
    /// the desired content.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) | Self::Error(text) => text.clone(),
            Self::TextDiff { before, after } => similar::TextDiff::from_lines(before, after)
                .unified_diff()
                .header("current", "desired")
                .to_string(),
            Self::Table(table) => table.render(),
            Self::Terminal(term) => format!("{}{}", term.command, term.output),
        }
    }
}

/// One observation pushed by a command.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: Status,
    pub info: String,
    pub detail: Option<Detail>,
    /// Variables this observation produces for later siblings
    pub variables: Variables,
}

/// Callback a command uses to publish its observations.
///
/// Cheap to clone; every clone feeds the same owner.
#[derive(Clone)]
pub struct Reporter(Arc<dyn Fn(StatusUpdate) + Send + Sync>);

impl Reporter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(StatusUpdate) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Reporter that drops everything
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, status: Status, info: impl Into<String>, detail: Option<Detail>) {
        self.report_with_variables(status, info, detail, Variables::new());
    }

    pub fn report_with_variables(
        &self,
        status: Status,
        info: impl Into<String>,
        detail: Option<Detail>,
        variables: Variables,
    ) {
        (self.0)(StatusUpdate {
            status,
            info: info.into(),
            detail,
            variables,
        });
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}
