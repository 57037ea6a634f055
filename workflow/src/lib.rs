mod error;
pub use error::{AggregatedErrors, Errors};

mod id;
pub use id::LinkId;

mod vars;
pub use vars::{Lookup, Overlay, UnresolvedVariable, Variables};

mod template;
pub use template::{render_all, Template};

mod task;
pub use task::{ChoiceOption, ExecTask, FileFilter, Scope, SetValue, TaskDescriptor};

mod link;
pub use link::{ChainLink, Next, Target};

mod graph;
pub use graph::Graph;

mod answers;
pub use answers::Answers;

mod migration;
pub use migration::Migration;

/// A reference in the graph that does not lead anywhere.
/// Always fatal for the engine instance that encounters it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphIntegrityError {
    #[error("Link \"{from}\" refers to undefined link \"{to}\"")]
    MissingLink { from: String, to: String },
    #[error("Start link for unit kind \"{0}\" is undefined: \"{1}\"")]
    MissingStart(String, String),
    #[error("No link with id {0} in workflow version {1}")]
    UnknownId(usize, u64),
    #[error("No link named \"{name}\" in workflow version {version}")]
    UnknownName { name: String, version: u64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Integrity(#[from] GraphIntegrityError),
    #[error("Link \"{0}\" is defined more than once")]
    DuplicateLink(String),
    #[error("Link \"{0}\" does not define a task")]
    MissingTask(String),
    #[error("Link \"{0}\" has more than one \"{1}\" statement")]
    DuplicateStatement(String, &'static str),
    #[error("Link \"{0}\" maps exit code {1} more than once")]
    DuplicateExitCode(String, i32),
    #[error("Link \"{0}\" sets \"{1}\" more than once")]
    DuplicateModifier(String, String),
    #[error("Link \"{0}\" filters files, but its task is not per-file")]
    FilterOnUnitTask(String),
    #[error("Choice link \"{0}\" has no options")]
    EmptyChoice(String),
    #[error("Choice link \"{0}\" defines option \"{1}\" more than once")]
    DuplicateOption(String, String),
    #[error("Unit kind \"{0}\" has more than one start link")]
    DuplicateStart(String),
    #[error("Workflow defines no start link")]
    NoStart,
    #[error("Automatic answer given for undefined link \"{0}\"")]
    AnswerForUnknownLink(String),
    #[error("Automatic answer given for \"{0}\", which is not a choice link")]
    AnswerForNonChoice(String),
    #[error("Choice link \"{0}\" has no option \"{1}\"")]
    UnknownOption(String, String),
    #[error("More than one automatic answer for choice link \"{0}\"")]
    DuplicateAnswer(String),
    #[error("Unexpected {0} item \"{1}\"")]
    UnexpectedItem(&'static str, String),
    #[error("Migration refers to undefined link \"{0}\"")]
    UnknownMigrationLink(String),
}
