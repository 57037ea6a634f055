use anyhow::Result;

use syntax::ast;

use crate::link::{resolve_link, resolve_target, Resolve};
use crate::{Error, LinkId, Target, Template};

/// Which targets an exec task runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    PerFile,
    PerUnit,
}

/// Restricts which files a per-file task fans out over.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileFilter {
    /// only files under this directory, relative to the unit root
    pub within: Option<String>,
    /// only files whose name ends with this
    pub suffix: Option<String>,
}

impl FileFilter {
    /// Check a path relative to the unit root, using '/' as separator.
    pub fn matches(&self, relative: &str) -> bool {
        if let Some(dir) = &self.within {
            let dir = dir.trim_end_matches('/');
            if !dir.is_empty() && !relative.starts_with(&format!("{dir}/")) {
                return false;
            }
        }
        match &self.suffix {
            Some(suffix) => relative.ends_with(suffix.as_str()),
            None => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.within.is_none() && self.suffix.is_none()
    }
}

/// An executable invocation: one job per file or one for the whole unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTask {
    pub scope: Scope,
    pub exec: String,
    pub args: Vec<Template>,
    /// log file that captured stdout is appended to
    pub stdout: Option<Template>,
    /// log file that captured stderr is appended to
    pub stderr: Option<Template>,
    pub filter: FileFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption {
    pub name: String,
    pub description: String,
    /// overrides the link's exit-0 transition when present
    pub next: Option<Target>,
    /// applied to the unit's variables in order
    pub assignments: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetValue {
    Text(String),
    Link(LinkId),
}

/// What a chain link does when a unit arrives at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDescriptor {
    Exec(ExecTask),
    Choice(Vec<ChoiceOption>),
    SetVariable { var: String, value: SetValue },
    /// next link comes from the named variable, else the link's default
    LinkPull { var: String },
    /// remember a link on the unit for a later `GotoMagicLink`
    AssignMagicLink(LinkId),
    GotoMagicLink,
}

impl TaskDescriptor {
    pub(crate) fn create(spec: ast::TaskSpec, link: &str, resolve: &dyn Resolve) -> Result<Self> {
        use ast::TaskSpec::*;
        let task = match spec {
            Run(exec) => Self::Exec(create_exec(exec, link)?),
            Choice(options) => Self::Choice(create_options(options, link, resolve)?),
            Set { var, value } => Self::SetVariable {
                var: var.to_owned(),
                value: match value {
                    ast::SetValue::Literal(s) => SetValue::Text(s.to_owned()),
                    ast::SetValue::Link(name) => SetValue::Link(resolve_link(name, link, resolve)?),
                },
            },
            Pull { var } => Self::LinkPull { var: var.to_owned() },
            Magic(name) => Self::AssignMagicLink(resolve_link(name, link, resolve)?),
            GotoMagic => Self::GotoMagicLink,
        };
        Ok(task)
    }

    /// Short name for log messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exec(ExecTask { scope: Scope::PerFile, .. }) => "per-file exec",
            Self::Exec(ExecTask { scope: Scope::PerUnit, .. }) => "per-unit exec",
            Self::Choice(_) => "choice",
            Self::SetVariable { .. } => "set variable",
            Self::LinkPull { .. } => "link pull",
            Self::AssignMagicLink(_) => "assign magic link",
            Self::GotoMagicLink => "goto magic link",
        }
    }

    pub fn options(&self) -> Option<&[ChoiceOption]> {
        match self {
            Self::Choice(options) => Some(options),
            _ => None,
        }
    }

    /// Every link this task can refer to, not counting the link's own exits.
    pub fn referenced_links(&self) -> Vec<LinkId> {
        match self {
            Self::Choice(options) => options
                .iter()
                .filter_map(|o| match o.next {
                    Some(Target::Link(id)) => Some(id),
                    _ => None,
                })
                .collect(),
            Self::SetVariable { value: SetValue::Link(id), .. } => vec![*id],
            Self::AssignMagicLink(id) => vec![*id],
            _ => Vec::new(),
        }
    }

    pub(crate) fn targets_mut(&mut self) -> Vec<&mut Target> {
        match self {
            Self::Choice(options) => options.iter_mut().filter_map(|o| o.next.as_mut()).collect(),
            _ => Vec::new(),
        }
    }
}

fn create_exec(exec: ast::Exec, link: &str) -> Result<ExecTask> {
    let scope = match exec.scope {
        ast::Scope::PerFile => Scope::PerFile,
        ast::Scope::PerUnit => Scope::PerUnit,
    };
    let mut task = ExecTask {
        scope,
        exec: exec.exec.to_owned(),
        args: Template::parse_args(exec.args)?,
        stdout: None,
        stderr: None,
        filter: FileFilter::default(),
    };

    use ast::ExecModifier::*;
    for modifier in exec.modifiers {
        match modifier {
            Stdout(path) => set_once(&mut task.stdout, Template::parse(path)?, "stdout", link)?,
            Stderr(path) => set_once(&mut task.stderr, Template::parse(path)?, "stderr", link)?,
            Within(dir) => set_once(&mut task.filter.within, dir.to_owned(), "in", link)?,
            Suffix(s) => set_once(&mut task.filter.suffix, s.to_owned(), "suffix", link)?,
        }
    }

    if scope == Scope::PerUnit && !task.filter.is_empty() {
        return Err(Error::FilterOnUnitTask(link.to_owned()).into());
    }
    Ok(task)
}

fn set_once<T>(slot: &mut Option<T>, val: T, what: &str, link: &str) -> Result<()> {
    if slot.is_some() {
        return Err(Error::DuplicateModifier(link.to_owned(), what.to_owned()).into());
    }
    *slot = Some(val);
    Ok(())
}

fn create_options(
    options: Vec<ast::ChoiceOption>,
    link: &str,
    resolve: &dyn Resolve,
) -> Result<Vec<ChoiceOption>> {
    if options.is_empty() {
        return Err(Error::EmptyChoice(link.to_owned()).into());
    }
    let mut out: Vec<ChoiceOption> = Vec::with_capacity(options.len());
    for opt in options {
        if out.iter().any(|o| o.name == opt.name) {
            return Err(Error::DuplicateOption(link.to_owned(), opt.name.to_owned()).into());
        }
        let next = match opt.next {
            Some(t) => Some(resolve_target(t, link, resolve)?),
            None => None,
        };
        out.push(ChoiceOption {
            name: opt.name.to_owned(),
            description: opt.description.to_owned(),
            next,
            assignments: opt
                .assignments
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        });
    }
    Ok(out)
}
