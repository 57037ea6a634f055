use anyhow::Result;

use syntax::ast;
use util::HashMap;

use crate::{Error, GraphIntegrityError, LinkId, TaskDescriptor};

/// Where a transition goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Link(LinkId),
    /// terminal: the unit completed
    Done,
    /// terminal: the unit failed
    Failed,
}

/// Result of resolving a link's exit code against its transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Next {
    Link(LinkId),
    Done,
    Failed,
    /// no mapping and no default: the unit ends here, and the
    /// exit code decides whether it completed or failed
    End,
}

impl From<Target> for Next {
    fn from(t: Target) -> Self {
        match t {
            Target::Link(id) => Next::Link(id),
            Target::Done => Next::Done,
            Target::Failed => Next::Failed,
        }
    }
}

/// Looks up link ids by name while a graph is being built.
pub(crate) trait Resolve {
    fn resolve(&self, name: &str) -> Option<LinkId>;
}

impl Resolve for HashMap<String, LinkId> {
    fn resolve(&self, name: &str) -> Option<LinkId> {
        self.get(name).copied()
    }
}

pub(crate) fn resolve_link(name: &str, from: &str, resolve: &dyn Resolve) -> Result<LinkId> {
    resolve.resolve(name).ok_or_else(|| {
        Error::from(GraphIntegrityError::MissingLink {
            from: from.to_owned(),
            to: name.to_owned(),
        })
        .into()
    })
}

pub(crate) fn resolve_target(t: ast::Target, from: &str, resolve: &dyn Resolve) -> Result<Target> {
    Ok(match t {
        ast::Target::Link(name) => Target::Link(resolve_link(name, from, resolve)?),
        ast::Target::Done => Target::Done,
        ast::Target::Failed => Target::Failed,
    })
}

/// A node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub name: String,
    /// display group, e.g. "Normalize"
    pub group: Option<String>,
    pub task: TaskDescriptor,
    /// exit code -> next, checked before `default`
    pub exits: Vec<(i32, Target)>,
    pub default: Option<Target>,
}

impl ChainLink {
    pub(crate) fn create(block: ast::LinkBlock, resolve: &dyn Resolve) -> Result<Self> {
        let name = block.name;
        let mut group = None;
        let mut task = None;
        let mut exits: Vec<(i32, Target)> = Vec::new();
        let mut default = None;

        use ast::LinkStatement::*;
        for statement in block.statements {
            match statement {
                Group(g) => {
                    if group.replace(g.to_owned()).is_some() {
                        return Err(Error::DuplicateStatement(name.to_owned(), "group").into());
                    }
                }
                Task(spec) => {
                    let t = TaskDescriptor::create(spec, name, resolve)?;
                    if task.replace(t).is_some() {
                        return Err(Error::DuplicateStatement(name.to_owned(), "task").into());
                    }
                }
                Exit(code, target) => {
                    if exits.iter().any(|(c, _)| *c == code) {
                        return Err(Error::DuplicateExitCode(name.to_owned(), code).into());
                    }
                    exits.push((code, resolve_target(target, name, resolve)?));
                }
                Default(target) => {
                    let t = resolve_target(target, name, resolve)?;
                    if default.replace(t).is_some() {
                        return Err(Error::DuplicateStatement(name.to_owned(), "default").into());
                    }
                }
            }
        }

        let task = task.ok_or_else(|| Error::MissingTask(name.to_owned()))?;
        Ok(Self {
            name: name.to_owned(),
            group,
            task,
            exits,
            default,
        })
    }

    /// Exact exit code match, then the default.
    pub fn target_for(&self, code: i32) -> Option<Target> {
        self.exits
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, t)| *t)
            .or(self.default)
    }

    /// Every link reachable in one step from this one.
    pub fn referenced_links(&self) -> Vec<LinkId> {
        let mut links = self.task.referenced_links();
        let edges = self.exits.iter().map(|(_, t)| *t).chain(self.default);
        links.extend(edges.filter_map(|t| match t {
            Target::Link(id) => Some(id),
            _ => None,
        }));
        links
    }

    /// Transitions that a migration may retarget.
    pub(crate) fn targets_mut(&mut self) -> Vec<&mut Target> {
        let mut targets: Vec<&mut Target> = self.exits.iter_mut().map(|(_, t)| t).collect();
        targets.extend(self.default.as_mut());
        targets.extend(self.task.targets_mut());
        targets
    }
}
