use anyhow::Result;

use syntax::ast;
use util::{HashMap, IdVec};

use crate::link::Resolve;
use crate::{Answers, ChainLink, Error, Errors, GraphIntegrityError, LinkId, Next, Target};

/// Immutable snapshot of the workflow: every chain link and the start link
/// for each unit kind. Shared between units behind an `Arc`.
#[derive(Debug)]
pub struct Graph {
    version: u64,
    links: IdVec<LinkId, ChainLink>,
    names: HashMap<String, LinkId>,
    starts: Vec<(String, LinkId)>,
}

impl Graph {
    /// Build the first snapshot from a parsed workflow file,
    /// along with any automatic answers it contains.
    pub fn load(items: Vec<ast::Item>) -> Result<(Self, Answers)> {
        let mut blocks = Vec::with_capacity(items.len());
        let mut names = util::hash_map(items.len());
        let mut start_names: Vec<(&str, &str)> = Vec::with_capacity(2);
        let mut answer_pairs = Vec::new();

        for item in items {
            match item {
                ast::Item::Start(kind, link) => {
                    if start_names.iter().any(|(k, _)| *k == kind) {
                        return Err(Error::DuplicateStart(kind.to_owned()).into());
                    }
                    start_names.push((kind, link));
                }
                ast::Item::Link(block) => {
                    let id = LinkId::from(blocks.len());
                    if names.insert(block.name.to_owned(), id).is_some() {
                        return Err(Error::DuplicateLink(block.name.to_owned()).into());
                    }
                    blocks.push(block);
                }
                ast::Item::Answers(pairs) => answer_pairs.extend(pairs),
            }
        }

        if start_names.is_empty() {
            return Err(Error::NoStart.into());
        }

        let links = create_links(blocks, &names)?;
        let starts = resolve_starts(&start_names, &names)?;

        let graph = Self {
            version: 1,
            links,
            names,
            starts,
        };
        log::debug!("loaded {} chain links", graph.len());

        let answers = Answers::from_pairs(&answer_pairs, &graph)?;
        Ok((graph, answers))
    }

    pub(crate) fn from_parts(
        version: u64,
        links: IdVec<LinkId, ChainLink>,
        names: HashMap<String, LinkId>,
        starts: Vec<(String, LinkId)>,
    ) -> Result<Self, GraphIntegrityError> {
        let graph = Self {
            version,
            links,
            names,
            starts,
        };
        graph.check()?;
        Ok(graph)
    }

    /// Snapshot version; the first load is version 1.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, id: LinkId) -> Result<&ChainLink, GraphIntegrityError> {
        self.links
            .try_get(id)
            .ok_or(GraphIntegrityError::UnknownId(id.into(), self.version))
    }

    pub fn by_name(&self, name: &str) -> Option<LinkId> {
        self.names.get(name).copied()
    }

    /// Like `by_name`, but a missing link is an integrity error.
    pub fn require(&self, name: &str) -> Result<LinkId, GraphIntegrityError> {
        self.by_name(name).ok_or_else(|| GraphIntegrityError::UnknownName {
            name: name.to_owned(),
            version: self.version,
        })
    }

    /// Name of a link, for logs and persistence.
    pub fn name(&self, id: LinkId) -> &str {
        self.links.try_get(id).map(|l| l.name.as_str()).unwrap_or("<unknown>")
    }

    pub fn start_for(&self, kind: &str) -> Option<LinkId> {
        self.starts.iter().find(|(k, _)| k == kind).map(|(_, id)| *id)
    }

    pub fn starts(&self) -> impl Iterator<Item = (&str, LinkId)> {
        self.starts.iter().map(|(k, id)| (k.as_str(), *id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (LinkId, &ChainLink)> {
        self.links.iter_ids()
    }

    /// Exact exit code override, then the link's default, then `Next::End`.
    pub fn resolve_next(&self, link: LinkId, exit_code: i32) -> Result<Next, GraphIntegrityError> {
        match self.get(link)?.target_for(exit_code) {
            Some(target) => self.check_target(target),
            None => Ok(Next::End),
        }
    }

    /// The link's default transition only, ignoring exit codes.
    pub fn default_next(&self, link: LinkId) -> Result<Next, GraphIntegrityError> {
        match self.get(link)?.default {
            Some(target) => self.check_target(target),
            None => Ok(Next::End),
        }
    }

    /// Make sure a target refers to a link in this snapshot.
    pub fn check_target(&self, target: Target) -> Result<Next, GraphIntegrityError> {
        if let Target::Link(id) = target {
            self.get(id)?;
        }
        Ok(target.into())
    }

    /// Walk the graph from `start`, feeding it one exit code per link visited.
    /// Stops early when a terminal is reached.
    pub fn replay(&self, start: LinkId, exit_codes: &[i32]) -> Result<Vec<Next>, GraphIntegrityError> {
        let mut path = Vec::with_capacity(exit_codes.len());
        let mut current = start;
        for code in exit_codes {
            let next = self.resolve_next(current, *code)?;
            path.push(next);
            match next {
                Next::Link(id) => current = id,
                _ => break,
            }
        }
        Ok(path)
    }

    /// Verify every reference in the snapshot points at an existing link.
    pub fn check(&self) -> Result<(), GraphIntegrityError> {
        for (id, link) in self.links.iter_ids() {
            for referenced in link.referenced_links() {
                if self.links.try_get(referenced).is_none() {
                    return Err(GraphIntegrityError::MissingLink {
                        from: self.name(id).to_owned(),
                        to: format!("#{}", usize::from(referenced)),
                    });
                }
            }
        }
        for (kind, id) in &self.starts {
            if self.links.try_get(*id).is_none() {
                return Err(GraphIntegrityError::MissingStart(kind.clone(), format!("#{}", usize::from(*id))));
            }
        }
        Ok(())
    }

    pub(crate) fn parts(&self) -> (&IdVec<LinkId, ChainLink>, &HashMap<String, LinkId>, &[(String, LinkId)]) {
        (&self.links, &self.names, &self.starts)
    }
}

/// Create every link, collecting errors so the whole file is checked in one go.
pub(crate) fn create_links(
    blocks: Vec<ast::LinkBlock>,
    resolve: &dyn Resolve,
) -> Result<IdVec<LinkId, ChainLink>> {
    let mut links = IdVec::with_capacity(blocks.len());
    let mut errors = Errors::default();
    for block in blocks {
        let name = block.name;
        match ChainLink::create(block, resolve) {
            Ok(link) => {
                links.push(link);
            }
            Err(e) => errors.add_context(e, format!("in link \"{name}\"")),
        }
    }
    errors.print_recap("loading workflow")?;
    Ok(links)
}

pub(crate) fn resolve_starts(
    start_names: &[(&str, &str)],
    resolve: &dyn Resolve,
) -> Result<Vec<(String, LinkId)>, GraphIntegrityError> {
    start_names
        .iter()
        .map(|(kind, link)| match resolve.resolve(link) {
            Some(id) => Ok((kind.to_string(), id)),
            None => Err(GraphIntegrityError::MissingStart(kind.to_string(), link.to_string())),
        })
        .collect()
}
