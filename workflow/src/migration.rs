use anyhow::Result;

use syntax::ast;
use util::{HashMap, IdVec};

use crate::graph::{create_links, resolve_starts};
use crate::{ChainLink, Error, Graph, LinkId, Target};

/// Builds the next snapshot of a graph. The current snapshot is never touched;
/// units keep running against it until the engine cuts over.
#[derive(Debug)]
pub struct Migration {
    version: u64,
    links: IdVec<LinkId, ChainLink>,
    names: HashMap<String, LinkId>,
    starts: Vec<(String, LinkId)>,
}

impl Migration {
    pub fn new(base: &Graph) -> Self {
        let (links, names, starts) = base.parts();
        Self {
            version: base.version() + 1,
            links: links.clone(),
            names: names.clone(),
            starts: starts.to_vec(),
        }
    }

    pub fn id(&self, name: &str) -> Result<LinkId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownMigrationLink(name.to_owned()).into())
    }

    /// Add links (and replacement `start` lines) written in workflow syntax.
    /// New links may refer to each other and to existing links.
    pub fn add(&mut self, items: Vec<ast::Item>) -> Result<Vec<LinkId>> {
        let mut blocks = Vec::new();
        let mut new_ids = Vec::new();
        let mut start_names = Vec::new();
        for item in items {
            match item {
                ast::Item::Link(block) => {
                    let id = LinkId::from(self.links.len() + blocks.len());
                    if self.names.insert(block.name.to_owned(), id).is_some() {
                        return Err(Error::DuplicateLink(block.name.to_owned()).into());
                    }
                    new_ids.push(id);
                    blocks.push(block);
                }
                ast::Item::Start(kind, link) => start_names.push((kind, link)),
                ast::Item::Answers(_) => {
                    return Err(Error::UnexpectedItem("answers", String::from("migration")).into())
                }
            }
        }

        for link in create_links(blocks, &self.names)?.iter() {
            self.links.push(link.clone());
        }
        for (kind, id) in resolve_starts(&start_names, &self.names)? {
            match self.starts.iter_mut().find(|(k, _)| *k == kind) {
                Some(start) => start.1 = id,
                None => self.starts.push((kind, id)),
            }
        }
        Ok(new_ids)
    }

    /// Point every edge that goes to `from` at `to` instead, except for edges
    /// leaving the links named in `except`. Returns the number of edges changed.
    pub fn retarget(&mut self, from: &str, to: &str, except: &[&str]) -> Result<usize> {
        let from = Target::Link(self.id(from)?);
        let to = Target::Link(self.id(to)?);
        let except = except.iter().map(|n| self.id(n)).collect::<Result<Vec<_>>>()?;

        let mut changed = 0;
        let ids: Vec<LinkId> = (0..self.links.len()).map(LinkId::from).collect();
        for id in ids {
            if except.contains(&id) {
                continue;
            }
            for target in self.links.get_mut(id).targets_mut() {
                if *target == from {
                    *target = to;
                    changed += 1;
                }
            }
        }
        log::debug!("retargeted {changed} edges");
        Ok(changed)
    }

    pub fn set_default(&mut self, link: &str, target: Option<Target>) -> Result<()> {
        let id = self.id(link)?;
        self.links.get_mut(id).default = target;
        Ok(())
    }

    pub fn set_exit(&mut self, link: &str, code: i32, target: Target) -> Result<()> {
        let id = self.id(link)?;
        let exits = &mut self.links.get_mut(id).exits;
        match exits.iter_mut().find(|(c, _)| *c == code) {
            Some(exit) => exit.1 = target,
            None => exits.push((code, target)),
        }
        Ok(())
    }

    /// Validate and produce the new snapshot.
    pub fn build(self) -> Result<Graph> {
        let graph = Graph::from_parts(self.version, self.links, self.names, self.starts)?;
        log::info!("built workflow version {} with {} links", graph.version(), graph.len());
        Ok(graph)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Next;

    const FLOW: &str = r#"
start sip -> @a
link a { run per-unit x "" exit 0 -> @c default -> @b }
link b { run per-unit y "" default -> @c }
link c { run per-unit z "" }
"#;

    #[test]
    fn test_insert_link() -> Result<()> {
        let (graph, _) = Graph::load(syntax::parse(FLOW)?)?;
        let mut m = Migration::new(&graph);
        m.add(syntax::parse("link new { set Inserted = \"yes\" default -> @c }")?)?;
        let changed = m.retarget("c", "new", &["new"])?;
        assert_eq!(2, changed);
        let next = m.build()?;

        assert_eq!(2, next.version());
        assert_eq!(4, next.len());
        let a = next.require("a")?;
        let new = next.require("new")?;
        assert_eq!(Next::Link(new), next.resolve_next(a, 0)?);
        // the new link still goes to c:
        assert_eq!(Next::Link(next.require("c")?), next.resolve_next(new, 0)?);
        // the old snapshot is untouched:
        assert_eq!(Next::Link(graph.require("c")?), graph.resolve_next(a, 0)?);
        Ok(())
    }

    #[test]
    fn test_set_default_and_exit() -> Result<()> {
        let (graph, _) = Graph::load(syntax::parse(FLOW)?)?;
        let mut m = Migration::new(&graph);
        m.set_default("c", Some(Target::Done))?;
        let b = m.id("b")?;
        m.set_exit("a", 0, Target::Link(b))?;
        m.set_exit("a", 3, Target::Failed)?;
        assert!(m.set_default("nope", None).is_err());
        let next = m.build()?;
        let a = next.require("a")?;
        assert_eq!(Next::Link(b), next.resolve_next(a, 0)?);
        assert_eq!(Next::Failed, next.resolve_next(a, 3)?);
        assert_eq!(Next::Done, next.resolve_next(next.require("c")?, 1)?);
        Ok(())
    }

    #[test]
    fn test_replace_start() -> Result<()> {
        let (graph, _) = Graph::load(syntax::parse(FLOW)?)?;
        let mut m = Migration::new(&graph);
        m.add(syntax::parse("start sip -> @b\nstart transfer -> @c")?)?;
        let next = m.build()?;
        assert_eq!(next.by_name("b"), next.start_for("sip"));
        assert_eq!(next.by_name("c"), next.start_for("transfer"));
        Ok(())
    }
}
