use anyhow::Result;

use syntax::ast;
use util::HashMap;

use crate::{Error, Graph, LinkId};

/// Pre-configured automatic choices, keyed by choice link.
/// Each answer is the index of the chosen option.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Answers {
    by_link: HashMap<LinkId, usize>,
}

impl Answers {
    /// Load a processing configuration file, which may only contain `answers` blocks.
    pub fn load(items: Vec<ast::Item>, graph: &Graph) -> Result<Self> {
        let mut pairs = Vec::new();
        for item in items {
            match item {
                ast::Item::Answers(list) => pairs.extend(list),
                ast::Item::Link(block) => {
                    return Err(Error::UnexpectedItem("link", block.name.to_owned()).into())
                }
                ast::Item::Start(kind, _) => {
                    return Err(Error::UnexpectedItem("start", kind.to_owned()).into())
                }
            }
        }
        Self::from_pairs(&pairs, graph)
    }

    pub(crate) fn from_pairs(pairs: &[(&str, &str)], graph: &Graph) -> Result<Self> {
        let mut by_link = util::hash_map(pairs.len());
        for (link_name, option_name) in pairs {
            let (id, idx) = find_option(graph, link_name, option_name)?;
            if by_link.insert(id, idx).is_some() {
                return Err(Error::DuplicateAnswer(link_name.to_string()).into());
            }
        }
        Ok(Self { by_link })
    }

    /// Add answers from `other`; on conflict `other` wins.
    pub fn extend(&mut self, other: Answers) {
        for (link, idx) in other.by_link {
            if let Some(prev) = self.by_link.insert(link, idx) {
                if prev != idx {
                    log::debug!("automatic answer for link {link:?} overridden");
                }
            }
        }
    }

    /// Index of the option chosen automatically for this link, if any.
    pub fn get(&self, link: LinkId) -> Option<usize> {
        self.by_link.get(&link).copied()
    }

    pub fn len(&self) -> usize {
        self.by_link.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_link.is_empty()
    }

    /// Carry answers over to a new snapshot by link and option name.
    /// Answers whose link or option no longer exists are dropped.
    pub fn remap(&self, old: &Graph, new: &Graph) -> Self {
        let mut by_link = util::hash_map(self.by_link.len());
        for (&link, &idx) in &self.by_link {
            let name = old.name(link);
            let option = old
                .get(link)
                .ok()
                .and_then(|l| l.task.options())
                .and_then(|opts| opts.get(idx))
                .map(|o| o.name.as_str());
            match option.and_then(|opt| find_option(new, name, opt).ok()) {
                Some((id, new_idx)) => {
                    by_link.insert(id, new_idx);
                }
                None => log::warn!("dropping automatic answer for link \"{name}\""),
            }
        }
        Self { by_link }
    }
}

fn find_option(graph: &Graph, link_name: &str, option_name: &str) -> Result<(LinkId, usize)> {
    let id = graph
        .by_name(link_name)
        .ok_or_else(|| Error::AnswerForUnknownLink(link_name.to_owned()))?;
    let options = graph
        .get(id)?
        .task
        .options()
        .ok_or_else(|| Error::AnswerForNonChoice(link_name.to_owned()))?;
    let idx = options
        .iter()
        .position(|o| o.name == option_name)
        .ok_or_else(|| Error::UnknownOption(link_name.to_owned(), option_name.to_owned()))?;
    Ok((id, idx))
}

#[cfg(test)]
mod test {
    use super::*;

    const FLOW: &str = r#"
start sip -> @bind_choice
link bind_choice {
    choice {
        option yes "Yes" { BindPIDs = "True" }
        option no "No" { BindPIDs = "False" }
    }
    default -> done
}
link other { set X = "y" }
answers { bind_choice = no }
"#;

    #[test]
    fn test_answers_from_workflow() -> Result<()> {
        let (graph, answers) = Graph::load(syntax::parse(FLOW)?)?;
        let link = graph.require("bind_choice")?;
        assert_eq!(Some(1), answers.get(link));
        assert_eq!(1, answers.len());
        Ok(())
    }

    #[test]
    fn test_answers_file_overrides() -> Result<()> {
        let (graph, mut answers) = Graph::load(syntax::parse(FLOW)?)?;
        let extra = Answers::load(syntax::parse("answers { bind_choice = yes }")?, &graph)?;
        answers.extend(extra);
        assert_eq!(Some(0), answers.get(graph.require("bind_choice")?));
        Ok(())
    }

    #[test]
    fn test_invalid_answers() -> Result<()> {
        let (graph, _) = Graph::load(syntax::parse(FLOW)?)?;
        let bad = |text: &str| -> Result<Error> {
            let e = Answers::load(syntax::parse(text)?, &graph).unwrap_err();
            Ok(e.downcast::<Error>()?)
        };
        assert_eq!(
            Error::AnswerForUnknownLink("nope".to_owned()),
            bad("answers { nope = yes }")?
        );
        assert_eq!(
            Error::AnswerForNonChoice("other".to_owned()),
            bad("answers { other = yes }")?
        );
        assert_eq!(
            Error::UnknownOption("bind_choice".to_owned(), "maybe".to_owned()),
            bad("answers { bind_choice = maybe }")?
        );
        assert_eq!(
            Error::DuplicateAnswer("bind_choice".to_owned()),
            bad("answers { bind_choice = yes bind_choice = no }")?
        );
        assert!(matches!(
            bad("link x { goto-magic }")?,
            Error::UnexpectedItem("link", _)
        ));
        Ok(())
    }
}
