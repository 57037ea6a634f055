use anyhow::{Context, Result};

use syntax::ast::Segment;

use crate::{Lookup, UnresolvedVariable};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Var(String),
}

/// A single word with `%variable%` references, ready to be rendered
/// against a variable lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pieces: Vec<Piece>,
}

impl Template {
    /// Parse one word (no splitting on whitespace).
    pub fn parse(text: &str) -> Result<Self> {
        let segments = syntax::template_segments(text)
            .with_context(|| format!("while parsing template \"{text}\""))?;
        let pieces = segments
            .into_iter()
            .map(|seg| match seg {
                Segment::Literal(s) => Piece::Text(s.to_owned()),
                Segment::Var(v) => Piece::Var(v.to_owned()),
            })
            .collect();
        Ok(Self { pieces })
    }

    /// Split `text` into shell-like words and parse each one.
    /// Values substituted into a word later never split it.
    pub fn parse_args(text: &str) -> Result<Vec<Self>> {
        let words = syntax::split_words(text)
            .with_context(|| format!("while splitting arguments \"{text}\""))?;
        words.iter().map(|w| Self::parse(w)).collect()
    }

    /// Substitute every variable reference, failing on the first unknown name.
    pub fn render(&self, vars: &impl Lookup) -> Result<String, UnresolvedVariable> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(s) => out.push_str(s),
                Piece::Var(name) => match vars.lookup(name) {
                    Some(val) => out.push_str(val),
                    None => return Err(UnresolvedVariable(name.clone())),
                },
            }
        }
        Ok(out)
    }

    /// Names of all variables referenced, in order of appearance.
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Var(v) => Some(v.as_str()),
            Piece::Text(_) => None,
        })
    }
}

/// Render a whole argument list.
pub fn render_all(args: &[Template], vars: &impl Lookup) -> Result<Vec<String>, UnresolvedVariable> {
    args.iter().map(|t| t.render(vars)).collect()
}
