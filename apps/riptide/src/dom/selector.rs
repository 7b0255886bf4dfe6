//! The selector subset the server emits for patch targets: type, universal,
//! id, class and attribute selectors, `:not(..)`, descendant and child
//! combinators, and comma-separated lists.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::{Document, NodeId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("selector {selector:?} ends unexpectedly")]
    UnexpectedEnd { selector: String },
    #[error("unexpected {found:?} at offset {offset} in selector {selector:?}")]
    Unexpected {
        found: char,
        offset: usize,
        selector: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Simple {
    Universal,
    Tag(String),
    Id(String),
    Class(String),
    Attr { name: String, value: Option<String> },
    Not(Compound),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Compound(Vec<Simple>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    subject: Compound,
    // Compounds to the left of the subject, nearest first.
    ancestry: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        if input.trim().is_empty() {
            return Err(SelectorError::Empty);
        }
        let mut parser = Parser { input, pos: 0 };
        let alternatives = parser.list()?;
        Ok(Self {
            source: input.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|complex| complex.subject.matches(doc, node) && ancestry_matches(doc, node, &complex.ancestry))
    }

    /// First descendant of `scope` in document order that matches.
    pub fn first(&self, doc: &Document, scope: NodeId) -> Option<NodeId> {
        doc.descendants(scope)
            .into_iter()
            .find(|node| self.matches(doc, *node))
    }

    pub fn all(&self, doc: &Document, scope: NodeId) -> Vec<NodeId> {
        doc.descendants(scope)
            .into_iter()
            .filter(|node| self.matches(doc, *node))
            .collect()
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Compound {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(element) = doc.element(node) else {
            return false;
        };
        self.0.iter().all(|simple| match simple {
            Simple::Universal => true,
            Simple::Tag(tag) => element.tag() == tag,
            Simple::Id(id) => element.attr("id") == Some(id.as_str()),
            Simple::Class(class) => element
                .attr("class")
                .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class)),
            Simple::Attr { name, value } => match (element.attr(name), value) {
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == expected,
                (None, _) => false,
            },
            Simple::Not(inner) => !inner.matches(doc, node),
        })
    }
}

fn ancestry_matches(doc: &Document, node: NodeId, ancestry: &[(Combinator, Compound)]) -> bool {
    let Some(((combinator, compound), rest)) = ancestry.split_first() else {
        return true;
    };
    match combinator {
        Combinator::Child => doc
            .parent(node)
            .is_some_and(|parent| compound.matches(doc, parent) && ancestry_matches(doc, parent, rest)),
        Combinator::Descendant => doc
            .ancestors(node)
            .any(|ancestor| compound.matches(doc, ancestor) && ancestry_matches(doc, ancestor, rest)),
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Skips whitespace; returns whether any was skipped.
    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
        self.pos != start
    }

    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(found) => SelectorError::Unexpected {
                found,
                offset: self.pos,
                selector: self.input.to_string(),
            },
            None => SelectorError::UnexpectedEnd {
                selector: self.input.to_string(),
            },
        }
    }

    fn expect(&mut self, wanted: char) -> Result<(), SelectorError> {
        if self.peek() == Some(wanted) {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn list(&mut self) -> Result<Vec<Complex>, SelectorError> {
        let mut alternatives = Vec::new();
        loop {
            self.skip_ws();
            alternatives.push(self.complex()?);
            match self.peek() {
                None => return Ok(alternatives),
                Some(',') => {
                    self.bump();
                }
                Some(_) => return Err(self.unexpected()),
            }
        }
    }

    fn complex(&mut self) -> Result<Complex, SelectorError> {
        let mut compounds = vec![self.compound()?];
        let mut combinators = Vec::new();
        loop {
            let spaced = self.skip_ws();
            let combinator = match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.bump();
                    self.skip_ws();
                    Combinator::Child
                }
                Some(_) if spaced => Combinator::Descendant,
                Some(_) => return Err(self.unexpected()),
            };
            combinators.push(combinator);
            compounds.push(self.compound()?);
        }

        let subject = compounds.pop().ok_or(SelectorError::Empty)?;
        let ancestry = combinators.into_iter().zip(compounds).rev().collect();
        Ok(Complex { subject, ancestry })
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let mut simples = Vec::new();
        match self.peek() {
            Some('*') => {
                self.bump();
                simples.push(Simple::Universal);
            }
            Some(c) if is_ident_char(c) => simples.push(Simple::Tag(self.ident().to_ascii_lowercase())),
            _ => {}
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.bump();
                    let id = self.required_ident()?;
                    simples.push(Simple::Id(id));
                }
                Some('.') => {
                    self.bump();
                    let class = self.required_ident()?;
                    simples.push(Simple::Class(class));
                }
                Some('[') => {
                    self.bump();
                    simples.push(self.attribute()?);
                }
                Some(':') => {
                    self.bump();
                    let pseudo = self.required_ident()?;
                    if !pseudo.eq_ignore_ascii_case("not") {
                        // Only `:not` is understood; point at the pseudo-class name.
                        self.pos -= pseudo.len();
                        return Err(self.unexpected());
                    }
                    self.expect('(')?;
                    self.skip_ws();
                    let inner = self.compound()?;
                    self.skip_ws();
                    self.expect(')')?;
                    simples.push(Simple::Not(inner));
                }
                _ => break,
            }
        }

        if simples.is_empty() {
            return Err(self.unexpected());
        }
        Ok(Compound(simples))
    }

    fn attribute(&mut self) -> Result<Simple, SelectorError> {
        self.skip_ws();
        let name = self.required_ident()?.to_ascii_lowercase();
        self.skip_ws();
        let value = match self.peek() {
            Some('=') => {
                self.bump();
                self.skip_ws();
                let value = match self.peek() {
                    Some(quote @ ('"' | '\'')) => {
                        self.bump();
                        self.quoted(quote)?
                    }
                    _ => self.required_ident()?,
                };
                self.skip_ws();
                Some(value)
            }
            _ => None,
        };
        self.expect(']')?;
        Ok(Simple::Attr { name, value })
    }

    fn quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some(escaped) => out.push(escaped),
                    None => return Err(self.unexpected()),
                },
                Some(c) => out.push(c),
                None => return Err(self.unexpected()),
            }
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        self.input[start..self.pos].to_string()
    }

    fn required_ident(&mut self) -> Result<String, SelectorError> {
        let ident = self.ident();
        if ident.is_empty() {
            return Err(self.unexpected());
        }
        Ok(ident)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}
