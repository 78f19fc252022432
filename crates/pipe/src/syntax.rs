//! # Type Syntax
//!
//! Textual types for stages assembled at runtime:
//!
//! ```text
//! int  float  str  bool  none  any
//! list[int]  set[str]  iterable  dict[str, list[int]]  mapping[str, any]
//! tuple[int, str]  callable[[int, int], str]  optional[int]
//! int | str
//! T                       single capital letter (optionally digits): placeholder
//! Animal                  a nominal type registered with the parser
//! ```
//!
//! Unknown names are an error rather than a fresh nominal type, so a typo
//! can't silently produce a type nothing else matches.

use std::collections::HashMap;

use crate::error::PipeError;
use crate::ty::{ContainerKind, Nominal, Ty};

/// Parse with no nominal types registered.
pub fn parse_type(input: &str) -> Result<Ty, PipeError> {
    TypeParser::new().parse(input)
}

/// Parser with a table of known nominal types.
#[derive(Debug, Clone, Default)]
pub struct TypeParser {
    nominals: HashMap<String, Nominal>,
}

impl TypeParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `nominal` (and its supertypes) resolvable by name.
    pub fn with_nominal(mut self, nominal: &Nominal) -> Self {
        let mut current = Some(nominal);
        while let Some(n) = current {
            self.nominals.entry(n.name.clone()).or_insert_with(|| n.clone());
            current = n.parent();
        }
        self
    }

    pub fn parse(&self, input: &str) -> Result<Ty, PipeError> {
        let mut cursor = Cursor {
            input,
            pos: 0,
            parser: self,
        };
        let ty = cursor.union()?;
        cursor.skip_ws();
        if cursor.pos != input.len() {
            return Err(cursor.error(format!("unexpected '{}'", &input[cursor.pos..])));
        }
        Ok(ty)
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
    parser: &'a TypeParser,
}

impl<'a> Cursor<'a> {
    fn error(&self, reason: impl Into<String>) -> PipeError {
        PipeError::TypeSyntax {
            input: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn skip_ws(&mut self) {
        let rest = &self.input[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.input[self.pos..].chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), PipeError> {
        if self.eat(c) {
            Ok(())
        } else {
            let found = self.peek().map_or("end of input".to_string(), |f| format!("'{f}'"));
            Err(self.error(format!("expected '{c}', found {found}")))
        }
    }

    fn ident(&mut self) -> Result<&'a str, PipeError> {
        self.skip_ws();
        let input = self.input;
        let rest = &input[self.pos..];
        let len = rest
            .char_indices()
            .find(|(i, c)| !(c.is_ascii_alphanumeric() || *c == '_') || (*i == 0 && c.is_ascii_digit()))
            .map_or(rest.len(), |(i, _)| i);
        if len == 0 {
            return Err(self.error(match rest.chars().next() {
                Some(c) => format!("expected a type name, found '{c}'"),
                None => "expected a type name, found end of input".to_string(),
            }));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn union(&mut self) -> Result<Ty, PipeError> {
        let mut arms = Vec::new();
        loop {
            match self.atom()? {
                Ty::Union(inner) => arms.extend(inner),
                ty => arms.push(ty),
            }
            if !self.eat('|') {
                break;
            }
        }
        let mut unique: Vec<Ty> = Vec::with_capacity(arms.len());
        for arm in arms {
            if !unique.contains(&arm) {
                unique.push(arm);
            }
        }
        Ok(if unique.len() == 1 {
            unique.remove(0)
        } else {
            Ty::Union(unique)
        })
    }

    /// Comma separated types up to `close`.
    fn list(&mut self, close: char) -> Result<Vec<Ty>, PipeError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.union()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(',')?;
        }
    }

    fn args(&mut self, name: &str, count: std::ops::RangeInclusive<usize>) -> Result<Vec<Ty>, PipeError> {
        if !self.eat('[') {
            return Ok(Vec::new());
        }
        let args = self.list(']')?;
        if !count.contains(&args.len()) {
            let expected = if count.start() == count.end() {
                count.start().to_string()
            } else if *count.end() == usize::MAX {
                format!("at least {}", count.start())
            } else {
                format!("{} to {}", count.start(), count.end())
            };
            return Err(self.error(format!("'{name}' takes {expected} type arguments, got {}", args.len())));
        }
        Ok(args)
    }

    fn container(&mut self, kind: ContainerKind, arity: usize) -> Result<Ty, PipeError> {
        let args = self.args(kind.as_str(), arity..=arity)?;
        Ok(Ty::Container { kind, args })
    }

    fn atom(&mut self) -> Result<Ty, PipeError> {
        let name = self.ident()?;
        match name {
            "int" => Ok(Ty::Int),
            "float" => Ok(Ty::Float),
            "str" => Ok(Ty::Str),
            "bool" => Ok(Ty::Bool),
            "none" | "None" => Ok(Ty::Unit),
            "any" | "Any" => Ok(Ty::Any),
            "list" => self.container(ContainerKind::List, 1),
            "set" => self.container(ContainerKind::Set, 1),
            "iterable" => self.container(ContainerKind::Iterable, 1),
            "dict" => self.container(ContainerKind::Dict, 2),
            "mapping" => self.container(ContainerKind::Mapping, 2),
            "tuple" => {
                let args = self.args("tuple", 1..=usize::MAX)?;
                Ok(Ty::tuple(args))
            }
            "optional" => {
                let mut args = self.args("optional", 1..=1)?;
                match args.pop() {
                    Some(inner) => Ok(Ty::optional(inner)),
                    None => Err(self.error("'optional' needs a type argument")),
                }
            }
            "callable" => self.callable(),
            _ if is_placeholder(name) => Ok(Ty::generic(name)),
            _ => match self.parser.nominals.get(name) {
                Some(nominal) => Ok(Ty::named(nominal)),
                None => Err(self.error(format!("unknown type '{name}'"))),
            },
        }
    }

    fn callable(&mut self) -> Result<Ty, PipeError> {
        if !self.eat('[') {
            return Ok(Ty::callable(Vec::new(), Ty::Any));
        }
        self.expect('[')?;
        let params = self.list(']')?;
        self.expect(',')?;
        let ret = self.union()?;
        self.expect(']')?;
        Ok(Ty::callable(params, ret))
    }
}

fn is_placeholder(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase()) && chars.all(|c| c.is_ascii_digit())
}
