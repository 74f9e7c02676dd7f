//! Trait expressions: a small closed language for computing an output port's
//! trait from the node's resolved input traits.
//!
//! # Syntax
//!
//! ```text
//! Integer, Float, Plate96, Real   // trait constants
//! a, in1                          // input port names
//! Array[x], Any[x], Spread[x], Optional[x], Struct[x, y, ..]
//! x | y                           // union
//! upper(a, b, ..)                 // numeric promotion
//! first_arg(x)                    // sole type argument
//! ```
//!
//! Anything else is rejected: there is no general evaluation.

use crate::core::error::TraitError;
use crate::core::traits::{Kind, Trait};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Parse error
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected character: '{0}'")]
    UnexpectedChar(char),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token: '{0}'")]
    UnexpectedToken(String),

    #[error("unknown constructor: '{0}'")]
    UnknownConstructor(String),

    #[error("unknown function: '{0}'")]
    UnknownFunction(String),

    #[error("'{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Ident(String),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Pipe,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.next_char();
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_string()
    }

    fn next_lexeme(&mut self) -> Result<Lexeme, ParseError> {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.next_char();
        }

        let Some(c) = self.peek_char() else {
            return Ok(Lexeme::Eof);
        };

        let single = match c {
            '[' => Some(Lexeme::LBracket),
            ']' => Some(Lexeme::RBracket),
            '(' => Some(Lexeme::LParen),
            ')' => Some(Lexeme::RParen),
            ',' => Some(Lexeme::Comma),
            '|' => Some(Lexeme::Pipe),
            _ => None,
        };
        if let Some(lexeme) = single {
            self.next_char();
            return Ok(lexeme);
        }

        if c.is_alphabetic() || c == '_' {
            Ok(Lexeme::Ident(self.read_ident()))
        } else {
            Err(ParseError::UnexpectedChar(c))
        }
    }
}

// ============================================================================
// AST
// ============================================================================

/// Generic constructors usable in `Name[..]` position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrapper {
    Array,
    Any,
    Spread,
    Optional,
    Struct,
}

impl Wrapper {
    fn from_name(name: &str) -> Option<Wrapper> {
        match name {
            "Array" => Some(Wrapper::Array),
            "Any" => Some(Wrapper::Any),
            "Spread" => Some(Wrapper::Spread),
            "Optional" => Some(Wrapper::Optional),
            "Struct" => Some(Wrapper::Struct),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Wrapper::Array => "Array",
            Wrapper::Any => "Any",
            Wrapper::Spread => "Spread",
            Wrapper::Optional => "Optional",
            Wrapper::Struct => "Struct",
        }
    }

    fn build(self, mut args: Vec<Trait>) -> Trait {
        match self {
            Wrapper::Struct => Trait::Struct(args),
            _ => {
                let inner = args.remove(0);
                match self {
                    Wrapper::Array => Trait::array(inner),
                    Wrapper::Any => Trait::any(inner),
                    Wrapper::Spread => Trait::spread(inner),
                    _ => Trait::optional(inner),
                }
            }
        }
    }
}

/// A parsed trait expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TraitExpr {
    Const(Trait),
    Input(String),
    Wrap(Wrapper, Vec<TraitExpr>),
    Union(Vec<TraitExpr>),
    Upper(Vec<TraitExpr>),
    FirstArg(Box<TraitExpr>),
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Lexeme,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_lexeme()?;
        Ok(Self { lexer, current })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.lexer.next_lexeme()?;
        Ok(())
    }

    fn expect(&mut self, expected: Lexeme) -> Result<(), ParseError> {
        if self.current == expected {
            self.advance()
        } else if self.current == Lexeme::Eof {
            Err(ParseError::UnexpectedEnd)
        } else {
            Err(ParseError::UnexpectedToken(format!("{:?}", self.current)))
        }
    }

    fn parse_union(&mut self) -> Result<TraitExpr, ParseError> {
        let mut members = vec![self.parse_term()?];
        while self.current == Lexeme::Pipe {
            self.advance()?;
            members.push(self.parse_term()?);
        }
        Ok(if members.len() == 1 {
            members.remove(0)
        } else {
            TraitExpr::Union(members)
        })
    }

    fn parse_args(&mut self, close: Lexeme) -> Result<Vec<TraitExpr>, ParseError> {
        let mut args = vec![self.parse_union()?];
        while self.current == Lexeme::Comma {
            self.advance()?;
            args.push(self.parse_union()?);
        }
        self.expect(close)?;
        Ok(args)
    }

    fn parse_term(&mut self) -> Result<TraitExpr, ParseError> {
        let name = match &self.current {
            Lexeme::Ident(name) => name.clone(),
            Lexeme::Eof => return Err(ParseError::UnexpectedEnd),
            other => return Err(ParseError::UnexpectedToken(format!("{:?}", other))),
        };
        self.advance()?;

        match self.current {
            Lexeme::LBracket => {
                self.advance()?;
                let wrapper = Wrapper::from_name(&name)
                    .ok_or_else(|| ParseError::UnknownConstructor(name.clone()))?;
                let args = self.parse_args(Lexeme::RBracket)?;
                if wrapper != Wrapper::Struct && args.len() != 1 {
                    return Err(ParseError::Arity {
                        name,
                        expected: "1",
                        got: args.len(),
                    });
                }
                Ok(TraitExpr::Wrap(wrapper, args))
            }
            Lexeme::LParen => {
                self.advance()?;
                let mut args = self.parse_args(Lexeme::RParen)?;
                match name.as_str() {
                    "upper" => Ok(TraitExpr::Upper(args)),
                    "first_arg" if args.len() == 1 => {
                        Ok(TraitExpr::FirstArg(Box::new(args.remove(0))))
                    }
                    "first_arg" => Err(ParseError::Arity {
                        name,
                        expected: "1",
                        got: args.len(),
                    }),
                    _ => Err(ParseError::UnknownFunction(name)),
                }
            }
            _ => Ok(match name.as_str() {
                "Real" => TraitExpr::Const(Trait::real()),
                _ => match Kind::from_name(&name) {
                    Some(kind) => TraitExpr::Const(Trait::Kind(kind)),
                    None => TraitExpr::Input(name),
                },
            }),
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

impl TraitExpr {
    pub fn parse(input: &str) -> Result<TraitExpr, ParseError> {
        let mut parser = Parser::new(input)?;
        let expr = parser.parse_union()?;
        if parser.current != Lexeme::Eof {
            return Err(ParseError::UnexpectedToken(format!("{:?}", parser.current)));
        }
        Ok(expr)
    }

    /// Evaluates against the given input bindings. Names outside the bindings
    /// are rejected.
    pub fn eval(&self, bindings: &HashMap<String, Trait>) -> Result<Trait, TraitError> {
        let all = |exprs: &[TraitExpr]| -> Result<Vec<Trait>, TraitError> {
            exprs.iter().map(|e| e.eval(bindings)).collect()
        };
        match self {
            TraitExpr::Const(t) => Ok(t.clone()),
            TraitExpr::Input(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| TraitError::UnknownName(name.clone())),
            TraitExpr::Wrap(wrapper, args) => Ok(wrapper.build(all(args)?)),
            TraitExpr::Union(members) => Ok(Trait::union(all(members)?)),
            TraitExpr::Upper(args) => Trait::upper(&all(args)?),
            TraitExpr::FirstArg(inner) => Ok(inner.eval(bindings)?.first_arg()?.clone()),
        }
    }

    /// Input port names referenced by this expression.
    pub fn input_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_inputs(&mut names);
        names
    }

    fn collect_inputs<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            TraitExpr::Const(_) => {}
            TraitExpr::Input(name) => {
                names.insert(name);
            }
            TraitExpr::Wrap(_, args) | TraitExpr::Union(args) | TraitExpr::Upper(args) => {
                for arg in args {
                    arg.collect_inputs(names);
                }
            }
            TraitExpr::FirstArg(inner) => inner.collect_inputs(names),
        }
    }
}

impl fmt::Display for TraitExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, items: &[TraitExpr], sep: &str| -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        };
        match self {
            TraitExpr::Const(t) => write!(f, "{}", t),
            TraitExpr::Input(name) => f.write_str(name),
            TraitExpr::Wrap(wrapper, args) => {
                write!(f, "{}[", wrapper.name())?;
                list(f, args, ", ")?;
                f.write_str("]")
            }
            TraitExpr::Union(members) => list(f, members, " | "),
            TraitExpr::Upper(args) => {
                f.write_str("upper(")?;
                list(f, args, ", ")?;
                f.write_str(")")
            }
            TraitExpr::FirstArg(inner) => write!(f, "first_arg({})", inner),
        }
    }
}
