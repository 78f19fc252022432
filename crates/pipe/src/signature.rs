//! Stage signatures: declared parameters and result type.
//!
//! Declarations come in as [`ParamDecl`]s, which may be incomplete (no type,
//! an unsupported kind). [`Signature::validate`] turns them into a complete
//! contract or reports which part is missing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipeError;
use crate::ty::{Bindings, Ty};
use crate::value::Value;

/// How a parameter is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Positional,
    /// Accepts any number of values.
    Variadic,
    /// Only settable by name.
    KeywordOnly,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Positional => write!(f, "positional"),
            ParamKind::Variadic => write!(f, "variadic"),
            ParamKind::KeywordOnly => write!(f, "keyword-only"),
        }
    }
}

/// A parameter as declared, before validation.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub ty: Option<Ty>,
    pub kind: ParamKind,
    pub default: Option<Value>,
}

impl ParamDecl {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty),
            kind: ParamKind::Positional,
            default: None,
        }
    }

    /// A parameter with no declared type.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            kind: ParamKind::Positional,
            default: None,
        }
    }

    pub fn with_kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A validated, positional parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
    pub default: Option<Value>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    /// Optional parameters have a default or admit "no value".
    pub fn is_optional(&self) -> bool {
        self.default.is_some() || self.ty.is_optional()
    }

    /// The same parameter with resolved placeholders substituted.
    pub fn resolved(&self, bindings: &Bindings) -> Param {
        Param {
            ty: self.ty.resolve(bindings),
            ..self.clone()
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)?;
        if self.default.is_some() {
            write!(f, " = ..")?;
        }
        Ok(())
    }
}

/// A complete stage contract.
#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<Param>,
    pub ret: Ty,
}

impl Signature {
    pub fn new(params: Vec<Param>, ret: Ty) -> Self {
        Self { params, ret }
    }

    /// Check that every parameter and the result carry a type and that
    /// every parameter can be filled positionally.
    pub fn validate(
        stage: &str,
        params: Vec<ParamDecl>,
        ret: Option<Ty>,
    ) -> Result<Signature, PipeError> {
        let mut checked = Vec::with_capacity(params.len());
        for decl in params {
            let Some(ty) = decl.ty else {
                return Err(PipeError::MissingParamType {
                    stage: stage.to_string(),
                    param: decl.name,
                });
            };
            if decl.kind != ParamKind::Positional {
                return Err(PipeError::UnsupportedParameter {
                    stage: stage.to_string(),
                    param: decl.name,
                    kind: decl.kind.to_string(),
                });
            }
            checked.push(Param {
                name: decl.name,
                ty,
                default: decl.default,
            });
        }
        let ret = ret.ok_or_else(|| PipeError::MissingReturnType {
            stage: stage.to_string(),
        })?;
        Ok(Signature::new(checked, ret))
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Parameters that must be supplied.
    pub fn required(&self) -> usize {
        self.params.iter().filter(|p| !p.is_optional()).count()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        write!(f, "({}) -> {}", params.join(", "), self.ret)
    }
}

/// Render a list of produced types the way error messages show them.
pub(crate) fn format_produced(types: &[Ty]) -> String {
    match types {
        [] => "none".to_string(),
        [single] => single.to_string(),
        many => {
            let parts: Vec<String> = many.iter().map(|t| t.to_string()).collect();
            format!("({})", parts.join(", "))
        }
    }
}
