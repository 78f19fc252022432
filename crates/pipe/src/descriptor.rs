//! # Stage Descriptors
//!
//! Stages whose shape is only known at runtime (loaded from configuration,
//! generated by another tool) describe their contract as JSON:
//!
//! ```json
//! {
//!   "name": "lookup",
//!   "params": [
//!     { "name": "table", "type": "dict[str, int]" },
//!     { "name": "key", "type": "str" }
//!   ],
//!   "returns": "int | none"
//! }
//! ```
//!
//! A descriptor is checked the same way a built stage is: missing types and
//! non-positional parameters are contract errors.

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, PipeError};
use crate::signature::{ParamDecl, ParamKind, Signature};
use crate::stage::Stage;
use crate::syntax::TypeParser;
use crate::ty::Ty;
use crate::value::Value;

fn positional() -> ParamKind {
    ParamKind::Positional
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(default = "positional")]
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

impl StageDescriptor {
    pub fn from_json(json: &str) -> Result<Self, PipeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The validated contract, with no nominal types known.
    pub fn signature(&self) -> Result<Signature, PipeError> {
        self.signature_with(&TypeParser::new())
    }

    /// The validated contract, resolving type names through `parser`.
    pub fn signature_with(&self, parser: &TypeParser) -> Result<Signature, PipeError> {
        let (params, ret) = self.decls(parser)?;
        Signature::validate(&self.name, params, ret)
    }

    fn decls(&self, parser: &TypeParser) -> Result<(Vec<ParamDecl>, Option<Ty>), PipeError> {
        let mut params = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let decl = match &param.ty {
                Some(text) => ParamDecl::new(&param.name, parser.parse(text)?),
                None => ParamDecl::untyped(&param.name),
            };
            params.push(decl.with_kind(param.kind));
        }
        let ret = self.returns.as_deref().map(|text| parser.parse(text)).transpose()?;
        Ok((params, ret))
    }

    /// A stage with this contract running `body`.
    pub fn into_stage<F>(self, body: F) -> Result<Stage, PipeError>
    where
        F: Fn(Vec<Value>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.into_stage_with(&TypeParser::new(), body)
    }

    pub fn into_stage_with<F>(self, parser: &TypeParser, body: F) -> Result<Stage, PipeError>
    where
        F: Fn(Vec<Value>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let (params, ret) = self.decls(parser)?;
        let mut builder = params.into_iter().fold(Stage::builder(self.name), |b, decl| b.decl(decl));
        if let Some(ret) = ret {
            builder = builder.returns(ret);
        }
        builder.build(body)
    }
}
