//! # Stages
//!
//! A [`Stage`] is a typed unit of pipeline work: a name, a [`Signature`],
//! and a body. Stages are immutable; binds and composition return new
//! stages and leave their inputs reusable.
//!
//! ## Creating stages
//!
//! Stages with a shape known at compile time derive their contract from
//! the closure's types:
//!
//! ```rust
//! use compositional_pipe::{args, Stage};
//!
//! let add = Stage::from_fn2("add", ["x", "y"], |x: i64, y: i64| x + y);
//! assert_eq!(add.signature().to_string(), "(x: int, y: int) -> int");
//!
//! let out = add.call(args![1_i64, 2_i64]).unwrap();
//! assert_eq!(out.get::<i64>().unwrap(), 3);
//! ```
//!
//! Stages assembled at runtime spell out their contract with
//! [`Stage::builder`] (or load it from a [`crate::StageDescriptor`]).
//!
//! ## Failures
//!
//! A body that fails with a foreign error surfaces as
//! [`PipeError::StepFailed`] naming the stage; errors that already are
//! [`PipeError`]s pass through untouched.

use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, PipeError};
use crate::fan::FanIn;
use crate::node::{Node, ReadBind};
use crate::signature::{Param, ParamDecl, Signature};
use crate::store::Context;
use crate::ty::{Bindings, Ty};
use crate::value::{Args, Typed, Value};

/// A stage body, called with fully assembled positional arguments.
pub(crate) trait Invoke: Send + Sync {
    fn invoke(&self, stage: &str, ctx: &mut Context, args: Vec<Value>) -> Result<Value, PipeError>;
}

type RunFn = dyn Fn(Vec<Value>) -> Result<Value, BoxError> + Send + Sync;

/// A user function.
struct FnBody {
    run: Box<RunFn>,
}

impl Invoke for FnBody {
    fn invoke(&self, stage: &str, ctx: &mut Context, args: Vec<Value>) -> Result<Value, PipeError> {
        ctx.traced(stage, |_| {
            (self.run)(args).map_err(|err| PipeError::from_step(stage, err))
        })
    }
}

/// Which end of the parameter list a read bind claims from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    First,
    Last,
}

impl Side {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Side::First => "start",
            Side::Last => "end",
        }
    }
}

/// A parameter claimed by a read bind.
#[derive(Debug, Clone)]
pub(crate) struct Claim {
    pub name: String,
    pub param: usize,
}

/// A store access a stage performs in its caller's scope.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEffect {
    Read {
        name: String,
        stage: String,
        param: String,
        ty: Ty,
    },
    Write {
        name: String,
        stage: String,
        ty: Ty,
    },
}

impl StoreEffect {
    pub fn name(&self) -> &str {
        match self {
            StoreEffect::Read { name, .. } | StoreEffect::Write { name, .. } => name,
        }
    }

    pub(crate) fn resolve(&self, bindings: &Bindings) -> StoreEffect {
        match self {
            StoreEffect::Read {
                name,
                stage,
                param,
                ty,
            } => StoreEffect::Read {
                name: name.clone(),
                stage: stage.clone(),
                param: param.clone(),
                ty: ty.resolve(bindings),
            },
            StoreEffect::Write { name, stage, ty } => StoreEffect::Write {
                name: name.clone(),
                stage: stage.clone(),
                ty: ty.resolve(bindings),
            },
        }
    }
}

/// A typed unit of pipeline work.
#[derive(Clone)]
pub struct Stage {
    pub(crate) name: String,
    pub(crate) signature: Signature,
    pub(crate) ingest: bool,
    pub(crate) claims: Vec<Claim>,
    pub(crate) write: Option<String>,
    /// Store effects of the stages this one runs in the same scope.
    pub(crate) inner_effects: Vec<StoreEffect>,
    pub(crate) fan_in: Option<FanIn>,
    pub(crate) node: Node,
    pub(crate) body: Arc<dyn Invoke>,
}

impl Stage {
    pub(crate) fn from_parts(
        name: impl Into<String>,
        signature: Signature,
        node: Node,
        body: Arc<dyn Invoke>,
    ) -> Stage {
        Stage {
            name: name.into(),
            signature,
            ingest: true,
            claims: Vec::new(),
            write: None,
            inner_effects: Vec::new(),
            fan_in: None,
            node,
            body,
        }
    }

    fn leaf(name: String, signature: Signature, run: Box<RunFn>) -> Stage {
        let node = Node::stage(name.clone(), signature.to_string());
        Stage::from_parts(name, signature, node, Arc::new(FnBody { run }))
    }

    fn typed(name: String, params: &[&str], tys: Vec<Ty>, ret: Ty, run: Box<RunFn>) -> Stage {
        let params = params
            .iter()
            .zip(tys)
            .map(|(name, ty)| Param::new(*name, ty))
            .collect();
        Stage::leaf(name, Signature::new(params, ret), run)
    }

    /// A stage without parameters.
    pub fn from_fn0<R, F>(name: impl Into<String>, f: F) -> Stage
    where
        R: Typed,
        F: Fn() -> R + Send + Sync + 'static,
    {
        Stage::typed(
            name.into(),
            &[],
            Vec::new(),
            R::ty(),
            Box::new(move |_: Vec<Value>| -> Result<Value, BoxError> { Ok(f().into_value()) }),
        )
    }

    /// A fallible stage without parameters.
    pub fn try_fn0<R, E, F>(name: impl Into<String>, f: F) -> Stage
    where
        R: Typed,
        E: Into<BoxError>,
        F: Fn() -> Result<R, E> + Send + Sync + 'static,
    {
        Stage::typed(
            name.into(),
            &[],
            Vec::new(),
            R::ty(),
            Box::new(move |_: Vec<Value>| -> Result<Value, BoxError> {
                f().map(Typed::into_value).map_err(Into::into)
            }),
        )
    }

    /// Start an explicit contract for a stage assembled at runtime.
    pub fn builder(name: impl Into<String>) -> StageBuilder {
        StageBuilder {
            name: name.into(),
            params: Vec::new(),
            ret: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same stage under another name.
    pub fn named(mut self, name: impl Into<String>) -> Stage {
        let name = name.into();
        if let Node::Stage { name: label, .. } = &mut self.node {
            *label = name.clone();
        }
        self.name = name;
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Whether read binds are allowed.
    pub fn is_ingesting(&self) -> bool {
        self.ingest
    }

    /// Refuse read binds from now on.
    pub fn no_ingest(mut self) -> Stage {
        self.ingest = false;
        self
    }

    /// Parameters the caller supplies, i.e. those not fed from the store.
    pub fn free_params(&self) -> Vec<&Param> {
        self.signature
            .params
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.is_claimed(*i))
            .map(|(_, p)| p)
            .collect()
    }

    pub(crate) fn is_claimed(&self, index: usize) -> bool {
        self.claims.iter().any(|c| c.param == index)
    }

    /// The step tree rooted at this stage.
    pub fn node(&self) -> Node {
        if self.claims.is_empty() && self.write.is_none() {
            return self.node.clone();
        }
        Node::Bound {
            stage: Box::new(self.node.clone()),
            reads: self
                .claims
                .iter()
                .map(|c| ReadBind {
                    name: c.name.clone(),
                    param: self.signature.params[c.param].name.clone(),
                })
                .collect(),
            write: self.write.clone(),
        }
    }

    /// Store accesses this stage performs in its caller's scope, in order.
    pub fn effects(&self) -> Vec<StoreEffect> {
        let mut effects: Vec<StoreEffect> = self
            .claims
            .iter()
            .map(|c| {
                let param = &self.signature.params[c.param];
                StoreEffect::Read {
                    name: c.name.clone(),
                    stage: self.name.clone(),
                    param: param.name.clone(),
                    ty: param.ty.clone(),
                }
            })
            .collect();
        effects.extend(self.inner_effects.iter().cloned());
        if let Some(name) = &self.write {
            effects.push(StoreEffect::Write {
                name: name.clone(),
                stage: self.name.clone(),
                ty: self.signature.ret.clone(),
            });
        }
        effects
    }

    /// Call in a fresh context.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, PipeError> {
        let mut ctx = Context::new();
        self.call_in(&mut ctx, args)
    }

    /// Call with the caller's context, reading and writing its active scope.
    pub fn call_in(&self, ctx: &mut Context, args: Vec<Value>) -> Result<Value, PipeError> {
        tracing::trace!(stage = %self.name, args = args.len(), "calling stage");
        let args = self.assemble(ctx, args)?;
        let result = self.body.invoke(&self.name, ctx, args)?;
        if let Some(name) = &self.write {
            ctx.store_mut()
                .write_typed(name, result.clone(), self.signature.ret.clone())?;
        }
        Ok(result)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("ingest", &self.ingest)
            .field("claims", &self.claims)
            .field("write", &self.write)
            .finish()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.signature)
    }
}

macro_rules! typed_constructors {
    ($($from:ident, $try:ident, $n:literal => $($arg:ident),+;)+) => {
        impl Stage {
            $(
                #[doc = concat!("A stage of ", stringify!($n), " parameters, typed from the closure.")]
                pub fn $from<$($arg,)+ R, F>(name: impl Into<String>, params: [&str; $n], f: F) -> Stage
                where
                    $($arg: Typed,)+
                    R: Typed,
                    F: Fn($($arg),+) -> R + Send + Sync + 'static,
                {
                    Stage::typed(
                        name.into(),
                        &params,
                        vec![$($arg::ty()),+],
                        R::ty(),
                        Box::new(move |values: Vec<Value>| -> Result<Value, BoxError> {
                            let mut args = Args::new(values);
                            Ok(f($(args.next::<$arg>()?),+).into_value())
                        }),
                    )
                }

                #[doc = concat!("A fallible stage of ", stringify!($n), " parameters.")]
                pub fn $try<$($arg,)+ R, E, F>(name: impl Into<String>, params: [&str; $n], f: F) -> Stage
                where
                    $($arg: Typed,)+
                    R: Typed,
                    E: Into<BoxError>,
                    F: Fn($($arg),+) -> Result<R, E> + Send + Sync + 'static,
                {
                    Stage::typed(
                        name.into(),
                        &params,
                        vec![$($arg::ty()),+],
                        R::ty(),
                        Box::new(move |values: Vec<Value>| -> Result<Value, BoxError> {
                            let mut args = Args::new(values);
                            let out = f($(args.next::<$arg>()?),+).map_err(Into::<BoxError>::into)?;
                            Ok(out.into_value())
                        }),
                    )
                }
            )+
        }
    };
}

typed_constructors! {
    from_fn1, try_fn1, 1 => A;
    from_fn2, try_fn2, 2 => A, B;
    from_fn3, try_fn3, 3 => A, B, C;
    from_fn4, try_fn4, 4 => A, B, C, D;
}

/// Explicit contract for a stage whose shape is only known at runtime.
///
/// ```rust
/// use compositional_pipe::{args, Args, Stage, Ty, Value};
///
/// let concat = Stage::builder("concat")
///     .param("a", Ty::Str)
///     .param("b", Ty::Str)
///     .returns(Ty::Str)
///     .build(|values| {
///         let mut args = Args::new(values);
///         let a: String = args.next()?;
///         let b: String = args.next()?;
///         Ok(Value::new(a + &b))
///     })
///     .unwrap();
///
/// let out = concat.call(args!["ab".to_string(), "c".to_string()]).unwrap();
/// assert_eq!(out.get::<String>().unwrap(), "abc");
/// ```
#[derive(Debug)]
pub struct StageBuilder {
    name: String,
    params: Vec<ParamDecl>,
    ret: Option<Ty>,
}

impl StageBuilder {
    pub fn param(mut self, name: impl Into<String>, ty: Ty) -> Self {
        self.params.push(ParamDecl::new(name, ty));
        self
    }

    /// A parameter filled with `default` when the caller leaves it out.
    pub fn param_with_default(mut self, name: impl Into<String>, ty: Ty, default: Value) -> Self {
        self.params.push(ParamDecl::new(name, ty).with_default(default));
        self
    }

    /// A raw declaration; validated by [`StageBuilder::build`].
    pub fn decl(mut self, decl: ParamDecl) -> Self {
        self.params.push(decl);
        self
    }

    pub fn returns(mut self, ty: Ty) -> Self {
        self.ret = Some(ty);
        self
    }

    /// Validate the contract and attach the body.
    pub fn build<F>(self, body: F) -> Result<Stage, PipeError>
    where
        F: Fn(Vec<Value>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let signature = Signature::validate(&self.name, self.params, self.ret)?;
        Ok(Stage::leaf(self.name, signature, Box::new(body)))
    }
}
