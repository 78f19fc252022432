//! # Store Binds
//!
//! Binds attach store access to a stage without changing what it computes:
//!
//! - [`Stage::write_to`] stores the stage's result under a name after it runs;
//! - [`Stage::read_first`] / [`Stage::read_last`] feed a parameter from the
//!   store, claiming the first (or last) parameter no earlier bind claimed.
//!
//! Every bind returns a new stage; the original stays usable, so the same
//! stage can be bound in several ways:
//!
//! ```rust
//! use compositional_pipe::{args, Context, Stage};
//!
//! let sub = Stage::from_fn2("sub", ["a", "b"], |a: i64, b: i64| a - b);
//! let from_store = sub.read_first("p").unwrap();
//!
//! let mut ctx = Context::new();
//! ctx.store_mut().insert("p", 12_i64).unwrap();
//! let out = from_store.call_in(&mut ctx, args![5_i64]).unwrap();
//! assert_eq!(out.get::<i64>().unwrap(), 7);
//!
//! // the unbound stage still takes both arguments
//! assert_eq!(sub.call(args![3_i64, 1_i64]).unwrap().get::<i64>().unwrap(), 2);
//! ```

use crate::check::is_compatible;
use crate::error::PipeError;
use crate::stage::{Claim, Side, Stage};
use crate::store::Context;
use crate::value::Value;

impl Stage {
    /// Store the result under `name` after every call.
    pub fn write_to(&self, name: impl AsRef<str>) -> Result<Stage, PipeError> {
        let name = name.as_ref();
        if let Some(existing) = &self.write {
            return Err(PipeError::WriteAlreadyBound {
                stage: self.name.clone(),
                existing: existing.clone(),
            });
        }
        if self.signature.ret.is_unit() {
            return Err(PipeError::InvalidStoreType {
                name: name.to_string(),
                ty: self.signature.ret.to_string(),
            });
        }
        let mut bound = self.clone();
        bound.write = Some(name.to_string());
        Ok(bound)
    }

    /// Feed the first unclaimed parameter from the store entry `name`.
    pub fn read_first(&self, name: impl AsRef<str>) -> Result<Stage, PipeError> {
        self.read(name.as_ref(), Side::First)
    }

    /// Feed the last unclaimed parameter from the store entry `name`.
    pub fn read_last(&self, name: impl AsRef<str>) -> Result<Stage, PipeError> {
        self.read(name.as_ref(), Side::Last)
    }

    fn read(&self, name: &str, side: Side) -> Result<Stage, PipeError> {
        if !self.ingest {
            return Err(PipeError::IngestNotAllowed {
                stage: self.name.clone(),
            });
        }
        let mut free = (0..self.signature.params.len()).filter(|i| !self.is_claimed(*i));
        let param = match side {
            Side::First => free.next(),
            Side::Last => free.next_back(),
        }
        .ok_or_else(|| PipeError::NoFreeParameter {
            stage: self.name.clone(),
            name: name.to_string(),
            side: side.as_str(),
        })?;

        let mut bound = self.clone();
        bound.claims.push(Claim {
            name: name.to_string(),
            param,
        });
        Ok(bound)
    }

    /// Build the full positional argument list: claimed parameters come from
    /// the active store, the rest from `args` in order, missing optional
    /// parameters from their defaults.
    pub(crate) fn assemble(&self, ctx: &Context, args: Vec<Value>) -> Result<Vec<Value>, PipeError> {
        let params = &self.signature.params;
        if self.claims.is_empty() && args.len() == params.len() {
            return Ok(args);
        }

        let free = self.free_params();
        let required = free.iter().filter(|p| !p.is_optional()).count();
        if args.len() < required || args.len() > free.len() {
            let expected = if required == free.len() {
                required.to_string()
            } else {
                format!("{required}..={}", free.len())
            };
            return Err(PipeError::ArgumentCount {
                stage: self.name.clone(),
                expected,
                got: args.len(),
            });
        }

        let store = ctx.store();
        let mut supplied = args.into_iter();
        let mut full = Vec::with_capacity(params.len());
        for (index, param) in params.iter().enumerate() {
            if let Some(claim) = self.claims.iter().find(|c| c.param == index) {
                let value = store.read(&claim.name)?;
                if let Ok(actual) = store.type_of(&claim.name) {
                    if !is_compatible(actual, &param.ty) {
                        return Err(PipeError::StoreTypeMismatch {
                            name: claim.name.clone(),
                            stage: self.name.clone(),
                            param: param.name.clone(),
                            expected: param.ty.to_string(),
                            actual: actual.to_string(),
                        });
                    }
                }
                full.push(value);
            } else if let Some(value) = supplied.next() {
                full.push(value);
            } else {
                full.push(param.default.clone().unwrap_or(Value::Unit));
            }
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::node::Node;
    use crate::store::StoreKey;
    use crate::ty::Ty;

    fn sub() -> Stage {
        Stage::from_fn2("sub", ["a", "b"], |a: i64, b: i64| a - b)
    }

    fn mul() -> Stage {
        Stage::from_fn2("mul", ["x", "y"], |x: i64, y: i64| x * y)
    }

    #[test]
    fn test_write_then_read_in_one_context() {
        let mul = mul().write_to("p").unwrap();
        let sub = sub().read_first("p").unwrap();

        let mut ctx = Context::new();
        mul.call_in(&mut ctx, args![3_i64, 4_i64]).unwrap();
        assert_eq!(ctx.store().type_of("p").unwrap(), &Ty::Int);

        let out = sub.call_in(&mut ctx, args![5_i64]).unwrap();
        assert_eq!(out.get::<i64>().unwrap(), 7);
    }

    #[test]
    fn test_read_last_claims_from_the_end() {
        let sub = sub().read_last("p").unwrap();
        let mut ctx = Context::new();
        ctx.store_mut().insert("p", 2_i64).unwrap();
        let out = sub.call_in(&mut ctx, args![10_i64]).unwrap();
        assert_eq!(out.get::<i64>().unwrap(), 8);
    }

    #[test]
    fn test_chained_reads_skip_claimed() {
        let both = sub().read_first("a").unwrap().read_first("b").unwrap();
        assert!(both.free_params().is_empty());

        let mut ctx = Context::new();
        ctx.store_mut().insert("a", 9_i64).unwrap();
        ctx.store_mut().insert("b", 4_i64).unwrap();
        assert_eq!(both.call_in(&mut ctx, args![]).unwrap().get::<i64>().unwrap(), 5);

        let err = both.read_last("c").unwrap_err();
        assert!(matches!(err, PipeError::NoFreeParameter { side: "end", .. }));
    }

    #[test]
    fn test_binds_are_copy_on_write() {
        let base = sub();
        let bound = base.read_first("p").unwrap().write_to("q").unwrap();
        assert_eq!(base.free_params().len(), 2);
        assert!(base.effects().is_empty());
        assert_eq!(bound.free_params().len(), 1);
        assert_eq!(bound.effects().len(), 2);
        assert!(matches!(bound.node(), Node::Bound { .. }));
        assert!(matches!(base.node(), Node::Stage { .. }));
    }

    #[test]
    fn test_single_write_per_stage() {
        let once = mul().write_to("p").unwrap();
        let err = once.write_to("q").unwrap_err();
        assert!(matches!(err, PipeError::WriteAlreadyBound { ref existing, .. } if existing == "p"));
    }

    #[test]
    fn test_unit_result_cannot_be_stored() {
        let log = Stage::from_fn1("log", ["msg"], |_msg: String| ());
        assert!(matches!(log.write_to("x"), Err(PipeError::InvalidStoreType { .. })));
    }

    #[test]
    fn test_non_ingesting_refuses_reads_but_not_writes() {
        let stage = mul().no_ingest();
        assert!(matches!(stage.read_first("p"), Err(PipeError::IngestNotAllowed { .. })));
        assert!(stage.write_to("p").is_ok());
    }

    #[test]
    fn test_second_write_in_same_scope_fails() {
        let mul = mul().write_to("p").unwrap();
        let mut ctx = Context::new();
        mul.call_in(&mut ctx, args![1_i64, 1_i64]).unwrap();
        let err = mul.call_in(&mut ctx, args![2_i64, 2_i64]).unwrap_err();
        assert!(matches!(err, PipeError::AttributeExists { .. }));
    }

    #[test]
    fn test_runtime_type_check() {
        let sub = sub().read_first("p").unwrap();
        let mut ctx = Context::new();
        ctx.store_mut().insert("p", "twelve".to_string()).unwrap();
        let err = sub.call_in(&mut ctx, args![1_i64]).unwrap_err();
        assert!(matches!(err, PipeError::StoreTypeMismatch { ref param, .. } if param == "a"));
    }

    #[test]
    fn test_missing_entry() {
        let sub = sub().read_first("p").unwrap();
        let err = sub.call(args![1_i64]).unwrap_err();
        assert!(matches!(err, PipeError::AttributeNotFound { ref name, .. } if name == "p"));
    }

    #[test]
    fn test_generated_keys() {
        let key = StoreKey::new();
        let mul = mul().write_to(&key).unwrap();
        let sub = sub().read_first(&key).unwrap();
        let mut ctx = Context::new();
        mul.call_in(&mut ctx, args![2_i64, 5_i64]).unwrap();
        let out = sub.call_in(&mut ctx, args![3_i64]).unwrap();
        assert_eq!(out.get::<i64>().unwrap(), 7);
        assert!(ctx.store().contains(key.as_str()));
    }
}
