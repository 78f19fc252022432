//! # Type Compatibility
//!
//! Decides whether a produced type may flow into a declared parameter.
//!
//! ## Rules, in order
//!
//! 1. Equal types are compatible; `Any` accepts everything.
//! 2. `int` widens to `float`.
//! 3. An expected placeholder binds to the produced type, unless it is already
//!    bound to something the produced type doesn't fit. An unresolved produced
//!    placeholder fits whatever its bound and constraints allow, and is
//!    narrowed to the concrete parameter type it meets at a join.
//! 4. A produced union fits when every arm fits; an expected union accepts a
//!    type that fits any arm.
//! 5. Containers fit when their kinds are interchangeable and every argument
//!    fits pairwise, a missing argument counting as `Any`.
//! 6. Nominal types fit their declared supertypes.

use crate::error::PipeError;
use crate::signature::{format_produced, Param, Signature};
use crate::ty::{Bindings, Ty, TypeVar};

/// Whether `produced` may flow into `expected`, recording any placeholder
/// resolutions in `bindings`.
pub fn compatible(produced: &Ty, expected: &Ty, bindings: &mut Bindings) -> bool {
    if produced == expected {
        return true;
    }

    match (produced, expected) {
        (_, Ty::Any) => true,
        (Ty::Int, Ty::Float) => true,
        (_, Ty::Generic(var)) => bind(produced, var, bindings),
        (Ty::Generic(var), _) => match bindings.get(&var.name).cloned() {
            Some(resolved) => compatible(&resolved, expected, bindings),
            None => satisfies(expected, var, bindings),
        },
        (Ty::Union(arms), _) => arms.iter().all(|arm| compatible(arm, expected, bindings)),
        (_, Ty::Union(arms)) => arms.iter().any(|arm| {
            let mut attempt = bindings.clone();
            if compatible(produced, arm, &mut attempt) {
                *bindings = attempt;
                true
            } else {
                false
            }
        }),
        (
            Ty::Container { kind: pk, args: pa },
            Ty::Container { kind: ek, args: ea },
        ) => {
            if !pk.interchangeable_with(*ek) {
                return false;
            }
            let len = pa.len().max(ea.len());
            (0..len).all(|i| {
                let p = pa.get(i).unwrap_or(&Ty::Any);
                let e = ea.get(i).unwrap_or(&Ty::Any);
                compatible(p, e, bindings)
            })
        }
        (
            Ty::Callable { params: pp, ret: pr },
            Ty::Callable { params: ep, ret: er },
        ) => {
            // Parameters are checked in the opposite direction.
            pp.len() == ep.len()
                && ep.iter().zip(pp).all(|(e, p)| compatible(e, p, bindings))
                && compatible(pr, er, bindings)
        }
        (Ty::Named(p), Ty::Named(e)) => p.is_subtype_of(e),
        (Ty::Fan(_), Ty::Fan(None)) => true,
        (Ty::Fan(Some(pa)), Ty::Fan(Some(ea))) => {
            pa.len() == ea.len() && pa.iter().zip(ea).all(|(p, e)| compatible(p, e, bindings))
        }
        _ => false,
    }
}

/// [`compatible`] without any prior placeholder resolutions.
pub fn is_compatible(produced: &Ty, expected: &Ty) -> bool {
    compatible(produced, expected, &mut Bindings::new())
}

fn bind(produced: &Ty, var: &TypeVar, bindings: &mut Bindings) -> bool {
    if let Some(resolved) = bindings.get(&var.name).cloned() {
        return compatible(produced, &resolved, bindings);
    }
    if !satisfies(produced, var, bindings) {
        return false;
    }
    bindings.insert(var.name.clone(), produced.clone());
    true
}

/// Whether `ty` respects the placeholder's bound and constraints.
fn satisfies(ty: &Ty, var: &TypeVar, bindings: &Bindings) -> bool {
    let mut scratch = bindings.clone();
    if let Some(bound) = &var.bound {
        if !compatible(ty, bound, &mut scratch) {
            return false;
        }
    }
    var.constraints.is_empty()
        || var
            .constraints
            .iter()
            .any(|c| compatible(ty, c, &mut bindings.clone()))
}

/// Drop trailing optional parameters until exactly `count` remain.
///
/// Returns `None` when a required parameter would have to go, or when
/// there are fewer parameters than values.
pub fn trim_optional<'a>(params: &'a [&'a Param], count: usize) -> Option<&'a [&'a Param]> {
    let mut end = params.len();
    while end > count && params[end - 1].is_optional() {
        end -= 1;
    }
    (end == count).then(|| &params[..end])
}

/// Names and contract of the consuming stage in a join.
pub(crate) struct Consumer<'a> {
    pub name: &'a str,
    pub signature: &'a Signature,
    /// Parameters not fed from the store, in declaration order.
    pub free: Vec<&'a Param>,
}

/// Match the values a producer yields against the consumer's free parameters.
///
/// `bindings` collects the consumer's placeholder resolutions. A produced
/// type that still holds one of the producer's own placeholders is narrowed
/// into `narrowed` when the parameter it feeds is concrete, so the producer's
/// declared input can be tightened to match.
pub(crate) fn match_outputs(
    producer: &str,
    produced: &[Ty],
    consumer: &Consumer<'_>,
    bindings: &mut Bindings,
    narrowed: &mut Bindings,
) -> Result<(), PipeError> {
    let mismatch = |reason: String| PipeError::OutputInputMismatch {
        producer: producer.to_string(),
        consumer: consumer.name.to_string(),
        produced: format_produced(produced),
        expected: consumer.signature.to_string(),
        reason: Some(reason),
    };

    let params = trim_optional(&consumer.free, produced.len()).ok_or_else(|| {
        let required = consumer.free.iter().filter(|p| !p.is_optional()).count();
        mismatch(format!(
            "{} values for {}..={} free parameters",
            produced.len(),
            required,
            consumer.free.len()
        ))
    })?;

    for (ty, param) in produced.iter().zip(params) {
        if !compatible(ty, &param.ty, bindings) {
            let wanted = param.ty.resolve(bindings);
            return Err(mismatch(format!(
                "{ty} does not fit parameter '{}: {wanted}'",
                param.name
            )));
        }
        if ty.has_generics() {
            let wanted = param.ty.resolve(bindings);
            if !wanted.has_generics() {
                let mut attempt = narrowed.clone();
                if compatible(&wanted, ty, &mut attempt) {
                    *narrowed = attempt;
                }
            }
        }
    }
    Ok(())
}
