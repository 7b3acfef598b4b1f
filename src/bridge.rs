//! The inbound call bridge: host functions registered as runtime-callable
//! subroutines.
//!
//! Three calling conventions are supported, chosen by tag at registration
//! time ([`HostFn`]); each maps to its own entry trampoline. The bridge's
//! obligations, in order:
//!
//! 1. Malformed call shapes (wrong arity, odd key/value tail) are usage
//!    errors raised straight into the runtime, *before* the host body
//!    runs; they never become host-side errors because the fault is at
//!    the call site.
//! 2. A host error returned from the body is converted to the runtime's
//!    error convention and raised there, exactly once, with the original
//!    error value carried across; it never unwinds through runtime call
//!    frames (host functions return `Result`, and nothing here panics).
//! 3. The variadic form sees the caller's requested context and shapes
//!    its return to match: every element in list context, only the *last*
//!    element in scalar context (the comma-operator convention; this is
//!    deliberate), nothing in void context.

use std::rc::Rc;

use crate::error::Error;
use crate::interp::cell::{self, RawCell};
use crate::interp::engine::{Engine, NativeFn, Sub, die};
use crate::interp::Context;
use crate::list::List;
use crate::refs::Hashref;
use crate::scalar::Scalar;

/// One-argument form: the call must supply exactly one argument.
pub type SubOneArg = fn(Scalar) -> Result<Scalar, Error>;

/// Receiver-plus-named-arguments form: the call supplies the receiver and
/// an even number of trailing values, read as key/value pairs.
pub type SubKeyed = fn(Scalar, Hashref) -> Result<Scalar, Error>;

/// Variadic form: the full argument list verbatim, plus the caller's
/// evaluation context.
pub type SubVariadic = fn(List, Context) -> Result<List, Error>;

/// A host function with its calling convention, tagged at registration.
/// Dispatch is keyed by this tag, never by runtime inspection of the
/// pointer.
#[derive(Clone, Copy)]
pub enum HostFn {
    OneArg(SubOneArg),
    Keyed(SubKeyed),
    Variadic(SubVariadic),
}

/// Installs `package::name` in the runtime symbol table, wired to the
/// entry trampoline matching the host function's tag.
pub(crate) fn register(engine: &mut Engine, package: &str, name: &str, host: HostFn) {
    let fullname = format!("{}::{}", package, name);
    let entry: NativeFn = match host {
        HostFn::OneArg(f) => {
            let name = fullname.clone();
            Rc::new(move |engine, args, context| entry_one_arg(f, &name, engine, args, context))
        }
        HostFn::Keyed(f) => {
            let name = fullname.clone();
            Rc::new(move |engine, args, context| entry_keyed(f, &name, engine, args, context))
        }
        HostFn::Variadic(f) => {
            Rc::new(move |engine, args, context| entry_variadic(f, engine, args, context))
        }
    };
    engine.set_code_slot(&fullname, Sub::new(fullname.clone(), entry));
}

/// Converts a host error into the runtime's error convention. A
/// `Runtime` error hands over the very cell it carried; the host-side
/// wrapper is released here.
fn host_error_to_cell(error: Error) -> RawCell {
    match error {
        Error::Runtime(value) => value.into_cell(),
        other => cell::bytes(other.to_string().into_bytes()),
    }
}

fn entry_one_arg(
    f: SubOneArg,
    name: &str,
    _engine: &mut Engine,
    args: &[RawCell],
    _context: Context,
) -> Result<Vec<RawCell>, RawCell> {
    if args.len() != 1 {
        return Err(die(format!("Usage: {}(argument)", name)));
    }
    let argument = Scalar::from_cell(Rc::clone(&args[0]));
    match f(argument) {
        Ok(value) => Ok(vec![value.into_cell()]),
        Err(error) => Err(host_error_to_cell(error)),
    }
}

fn entry_keyed(
    f: SubKeyed,
    name: &str,
    _engine: &mut Engine,
    args: &[RawCell],
    _context: Context,
) -> Result<Vec<RawCell>, RawCell> {
    // Receiver plus pairs: any even total means the key/value tail is
    // odd.
    if args.len() % 2 == 0 {
        return Err(die(format!("Usage: OBJECT->{}(NAME, VALUE, ...)", name)));
    }
    let receiver = Scalar::from_cell(Rc::clone(&args[0]));
    let named = Hashref::new();
    for pair in args[1..].chunks_exact(2) {
        named.store(
            Scalar::from_cell(Rc::clone(&pair[0])),
            Scalar::from_cell(Rc::clone(&pair[1])),
        );
    }
    match f(receiver, named) {
        Ok(value) => Ok(vec![value.into_cell()]),
        Err(error) => Err(host_error_to_cell(error)),
    }
}

fn entry_variadic(
    f: SubVariadic,
    _engine: &mut Engine,
    args: &[RawCell],
    context: Context,
) -> Result<Vec<RawCell>, RawCell> {
    // The host body sees the caller's argument cells themselves, exactly
    // as the callee would inside the runtime.
    let list = List::new();
    for arg in args {
        list.as_array().push(Scalar::from_cell(Rc::clone(arg)));
    }
    match f(list, context) {
        Ok(returned) => {
            let cells = returned.element_cells();
            Ok(match context {
                Context::List => cells,
                Context::Scalar => vec![cells.last().map(Rc::clone).unwrap_or_else(cell::undef)],
                Context::Void => Vec::new(),
            })
        }
        Err(error) => Err(host_error_to_cell(error)),
    }
}
