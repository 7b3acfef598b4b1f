use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::interp::cell::{self, Cell, RawCell};
use crate::interp::engine::{Engine, Sub, die};
use crate::interp::{Context, Shape};
use crate::interpreter::Interpreter;
use crate::list::List;

/// An owning handle on one runtime heap cell.
///
/// ## Reference counting
///
/// `Scalar` is the only way binding code touches a cell, and the handle's
/// lifetime *is* the ownership protocol: cloning a `Scalar` increments the
/// cell's count, dropping it decrements, and the cell is released with its
/// last handle. There is no failure path in any of that, and no raw
/// pointer ever leaves the proxy layer.
///
/// ## Aliasing
///
/// Handles alias freely: a handle fetched out of a container shares the
/// element cell with the container. [`Scalar::set`] overwrites the cell's
/// value *in place*, which is how mutation becomes visible through every
/// alias; plain Rust rebinding of a `Scalar` variable, by contrast, only
/// repoints the handle.
///
/// ## Coercions
///
/// The `as_*` readers follow the runtime's coercion rules and are total:
/// non-numeric text reads as zero, undef reads as the empty string, and
/// truthiness treats undef, zero and the empty string as false. None of
/// them can fail.
#[derive(Clone)]
pub struct Scalar {
    cell: RawCell,
}

impl Scalar {
    pub(crate) fn from_cell(cell: RawCell) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &RawCell {
        &self.cell
    }

    pub(crate) fn into_cell(self) -> RawCell {
        self.cell
    }

    /// A fresh handle holding undef.
    pub fn undef() -> Self {
        Self::from_cell(cell::undef())
    }

    /// Builds a text scalar from raw bytes. This is the explicit-length
    /// form: embedded NUL bytes are preserved.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_cell(cell::bytes(bytes.to_vec()))
    }

    /// The named global scalar, vivified if absent. The handle aliases
    /// the symbol-table slot itself, so `set` through it updates the
    /// global.
    pub fn lookup(interp: &mut Interpreter, name: &str) -> Self {
        Self::from_cell(interp.engine_mut().scalar_slot(name))
    }

    /// Overwrites this handle's cell with a copy of `other`'s value, in
    /// place. Every alias of this cell observes the change. Safe under
    /// self-assignment.
    pub fn set(&self, other: &Scalar) {
        cell::set_from(&self.cell, &other.cell);
    }

    /// The cell's current reference count (the number of live owners,
    /// this handle included). Diagnostic; the count is managed entirely
    /// by handle clone/drop.
    pub fn refcount(&self) -> usize {
        cell::refcount(&self.cell)
    }

    // ---- Predicates ----

    pub fn defined(&self) -> bool {
        self.cell.borrow().defined()
    }

    /// Text length in bytes of the coerced string form; `None` for undef.
    pub fn length(&self) -> Option<usize> {
        if !self.defined() {
            return None;
        }
        Some(self.cell.borrow().as_bytes_vec().len())
    }

    /// String equality under text coercion (not handle identity).
    pub fn eq(&self, other: &Scalar) -> bool {
        self.cell.borrow().as_bytes_vec() == other.cell.borrow().as_bytes_vec()
    }

    /// Truthiness under the runtime's rules.
    pub fn as_bool(&self) -> bool {
        self.cell.borrow().truthy()
    }

    /// For a reference: a text handle naming the pointee's class (if
    /// blessed) or kind (`ARRAY`, `HASH`, ...). For anything else: a
    /// false-valued scalar.
    pub fn ref_kind(&self) -> Scalar {
        let text = match &*self.cell.borrow() {
            Cell::Ref { target, blessed } => match blessed {
                Some(class) => class.clone(),
                None => target.borrow().kind_name().to_string(),
            },
            _ => return Self::from_cell(cell::bytes(Vec::new())),
        };
        Self::from_cell(cell::bytes(text.into_bytes()))
    }

    // ---- Coercions ----

    pub fn as_int(&self) -> i64 {
        self.cell.borrow().as_int()
    }

    /// Unsigned read; negative values wrap, mirroring the runtime's
    /// modular integer reading.
    pub fn as_uint(&self) -> u64 {
        self.as_int() as u64
    }

    pub fn as_double(&self) -> f64 {
        self.cell.borrow().as_num()
    }

    /// Text coercion. Non-UTF-8 bytes are replaced; use [`Scalar::as_bytes`]
    /// for the exact byte string.
    pub fn as_string(&self) -> String {
        self.cell.borrow().as_text()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.cell.borrow().as_bytes_vec()
    }

    // ---- Shape predicates ----

    /// Whether this value behaves as a scalar reference. Honors a blessed
    /// class's dereference hook, not just the raw tag.
    pub fn is_scalarref(&self, interp: &mut Interpreter) -> bool {
        interp.engine_mut().behaves_as(&self.cell, Shape::Scalar)
    }

    pub fn is_arrayref(&self, interp: &mut Interpreter) -> bool {
        interp.engine_mut().behaves_as(&self.cell, Shape::Array)
    }

    pub fn is_hashref(&self, interp: &mut Interpreter) -> bool {
        interp.engine_mut().behaves_as(&self.cell, Shape::Hash)
    }

    pub fn is_coderef(&self, interp: &mut Interpreter) -> bool {
        interp.engine_mut().behaves_as(&self.cell, Shape::Code)
    }

    pub fn is_globref(&self, interp: &mut Interpreter) -> bool {
        interp.engine_mut().behaves_as(&self.cell, Shape::Glob)
    }

    pub fn check_scalarref(&self, interp: &mut Interpreter) -> Result<(), Error> {
        self.check_shape(interp, Shape::Scalar)
    }

    pub fn check_arrayref(&self, interp: &mut Interpreter) -> Result<(), Error> {
        self.check_shape(interp, Shape::Array)
    }

    pub fn check_hashref(&self, interp: &mut Interpreter) -> Result<(), Error> {
        self.check_shape(interp, Shape::Hash)
    }

    pub fn check_coderef(&self, interp: &mut Interpreter) -> Result<(), Error> {
        self.check_shape(interp, Shape::Code)
    }

    pub fn check_globref(&self, interp: &mut Interpreter) -> Result<(), Error> {
        self.check_shape(interp, Shape::Glob)
    }

    fn check_shape(&self, interp: &mut Interpreter, shape: Shape) -> Result<(), Error> {
        if interp.engine_mut().behaves_as(&self.cell, shape) {
            Ok(())
        } else {
            Err(Error::Runtime(Scalar::from_cell(
                crate::interp::engine::not_a_reference(shape),
            )))
        }
    }

    // ---- Object system ----

    /// Declared-inheritance test through the class's `ISA` chain.
    pub fn isa(&self, interp: &mut Interpreter, class: &str) -> bool {
        interp.engine_mut().isa(&self.cell, class)
    }

    /// Method lookup: a handle on the resolved code reference, or undef
    /// when the method does not exist (or the value cannot dispatch).
    pub fn can(&self, interp: &mut Interpreter, method: &str) -> Scalar {
        let engine = interp.engine_mut();
        let Ok(class) = engine.receiver_class(&self.cell) else {
            return Scalar::undef();
        };
        match engine.resolve_method(&class, method) {
            Some(code) => Scalar::from_cell(cell::ref_to(code)),
            None => Scalar::undef(),
        }
    }

    /// Marks this reference as belonging to a class, making it a method
    /// receiver.
    pub fn bless_into(&self, interp: &mut Interpreter, class: &str) -> Result<(), Error> {
        interp
            .engine_mut()
            .bless(&self.cell, class)
            .map_err(|e| Error::Runtime(Scalar::from_cell(e)))
    }

    /// Calls a dynamically named method on this value.
    ///
    /// Dispatch goes through a generic trampoline subroutine installed in
    /// the `Pickle` package on first use, rather than any direct
    /// method-call primitive: the generic function path traps a missing
    /// method like any other runtime error, so "no such method" comes
    /// back as a catchable [`Error::Runtime`].
    pub fn call_method(
        &self,
        interp: &mut Interpreter,
        method: &str,
        args: &List,
        context: Context,
    ) -> Result<Scalar, Error> {
        ensure_trampoline(interp.engine_mut());
        let trampoline_args = List::new()
            .add(Scalar::from(method))
            .add(self.clone())
            .add(args.as_array().handle().clone());
        interp.call_named(TRAMPOLINE, &trampoline_args, context)
    }

    // ---- Serialization ----

    /// Encodes through the tree-structured codec module, loading it on
    /// first use.
    pub fn to_tree(&self, interp: &mut Interpreter) -> Result<String, Error> {
        self.encode_with(interp, "Codec::Tree", "Codec::Tree::encode")
            .and_then(|r| r.ok_or_else(|| missing_entry("Codec::Tree", "encode")))
    }

    pub fn from_tree(interp: &mut Interpreter, text: &str) -> Result<Scalar, Error> {
        decode_with(interp, "Codec::Tree", "Codec::Tree::decode", text)
            .and_then(|r| r.ok_or_else(|| missing_entry("Codec::Tree", "decode")))
    }

    /// Encodes through the literal-expression codec module.
    pub fn to_lit(&self, interp: &mut Interpreter) -> Result<String, Error> {
        self.encode_with(interp, "Codec::Lit", "Codec::Lit::encode")
            .and_then(|r| r.ok_or_else(|| missing_entry("Codec::Lit", "encode")))
    }

    pub fn from_lit(interp: &mut Interpreter, text: &str) -> Result<Scalar, Error> {
        decode_with(interp, "Codec::Lit", "Codec::Lit::decode", text)
            .and_then(|r| r.ok_or_else(|| missing_entry("Codec::Lit", "decode")))
    }

    /// Encodes with the preferred codec: the tree module if it loads and
    /// exposes its entry point, else the literal module, else an error.
    /// Encoding failures from an available codec are not fallen through;
    /// only unavailability is.
    pub fn serialize(&self, interp: &mut Interpreter) -> Result<String, Error> {
        if let Some(text) = self.encode_with(interp, "Codec::Tree", "Codec::Tree::encode")? {
            return Ok(text);
        }
        if let Some(text) = self.encode_with(interp, "Codec::Lit", "Codec::Lit::encode")? {
            return Ok(text);
        }
        Err(Error::msg(
            "no serialization module available: neither Codec::Tree nor Codec::Lit exposes an encode entry point",
        ))
    }

    /// Decodes with the same preference order as [`Scalar::serialize`].
    pub fn deserialize(interp: &mut Interpreter, text: &str) -> Result<Scalar, Error> {
        if let Some(value) = decode_with(interp, "Codec::Tree", "Codec::Tree::decode", text)? {
            return Ok(value);
        }
        if let Some(value) = decode_with(interp, "Codec::Lit", "Codec::Lit::decode", text)? {
            return Ok(value);
        }
        Err(Error::msg(
            "no serialization module available: neither Codec::Tree nor Codec::Lit exposes a decode entry point",
        ))
    }

    /// `Ok(None)` means the module or its entry point is unavailable
    /// (fall back); `Err` means the codec ran and failed (do not).
    fn encode_with(
        &self,
        interp: &mut Interpreter,
        module: &str,
        entry: &str,
    ) -> Result<Option<String>, Error> {
        let Some(func) = codec_entry(interp, module, entry) else {
            return Ok(None);
        };
        let encoded =
            interp.call_function(&func, &List::new().add(self.clone()), Context::Scalar)?;
        Ok(Some(encoded.as_string()))
    }
}

fn decode_with(
    interp: &mut Interpreter,
    module: &str,
    entry: &str,
    text: &str,
) -> Result<Option<Scalar>, Error> {
    let Some(func) = codec_entry(interp, module, entry) else {
        return Ok(None);
    };
    let decoded = interp.call_function(&func, &List::new().add(Scalar::from(text)), Context::Scalar)?;
    Ok(Some(decoded))
}

/// Loads a codec module on demand and looks up its entry point; `None`
/// when either step comes up empty.
fn codec_entry(interp: &mut Interpreter, module: &str, entry: &str) -> Option<Scalar> {
    if interp.require_module(module).is_err() {
        return None;
    }
    interp
        .engine_mut()
        .code_slot(entry)
        .map(|code| Scalar::from_cell(cell::ref_to(code)))
}

fn missing_entry(module: &str, entry: &str) -> Error {
    Error::msg(format!(
        "{} loaded but {}::{} is not defined",
        module, module, entry
    ))
}

const TRAMPOLINE: &str = "Pickle::call_method";

/// Installs the generic method-call trampoline on first use:
/// `Pickle::call_method(method, object, argsref)` resolves and invokes
/// `object->method(@argsref)` inside the runtime, in the caller's context.
fn ensure_trampoline(engine: &mut Engine) {
    if engine.code_slot(TRAMPOLINE).is_some() {
        return;
    }
    engine.set_code_slot(
        TRAMPOLINE,
        Sub::new(
            TRAMPOLINE,
            Rc::new(|engine, args, context| {
                if args.len() != 3 {
                    return Err(die(format!("Usage: {}(method, object, args)", TRAMPOLINE)));
                }
                let method = args[0].borrow().as_text();
                let receiver = &args[1];
                let class = engine.receiver_class(receiver)?;
                let code = engine.resolve_method(&class, &method).ok_or_else(|| {
                    die(format!(
                        "can't locate object method \"{}\" via package \"{}\"",
                        method, class
                    ))
                })?;
                let container = engine.deref(&args[2], Shape::Array)?;
                let elements = match &*container.borrow() {
                    Cell::Array(elements) => elements.clone(),
                    _ => return Err(die("method argument list is not an ARRAY reference")),
                };
                let mut full = Vec::with_capacity(1 + elements.len());
                full.push(Rc::clone(receiver));
                full.extend(elements);
                engine.call(&code, &full, context)
            }),
        ),
    );
}

impl Default for Scalar {
    fn default() -> Self {
        Self::undef()
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({:?})", &*self.cell.borrow())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::from_cell(cell::int(value))
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::from_cell(cell::int(value.into()))
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Self::from_cell(cell::int(value.into()))
    }
}

/// Values wider than the runtime's signed integer cell degrade to the
/// float representation, a documented lossy conversion rather than an error.
impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(fits) => Self::from_cell(cell::int(fits)),
            Err(_) => Self::from_cell(cell::num(value as f64)),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::from_cell(cell::num(value))
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Self::from_cell(cell::num(value.into()))
    }
}

/// Booleans become the runtime's canonical true and false values: the
/// integer 1 and the empty string, which line up with the coercion rules
/// in both directions.
impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        if value {
            Self::from_cell(cell::int(1))
        } else {
            Self::from_cell(cell::bytes(Vec::new()))
        }
    }
}

/// The whole string, embedded NULs included: `&str` carries its length,
/// so there is no stop-at-NUL form.
impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::from_cell(cell::bytes(value.as_bytes().to_vec()))
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::from_cell(cell::bytes(value.into_bytes()))
    }
}

impl From<&Scalar> for Scalar {
    fn from(value: &Scalar) -> Self {
        value.clone()
    }
}
