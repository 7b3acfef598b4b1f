use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crate::interp::cell::{self, Cell, RawCell};
use crate::interp::{Context, Shape, modules};

/// Calls deeper than this die instead of overflowing the host stack.
const MAX_CALL_DEPTH: usize = 256;

/// The package unqualified subroutine names resolve through.
const DEFAULT_PACKAGE: &str = "main";

/// A native subroutine body. Receives the engine (so it can call back in),
/// the caller's argument cells (aliased, not copied), and the caller's
/// evaluation context; produces the returned value list or an error value.
pub type NativeFn = Rc<dyn Fn(&mut Engine, &[RawCell], Context) -> Result<Vec<RawCell>, RawCell>>;

/// A callable installed in a symbol-table code slot.
#[derive(Clone)]
pub struct Sub {
    name: String,
    func: NativeFn,
}

impl Sub {
    pub fn new(name: impl Into<String>, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Sub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", self.name)
    }
}

/// One symbol-table entry: a name's scalar, array, hash and code slots,
/// each materialized on first use.
#[derive(Default)]
struct Glob {
    scalar: Option<RawCell>,
    array: Option<RawCell>,
    hash: Option<RawCell>,
    code: Option<RawCell>,
}

/// Builds an error value from message text.
pub fn die(message: impl Into<String>) -> RawCell {
    cell::bytes(message.into().into_bytes())
}

/// The shape-mismatch error value, article and all.
pub fn not_a_reference(shape: Shape) -> RawCell {
    let article = if shape == Shape::Array { "an" } else { "a" };
    die(format!("not {} {} reference", article, shape.kind_name()))
}

/// The embedded runtime: symbol table, call machinery, error signal,
/// warn hook and module registry. The binding layer owns exactly one of
/// these per live interpreter session.
pub struct Engine {
    symbols: BTreeMap<String, Glob>,
    overloads: BTreeMap<String, BTreeMap<Shape, RawCell>>,
    loaded: BTreeSet<String>,
    warn_hook: Option<RawCell>,
    depth: usize,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            symbols: BTreeMap::new(),
            overloads: BTreeMap::new(),
            loaded: BTreeSet::new(),
            warn_hook: None,
            depth: 0,
        }
    }

    // ---- Symbol table ----

    /// The named global scalar slot, created holding undef if absent.
    pub fn scalar_slot(&mut self, name: &str) -> RawCell {
        let glob = self.symbols.entry(name.to_string()).or_default();
        Rc::clone(glob.scalar.get_or_insert_with(cell::undef))
    }

    /// The named global array slot, created empty if absent.
    pub fn array_slot(&mut self, name: &str) -> RawCell {
        let glob = self.symbols.entry(name.to_string()).or_default();
        Rc::clone(
            glob.array
                .get_or_insert_with(|| cell::new_cell(Cell::Array(Vec::new()))),
        )
    }

    /// The named global hash slot, created empty if absent.
    pub fn hash_slot(&mut self, name: &str) -> RawCell {
        let glob = self.symbols.entry(name.to_string()).or_default();
        Rc::clone(
            glob.hash
                .get_or_insert_with(|| cell::new_cell(Cell::Hash(BTreeMap::new()))),
        )
    }

    /// The named code slot, if a subroutine has been installed there.
    pub fn code_slot(&self, name: &str) -> Option<RawCell> {
        self.symbols
            .get(name)
            .and_then(|glob| glob.code.as_ref())
            .map(Rc::clone)
    }

    /// Installs (or replaces) a subroutine in a code slot. References to a
    /// previously installed subroutine keep pointing at the old body.
    pub fn set_code_slot(&mut self, name: &str, sub: Sub) {
        let glob = self.symbols.entry(name.to_string()).or_default();
        glob.code = Some(cell::new_cell(Cell::Code(sub)));
    }

    /// Empties a code slot (the `undef &name` analog). Calls through an
    /// already-taken reference still reach the old body.
    pub fn remove_code_slot(&mut self, name: &str) {
        if let Some(glob) = self.symbols.get_mut(name) {
            glob.code = None;
        }
    }

    /// Drops the whole symbol table. This is the teardown step: releasing
    /// the slots releases every cell graph only they keep alive.
    pub fn clear_symbols(&mut self) {
        self.symbols.clear();
        self.overloads.clear();
        self.loaded.clear();
        self.warn_hook = None;
    }

    // ---- Error signal ----

    /// The `$err` global: the script-visible error-signal slot that
    /// `eval { .. }` blocks populate.
    pub fn error_slot(&mut self) -> RawCell {
        self.scalar_slot("err")
    }

    pub fn set_error(&mut self, error: &RawCell) {
        let slot = self.error_slot();
        cell::set_from(&slot, error);
    }

    pub fn clear_error(&mut self) {
        let slot = self.error_slot();
        *slot.borrow_mut() = Cell::Undef;
    }

    // ---- Calls ----

    /// Calls a subroutine. `func` may be a code reference, a bare code
    /// cell, or a name (any cell, coerced to text) resolved through the
    /// symbol table with a `main::` fallback for unqualified names.
    ///
    /// Arguments are passed by alias. The returned vector is the callee's
    /// full value list; context collapse is the caller's business.
    pub fn call(
        &mut self,
        func: &RawCell,
        args: &[RawCell],
        context: Context,
    ) -> Result<Vec<RawCell>, RawCell> {
        let sub = self.resolve_callable(func)?;
        if self.depth >= MAX_CALL_DEPTH {
            return Err(die(format!("deep recursion in &{}", sub.name())));
        }
        self.depth += 1;
        let result = (sub.func)(self, args, context);
        self.depth -= 1;
        result
    }

    fn resolve_callable(&mut self, func: &RawCell) -> Result<Sub, RawCell> {
        let name = {
            let body = func.borrow();
            match &*body {
                Cell::Code(sub) => return Ok(sub.clone()),
                Cell::Ref { target, .. } => {
                    return match &*target.borrow() {
                        Cell::Code(sub) => Ok(sub.clone()),
                        _ => Err(die("not a CODE reference")),
                    };
                }
                other => other.as_text(),
            }
        };
        let slot = self
            .code_slot(&name)
            .or_else(|| self.code_slot(&format!("{}::{}", DEFAULT_PACKAGE, name)));
        match slot {
            Some(code) => match &*code.borrow() {
                Cell::Code(sub) => Ok(sub.clone()),
                _ => Err(die("not a CODE reference")),
            },
            None => Err(die(format!("undefined subroutine &{} called", name))),
        }
    }

    // ---- Classes and methods ----

    /// The class a method receiver dispatches through: the blessing for a
    /// blessed reference, the text itself for a plain value (a class-name
    /// string), and an error for an unblessed reference.
    pub fn receiver_class(&self, receiver: &RawCell) -> Result<String, RawCell> {
        match &*receiver.borrow() {
            Cell::Ref { blessed: Some(class), .. } => Ok(class.clone()),
            Cell::Ref { .. } => Err(die("can't call method on unblessed reference")),
            other => Ok(other.as_text()),
        }
    }

    /// Method lookup: the class's own code slot first, then its `ISA`
    /// parents depth-first.
    pub fn resolve_method(&mut self, class: &str, method: &str) -> Option<RawCell> {
        let mut seen = BTreeSet::new();
        self.resolve_method_walk(class, method, &mut seen)
    }

    fn resolve_method_walk(
        &mut self,
        class: &str,
        method: &str,
        seen: &mut BTreeSet<String>,
    ) -> Option<RawCell> {
        if !seen.insert(class.to_string()) {
            return None;
        }
        if let Some(code) = self.code_slot(&format!("{}::{}", class, method)) {
            return Some(code);
        }
        for parent in self.parent_classes(class) {
            if let Some(code) = self.resolve_method_walk(&parent, method, seen) {
                return Some(code);
            }
        }
        None
    }

    fn parent_classes(&self, class: &str) -> Vec<String> {
        let Some(glob) = self.symbols.get(&format!("{}::ISA", class)) else {
            return Vec::new();
        };
        let Some(array) = &glob.array else {
            return Vec::new();
        };
        match &*array.borrow() {
            Cell::Array(elements) => elements.iter().map(|e| e.borrow().as_text()).collect(),
            _ => Vec::new(),
        }
    }

    /// The declared-inheritance test. A blessed reference or class-name
    /// string walks the `ISA` chain; an unblessed reference answers for
    /// its raw kind name, so a plain array reference `isa` `"ARRAY"`.
    pub fn isa(&mut self, value: &RawCell, class: &str) -> bool {
        let start = match &*value.borrow() {
            Cell::Ref { blessed: Some(c), .. } => c.clone(),
            Cell::Ref { target, .. } => return target.borrow().kind_name() == class,
            Cell::Undef => return false,
            other => other.as_text(),
        };
        let mut seen = BTreeSet::new();
        self.isa_walk(&start, class, &mut seen)
    }

    fn isa_walk(&mut self, current: &str, class: &str, seen: &mut BTreeSet<String>) -> bool {
        if current == class {
            return true;
        }
        if !seen.insert(current.to_string()) {
            return false;
        }
        self.parent_classes(current)
            .iter()
            .any(|parent| self.isa_walk(parent, class, seen))
    }

    /// Marks a reference as belonging to a class. Dies on non-references.
    pub fn bless(&mut self, value: &RawCell, class: &str) -> Result<(), RawCell> {
        match &mut *value.borrow_mut() {
            Cell::Ref { blessed, .. } => {
                *blessed = Some(class.to_string());
                Ok(())
            }
            _ => Err(die("can't bless non-reference value")),
        }
    }

    // ---- Overloaded dereference ----

    /// Registers a per-shape dereference hook for a class. A blessed
    /// reference of that class then behaves as the hook's result for
    /// shape predicates and dereferencing, whatever its raw target kind.
    pub fn install_overload(&mut self, class: &str, shape: Shape, hook: RawCell) {
        self.overloads
            .entry(class.to_string())
            .or_default()
            .insert(shape, hook);
    }

    fn overload_for(&self, class: &str, shape: Shape) -> Option<RawCell> {
        self.overloads
            .get(class)
            .and_then(|hooks| hooks.get(&shape))
            .map(Rc::clone)
    }

    /// Whether `value` is a reference that behaves as the given shape,
    /// honoring dereference hooks before the raw tag.
    pub fn behaves_as(&mut self, value: &RawCell, shape: Shape) -> bool {
        let (raw_shape, blessed) = match &*value.borrow() {
            Cell::Ref { target, blessed } => (target.borrow().shape(), blessed.clone()),
            _ => return false,
        };
        if raw_shape == shape {
            return true;
        }
        blessed.is_some_and(|class| self.overload_for(&class, shape).is_some())
    }

    /// Dereferences `value` to a container of the given shape. Raw
    /// references of the right kind dereference directly; a blessed
    /// reference with a matching hook routes through the hook, whose
    /// result must itself be a plain reference of the right kind.
    pub fn deref(&mut self, value: &RawCell, shape: Shape) -> Result<RawCell, RawCell> {
        let (target, blessed) = match &*value.borrow() {
            Cell::Ref { target, blessed } => (Rc::clone(target), blessed.clone()),
            _ => return Err(not_a_reference(shape)),
        };
        if target.borrow().shape() == shape {
            return Ok(target);
        }
        let hook = blessed
            .and_then(|class| self.overload_for(&class, shape))
            .ok_or_else(|| not_a_reference(shape))?;
        let mut results = self.call(&hook, std::slice::from_ref(value), Context::Scalar)?;
        let result = results.pop().unwrap_or_else(cell::undef);
        match &*result.borrow() {
            Cell::Ref { target, .. } if target.borrow().shape() == shape => Ok(Rc::clone(target)),
            _ => Err(die(format!(
                "dereference hook did not produce a {} reference",
                shape.kind_name()
            ))),
        }
    }

    // ---- Warnings ----

    /// Routes a diagnostic message through the installed warn hook; falls
    /// back to the process stderr stream when no hook is installed or the
    /// hook itself fails.
    pub fn warn(&mut self, message: &RawCell) {
        if let Some(hook) = self.warn_hook.clone() {
            if self
                .call(&hook, std::slice::from_ref(message), Context::Void)
                .is_ok()
            {
                return;
            }
        }
        eprint!("{}", message.borrow().as_text());
    }

    pub fn set_warn_hook(&mut self, hook: Option<RawCell>) {
        self.warn_hook = hook;
    }

    // ---- Modules ----

    /// Loads a built-in module by bare name, at most once per session.
    /// Unknown names die.
    pub fn require(&mut self, module: &str) -> Result<(), RawCell> {
        if self.loaded.contains(module) {
            return Ok(());
        }
        modules::load(self, module)?;
        self.loaded.insert(module.to_string());
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
