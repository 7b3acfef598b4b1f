//! Capability-checked views over a [`Scalar`] that interpret it as a
//! reference to a container of a particular shape.
//!
//! A view is the handle plus an interpretation; it owns no container of
//! its own. Narrowing is checked at construction: `checked` consults the
//! runtime (including any blessed class's dereference hook) and fails
//! with a typed error on mismatch; `unchecked` skips the check for
//! callers that already know the shape, and if they are wrong the view
//! ends up over a detached empty container rather than anything unsound.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::rc::Rc;

use crate::error::Error;
use crate::interp::cell::{self, Cell, RawCell};
use crate::interp::Shape;
use crate::interpreter::Interpreter;
use crate::list::List;
use crate::scalar::Scalar;

fn checked_container(
    interp: &mut Interpreter,
    value: &Scalar,
    shape: Shape,
) -> Result<RawCell, Error> {
    interp
        .engine_mut()
        .deref(value.cell(), shape)
        .map_err(|e| Error::Runtime(Scalar::from_cell(e)))
}

/// Raw-tag resolution for the unchecked constructors: the target when the
/// value really is a reference of the right shape, otherwise a detached
/// empty container of that shape.
fn raw_container(value: &Scalar, shape: Shape) -> RawCell {
    if let Cell::Ref { target, .. } = &*value.cell().borrow() {
        if target.borrow().shape() == shape {
            return Rc::clone(target);
        }
    }
    match shape {
        Shape::Array => cell::new_cell(Cell::Array(Vec::new())),
        Shape::Hash => cell::new_cell(Cell::Hash(BTreeMap::new())),
        _ => cell::undef(),
    }
}

// ---- Scalarref ----

/// A reference to a single scalar. `store` writes the pointee in place,
/// so every alias of the pointee sees the new value.
#[derive(Clone, Debug)]
pub struct Scalarref {
    handle: Scalar,
    target: RawCell,
}

impl Scalarref {
    /// A reference to a fresh, undefined scalar.
    pub fn new() -> Self {
        let target = cell::undef();
        Self {
            handle: Scalar::from_cell(cell::ref_to(Rc::clone(&target))),
            target,
        }
    }

    /// A reference to the named global scalar slot, vivified if absent.
    pub fn lookup(interp: &mut Interpreter, name: &str) -> Self {
        let target = interp.engine_mut().scalar_slot(name);
        Self {
            handle: Scalar::from_cell(cell::ref_to(Rc::clone(&target))),
            target,
        }
    }

    pub fn checked(interp: &mut Interpreter, value: &Scalar) -> Result<Self, Error> {
        let target = checked_container(interp, value, Shape::Scalar)?;
        Ok(Self {
            handle: value.clone(),
            target,
        })
    }

    pub fn unchecked(value: &Scalar) -> Self {
        let target = raw_container(value, Shape::Scalar);
        Self {
            handle: value.clone(),
            target,
        }
    }

    /// A new handle on the pointee itself (an alias, not a copy).
    pub fn fetch(&self) -> Scalar {
        Scalar::from_cell(Rc::clone(&self.target))
    }

    /// Overwrites the pointee's value in place.
    pub fn store(&self, value: impl Into<Scalar>) {
        cell::set_from(&self.target, value.into().cell());
    }
}

impl Default for Scalarref {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Scalarref {
    type Target = Scalar;

    fn deref(&self) -> &Scalar {
        &self.handle
    }
}

// ---- Arrayref ----

/// A reference to an ordered sequence.
#[derive(Clone, Debug)]
pub struct Arrayref {
    handle: Scalar,
    elements: RawCell,
}

impl Arrayref {
    /// A reference to a fresh, empty sequence.
    pub fn new() -> Self {
        let elements = cell::new_cell(Cell::Array(Vec::new()));
        Self {
            handle: Scalar::from_cell(cell::ref_to(Rc::clone(&elements))),
            elements,
        }
    }

    /// A fresh sequence holding copies of the given element handles; each
    /// element cell gains one owner.
    pub fn from_elems(elems: &[Scalar]) -> Self {
        let array = Self::new();
        for elem in elems {
            array.push(elem);
        }
        array
    }

    /// A reference to the named global array slot, vivified if absent.
    pub fn lookup(interp: &mut Interpreter, name: &str) -> Self {
        let elements = interp.engine_mut().array_slot(name);
        Self {
            handle: Scalar::from_cell(cell::ref_to(Rc::clone(&elements))),
            elements,
        }
    }

    pub fn checked(interp: &mut Interpreter, value: &Scalar) -> Result<Self, Error> {
        let elements = checked_container(interp, value, Shape::Array)?;
        Ok(Self {
            handle: value.clone(),
            elements,
        })
    }

    pub fn unchecked(value: &Scalar) -> Self {
        let elements = raw_container(value, Shape::Array);
        Self {
            handle: value.clone(),
            elements,
        }
    }

    pub(crate) fn handle(&self) -> &Scalar {
        &self.handle
    }

    pub(crate) fn element_cells(&self) -> Vec<RawCell> {
        match &*self.elements.borrow() {
            Cell::Array(elements) => elements.clone(),
            _ => Vec::new(),
        }
    }

    /// One past the highest populated index. A sparse sequence (extended
    /// by an out-of-range `at` or `store`) counts its undef padding.
    pub fn size(&self) -> usize {
        match &*self.elements.borrow() {
            Cell::Array(elements) => elements.len(),
            _ => 0,
        }
    }

    /// A live alias of the element at `index`, vivifying the slot (and
    /// any gap below it) with undef. Mutating the alias with
    /// [`Scalar::set`] mutates the sequence.
    pub fn at(&self, index: usize) -> Scalar {
        let mut body = self.elements.borrow_mut();
        if let Cell::Array(elements) = &mut *body {
            while elements.len() <= index {
                elements.push(cell::undef());
            }
            Scalar::from_cell(Rc::clone(&elements[index]))
        } else {
            Scalar::undef()
        }
    }

    /// A copy of the element at `index`; undef when out of range.
    pub fn fetch(&self, index: usize) -> Scalar {
        match &*self.elements.borrow() {
            Cell::Array(elements) => match elements.get(index) {
                Some(element) => Scalar::from_cell(cell::shallow_copy(element)),
                None => Scalar::undef(),
            },
            _ => Scalar::undef(),
        }
    }

    /// Overwrites the element at `index` in place, vivifying as `at`
    /// does.
    pub fn store(&self, index: usize, value: impl Into<Scalar>) {
        self.at(index).set(&value.into());
    }

    /// Appends the value's cell (one more owner, not a copy) and returns
    /// the new size.
    pub fn push(&self, value: impl Into<Scalar>) -> usize {
        let value = value.into();
        let mut body = self.elements.borrow_mut();
        if let Cell::Array(elements) = &mut *body {
            elements.push(Rc::clone(value.cell()));
            elements.len()
        } else {
            0
        }
    }

    /// Appends every element of a list; returns the new size.
    pub fn push_list(&self, list: &List) -> usize {
        let mut size = self.size();
        for cell in list.as_array().element_cells() {
            size = self.push(Scalar::from_cell(cell));
        }
        size
    }

    /// Removes and returns the front element; undef when empty (the size
    /// never goes below zero).
    pub fn shift(&self) -> Scalar {
        let mut body = self.elements.borrow_mut();
        if let Cell::Array(elements) = &mut *body {
            if elements.is_empty() {
                Scalar::undef()
            } else {
                Scalar::from_cell(elements.remove(0))
            }
        } else {
            Scalar::undef()
        }
    }

    /// Empties the sequence in place.
    pub fn clear(&self) {
        if let Cell::Array(elements) = &mut *self.elements.borrow_mut() {
            elements.clear();
        }
    }

    /// Copies the element handles into a fresh argument list.
    pub fn deref_list(&self) -> List {
        let list = List::new();
        let array = list.as_array().clone();
        for cell in self.element_cells() {
            array.push(Scalar::from_cell(cell));
        }
        list
    }
}

impl Default for Arrayref {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Arrayref {
    type Target = Scalar;

    fn deref(&self) -> &Scalar {
        &self.handle
    }
}

// ---- Hashref ----

/// A reference to a mapping keyed by text.
#[derive(Clone, Debug)]
pub struct Hashref {
    handle: Scalar,
    entries: RawCell,
}

impl Hashref {
    /// A reference to a fresh, empty mapping.
    pub fn new() -> Self {
        let entries = cell::new_cell(Cell::Hash(BTreeMap::new()));
        Self {
            handle: Scalar::from_cell(cell::ref_to(Rc::clone(&entries))),
            entries,
        }
    }

    /// A reference to the named global hash slot, vivified if absent.
    pub fn lookup(interp: &mut Interpreter, name: &str) -> Self {
        let entries = interp.engine_mut().hash_slot(name);
        Self {
            handle: Scalar::from_cell(cell::ref_to(Rc::clone(&entries))),
            entries,
        }
    }

    pub fn checked(interp: &mut Interpreter, value: &Scalar) -> Result<Self, Error> {
        let entries = checked_container(interp, value, Shape::Hash)?;
        Ok(Self {
            handle: value.clone(),
            entries,
        })
    }

    pub fn unchecked(value: &Scalar) -> Self {
        let entries = raw_container(value, Shape::Hash);
        Self {
            handle: value.clone(),
            entries,
        }
    }

    /// Looks up by the key's text coercion; a copy of the stored value,
    /// or undef for a missing key.
    pub fn fetch(&self, key: impl Into<Scalar>) -> Scalar {
        let key = key.into().as_string();
        match &*self.entries.borrow() {
            Cell::Hash(entries) => match entries.get(&key) {
                Some(value) => Scalar::from_cell(cell::shallow_copy(value)),
                None => Scalar::undef(),
            },
            _ => Scalar::undef(),
        }
    }

    /// Inserts the value's cell under the key's text coercion.
    pub fn store(&self, key: impl Into<Scalar>, value: impl Into<Scalar>) {
        let key = key.into().as_string();
        let value = value.into();
        if let Cell::Hash(entries) = &mut *self.entries.borrow_mut() {
            entries.insert(key, Rc::clone(value.cell()));
        }
    }

    pub fn size(&self) -> usize {
        match &*self.entries.borrow() {
            Cell::Hash(entries) => entries.len(),
            _ => 0,
        }
    }
}

impl Default for Hashref {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Hashref {
    type Target = Scalar;

    fn deref(&self) -> &Scalar {
        &self.handle
    }
}

// ---- Coderef ----

/// A reference to a callable. Narrowing-only: invocation goes through
/// [`Interpreter::call_function`].
#[derive(Clone, Debug)]
pub struct Coderef {
    handle: Scalar,
}

impl Coderef {
    /// The named subroutine's code slot, if one is installed.
    pub fn lookup(interp: &mut Interpreter, name: &str) -> Option<Self> {
        interp.engine_mut().code_slot(name).map(|code| Self {
            handle: Scalar::from_cell(cell::ref_to(code)),
        })
    }

    pub fn checked(interp: &mut Interpreter, value: &Scalar) -> Result<Self, Error> {
        checked_container(interp, value, Shape::Code)?;
        Ok(Self {
            handle: value.clone(),
        })
    }

    pub fn unchecked(value: &Scalar) -> Self {
        Self {
            handle: value.clone(),
        }
    }
}

impl Deref for Coderef {
    type Target = Scalar;

    fn deref(&self) -> &Scalar {
        &self.handle
    }
}

// ---- Globref ----

/// A reference to a named symbol-table slot. Narrowing-only.
#[derive(Clone, Debug)]
pub struct Globref {
    handle: Scalar,
}

impl Globref {
    /// A reference to the named symbol-table entry, materializing the
    /// entry if absent.
    pub fn lookup(interp: &mut Interpreter, name: &str) -> Self {
        interp.engine_mut().scalar_slot(name);
        Self {
            handle: Scalar::from_cell(cell::ref_to(cell::new_cell(Cell::Glob(name.to_string())))),
        }
    }

    pub fn checked(interp: &mut Interpreter, value: &Scalar) -> Result<Self, Error> {
        checked_container(interp, value, Shape::Glob)?;
        Ok(Self {
            handle: value.clone(),
        })
    }

    pub fn unchecked(value: &Scalar) -> Self {
        Self {
            handle: value.clone(),
        }
    }
}

impl Deref for Globref {
    type Target = Scalar;

    fn deref(&self) -> &Scalar {
        &self.handle
    }
}
