//! The argument list: an ordered sequence of handles that crosses the
//! call bridge as a single sequence reference.
//!
//! `List` and [`Arrayref`] share one backing container; the distinction
//! is purely a host-side type-level device, so a call site can say
//! whether it means "one sequence-reference argument" or "these values,
//! spread". Conversion in either direction is O(1) and lossless.

use crate::error::Error;
use crate::interp::cell::RawCell;
use crate::interpreter::Interpreter;
use crate::refs::Arrayref;
use crate::scalar::Scalar;

#[derive(Clone, Debug)]
pub struct List {
    array: Arrayref,
}

impl List {
    pub fn new() -> Self {
        Self {
            array: Arrayref::new(),
        }
    }

    /// Wraps an existing sequence reference; the list aliases it rather
    /// than copying.
    pub fn from_array(array: Arrayref) -> Self {
        Self { array }
    }

    /// Interprets an arbitrary value as an argument list, with the
    /// sequence-reference shape check. This is how "the return value is
    /// itself a reference to an argument-shaped container" is received
    /// without copying.
    pub fn checked(interp: &mut Interpreter, value: &Scalar) -> Result<Self, Error> {
        Ok(Self {
            array: Arrayref::checked(interp, value)?,
        })
    }

    /// As [`List::checked`] without the shape check.
    pub fn unchecked(value: &Scalar) -> Self {
        Self {
            array: Arrayref::unchecked(value),
        }
    }

    pub fn as_array(&self) -> &Arrayref {
        &self.array
    }

    pub fn into_array(self) -> Arrayref {
        self.array
    }

    pub fn size(&self) -> usize {
        self.array.size()
    }

    /// Appends a value and returns the list for chaining.
    pub fn add(self, value: impl Into<Scalar>) -> Self {
        self.array.push(value);
        self
    }

    /// Appends a value in place.
    pub fn push(&mut self, value: impl Into<Scalar>) {
        self.array.push(value);
    }

    /// Removes and returns the front element; undef when empty.
    pub fn shift(&self) -> Scalar {
        self.array.shift()
    }

    /// A live alias of the element at `index`.
    pub fn at(&self, index: usize) -> Scalar {
        self.array.at(index)
    }

    pub(crate) fn element_cells(&self) -> Vec<RawCell> {
        self.array.element_cells()
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Arrayref> for List {
    fn from(array: Arrayref) -> Self {
        Self::from_array(array)
    }
}

impl From<List> for Arrayref {
    fn from(list: List) -> Self {
        list.into_array()
    }
}
