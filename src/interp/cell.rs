use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::interp::Shape;
use crate::interp::engine::Sub;

/// A shared, reference-counted heap cell.
///
/// The `Rc` strong count *is* the cell's reference count: handle types in
/// the binding layer clone and drop this pointer and never touch the cell
/// any other way.
pub type RawCell = Rc<RefCell<Cell>>;

/// One heap cell of the embedded runtime.
///
/// Plain values (`Undef`, `Int`, `Num`, `Str`) and references live in
/// scalar position; `Array`, `Hash`, `Code` and `Glob` bodies are only
/// normally reachable through a `Ref` cell, mirroring how the runtime's
/// own data model separates scalars from the containers they point at.
#[derive(Clone)]
pub enum Cell {
    Undef,
    Int(i64),
    Num(f64),
    /// A byte string; embedded NUL bytes are allowed.
    Str(Vec<u8>),
    Ref {
        target: RawCell,
        blessed: Option<String>,
    },
    Array(Vec<RawCell>),
    Hash(BTreeMap<String, RawCell>),
    Code(Sub),
    /// A named symbol-table slot.
    Glob(String),
}

pub fn new_cell(body: Cell) -> RawCell {
    Rc::new(RefCell::new(body))
}

pub fn undef() -> RawCell {
    new_cell(Cell::Undef)
}

pub fn int(value: i64) -> RawCell {
    new_cell(Cell::Int(value))
}

pub fn num(value: f64) -> RawCell {
    new_cell(Cell::Num(value))
}

pub fn bytes(value: impl Into<Vec<u8>>) -> RawCell {
    new_cell(Cell::Str(value.into()))
}

/// Wraps a cell in a fresh (unblessed) reference.
pub fn ref_to(target: RawCell) -> RawCell {
    new_cell(Cell::Ref {
        target,
        blessed: None,
    })
}

/// A new cell holding a copy of `src`'s value. The copy is shallow: a
/// reference body copies the pointer (sharing the target), a container
/// body copies the slot list (sharing the elements).
pub fn shallow_copy(src: &RawCell) -> RawCell {
    new_cell(src.borrow().clone())
}

/// Overwrites `dst`'s value in place with a copy of `src`'s, so every
/// alias of `dst` observes the new value. Safe under self-assignment.
pub fn set_from(dst: &RawCell, src: &RawCell) {
    if Rc::ptr_eq(dst, src) {
        return;
    }
    let body = src.borrow().clone();
    *dst.borrow_mut() = body;
}

pub fn refcount(cell: &RawCell) -> usize {
    Rc::strong_count(cell)
}

impl Cell {
    pub fn defined(&self) -> bool {
        !matches!(self, Cell::Undef)
    }

    /// Truthiness: undef, numeric zero, the empty string and `"0"` are
    /// false; everything else (references included) is true.
    pub fn truthy(&self) -> bool {
        match self {
            Cell::Undef => false,
            Cell::Int(v) => *v != 0,
            Cell::Num(v) => *v != 0.0,
            Cell::Str(s) => !(s.is_empty() || s == b"0"),
            _ => true,
        }
    }

    /// Numeric coercion. Total: text reads its leading numeric prefix,
    /// non-numeric values read as zero.
    pub fn as_num(&self) -> f64 {
        match self {
            Cell::Undef => 0.0,
            Cell::Int(v) => *v as f64,
            Cell::Num(v) => *v,
            Cell::Str(s) => numeric_prefix(s),
            _ => 0.0,
        }
    }

    /// Integer coercion: the numeric coercion truncated toward zero.
    pub fn as_int(&self) -> i64 {
        match self {
            Cell::Int(v) => *v,
            other => {
                let n = other.as_num();
                if n.is_nan() { 0 } else { n.trunc() as i64 }
            }
        }
    }

    /// Text coercion as bytes. Undef reads as the empty string.
    pub fn as_bytes_vec(&self) -> Vec<u8> {
        match self {
            Cell::Undef => Vec::new(),
            Cell::Int(v) => v.to_string().into_bytes(),
            Cell::Num(v) => format_num(*v).into_bytes(),
            Cell::Str(s) => s.clone(),
            Cell::Ref { target, blessed } => {
                let kind = target.borrow().kind_name();
                let addr = Rc::as_ptr(target) as usize;
                match blessed {
                    Some(class) => format!("{}={}(0x{:x})", class, kind, addr).into_bytes(),
                    None => format!("{}(0x{:x})", kind, addr).into_bytes(),
                }
            }
            Cell::Array(_) => b"ARRAY".to_vec(),
            Cell::Hash(_) => b"HASH".to_vec(),
            Cell::Code(sub) => format!("CODE({})", sub.name()).into_bytes(),
            Cell::Glob(name) => format!("*{}", name).into_bytes(),
        }
    }

    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.as_bytes_vec()).into_owned()
    }

    /// The shape of this cell when used as a reference *target*.
    pub fn shape(&self) -> Shape {
        match self {
            Cell::Array(_) => Shape::Array,
            Cell::Hash(_) => Shape::Hash,
            Cell::Code(_) => Shape::Code,
            Cell::Glob(_) => Shape::Glob,
            _ => Shape::Scalar,
        }
    }

    /// The text name `ref_kind` reports for a reference to this cell:
    /// a reference to a reference reports `REF`, everything else its
    /// shape name.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Cell::Ref { .. } => "REF",
            other => other.shape().kind_name(),
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Undef => write!(f, "Undef"),
            Cell::Int(v) => write!(f, "Int({})", v),
            Cell::Num(v) => write!(f, "Num({})", v),
            Cell::Str(s) => write!(f, "Str({:?})", String::from_utf8_lossy(s)),
            Cell::Ref { target, blessed } => match blessed {
                Some(class) => write!(f, "Ref<{}>({})", class, target.borrow().kind_name()),
                None => write!(f, "Ref({})", target.borrow().kind_name()),
            },
            Cell::Array(elements) => write!(f, "Array[{}]", elements.len()),
            Cell::Hash(entries) => write!(f, "Hash{{{}}}", entries.len()),
            Cell::Code(sub) => write!(f, "Code({})", sub.name()),
            Cell::Glob(name) => write!(f, "Glob(*{})", name),
        }
    }
}

/// Renders a float the way the runtime prints it: integral values drop
/// the fraction, everything else uses the shortest round-trip form.
fn format_num(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Reads the leading numeric prefix of a byte string: optional
/// whitespace, sign, digits, fraction, exponent. Anything else reads as
/// zero; text-to-number coercion never fails.
fn numeric_prefix(s: &[u8]) -> f64 {
    let mut i = 0;
    while i < s.len() && (s[i] as char).is_ascii_whitespace() {
        i += 1;
    }
    let start = i;
    if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
        i += 1;
    }
    let digits_start = i;
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
    }
    if i < s.len() && s[i] == b'.' {
        i += 1;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i == digits_start {
        return 0.0;
    }
    if i < s.len() && (s[i] == b'e' || s[i] == b'E') {
        let mark = i;
        i += 1;
        if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            i = mark;
        }
    }
    std::str::from_utf8(&s[start..i])
        .ok()
        .and_then(|t| t.parse::<f64>().ok())
        .unwrap_or(0.0)
}
