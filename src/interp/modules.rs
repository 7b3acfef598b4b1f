//! Built-in loadable modules and the core subroutine set.
//!
//! `require` resolves bare module names against this registry; there is no
//! filesystem search path. The two codec modules exist so serialization is
//! an opt-in dependency of a session, loaded on first use, exactly like an
//! external module would be.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::{Map, Number, Value};

use crate::interp::cell::{self, Cell, RawCell};
use crate::interp::engine::{Engine, NativeFn, Sub, die};
use crate::interp::eval::eval_source;

/// Nesting deeper than this fails encoding rather than recursing into a
/// cyclic value graph.
const MAX_ENCODE_DEPTH: usize = 128;

fn install(engine: &mut Engine, name: &str, func: NativeFn) {
    engine.set_code_slot(name, Sub::new(name, func));
}

fn arity_error(name: &str, expected: &str, got: usize) -> RawCell {
    die(format!(
        "{} expects {} argument(s), got {}",
        name, expected, got
    ))
}

/// Installs the always-available core subroutines. Called once at session
/// startup, before any startup program runs.
pub fn install_core(engine: &mut Engine) {
    install(
        engine,
        "main::warn",
        Rc::new(|engine, args, _cx| {
            let mut text = Vec::new();
            for arg in args {
                text.extend_from_slice(&arg.borrow().as_bytes_vec());
            }
            if text.is_empty() {
                text.extend_from_slice(b"Warning: something's wrong");
            }
            if text.last() != Some(&b'\n') {
                text.push(b'\n');
            }
            let message = cell::bytes(text);
            engine.warn(&message);
            Ok(vec![cell::int(1)])
        }),
    );

    install(
        engine,
        "main::die",
        Rc::new(|_engine, args, _cx| {
            let mut text = Vec::new();
            for arg in args {
                text.extend_from_slice(&arg.borrow().as_bytes_vec());
            }
            if text.is_empty() {
                text.extend_from_slice(b"Died");
            }
            Err(cell::bytes(text))
        }),
    );

    install(
        engine,
        "main::bless",
        Rc::new(|engine, args, _cx| {
            if args.is_empty() || args.len() > 2 {
                return Err(arity_error("bless", "1 or 2", args.len()));
            }
            let class = match args.get(1) {
                Some(name) => name.borrow().as_text(),
                None => "main".to_string(),
            };
            engine.bless(&args[0], &class)?;
            Ok(vec![Rc::clone(&args[0])])
        }),
    );
}

/// Loads one built-in module into the symbol table. The caller (the
/// engine's `require`) handles load-once bookkeeping.
pub fn load(engine: &mut Engine, module: &str) -> Result<(), RawCell> {
    match module {
        "Codec::Tree" => {
            install_tree_codec(engine);
            Ok(())
        }
        "Codec::Lit" => {
            install_lit_codec(engine);
            Ok(())
        }
        _ => Err(die(format!(
            "can't locate module {} in the built-in registry",
            module
        ))),
    }
}

// ---- Codec::Tree: strict tree-structured text ----
//
// Scalars map onto JSON directly; references wrap their payload in a
// single-key node so a decoded tree is unambiguous:
//   {"array": [..]}  {"hash": {..}}  {"scalar": ..}
//   {"object": {"class": "..", "value": <node>}}

fn install_tree_codec(engine: &mut Engine) {
    install(
        engine,
        "Codec::Tree::encode",
        Rc::new(|_engine, args, _cx| {
            if args.len() != 1 {
                return Err(arity_error("Codec::Tree::encode", "1", args.len()));
            }
            let tree = cell_to_tree(&args[0], 0)?;
            let text = serde_json::to_string(&tree)
                .map_err(|e| die(format!("Codec::Tree::encode failed: {}", e)))?;
            Ok(vec![cell::bytes(text.into_bytes())])
        }),
    );
    install(
        engine,
        "Codec::Tree::decode",
        Rc::new(|_engine, args, _cx| {
            if args.len() != 1 {
                return Err(arity_error("Codec::Tree::decode", "1", args.len()));
            }
            let text = args[0].borrow().as_text();
            let tree: Value = serde_json::from_str(&text)
                .map_err(|e| die(format!("Codec::Tree::decode failed: {}", e)))?;
            Ok(vec![tree_to_cell(&tree)?])
        }),
    );
}

fn cell_to_tree(value: &RawCell, depth: usize) -> Result<Value, RawCell> {
    if depth > MAX_ENCODE_DEPTH {
        return Err(die("Codec::Tree::encode failed: value graph too deep"));
    }
    let body = value.borrow();
    match &*body {
        Cell::Undef => Ok(Value::Null),
        Cell::Int(v) => Ok(Value::Number((*v).into())),
        Cell::Num(v) => Number::from_f64(*v)
            .map(Value::Number)
            .ok_or_else(|| die("Codec::Tree::encode failed: non-finite number")),
        Cell::Str(s) => Ok(Value::String(String::from_utf8_lossy(s).into_owned())),
        Cell::Ref { target, blessed } => {
            let payload = match &*target.borrow() {
                Cell::Array(elements) => {
                    let mut items = Vec::with_capacity(elements.len());
                    for element in elements {
                        items.push(cell_to_tree(element, depth + 1)?);
                    }
                    node("array", Value::Array(items))
                }
                Cell::Hash(entries) => {
                    let mut map = Map::new();
                    for (key, entry) in entries {
                        map.insert(key.clone(), cell_to_tree(entry, depth + 1)?);
                    }
                    node("hash", Value::Object(map))
                }
                Cell::Code(_) | Cell::Glob(_) => {
                    return Err(die(format!(
                        "Codec::Tree::encode failed: cannot encode a {} reference",
                        target.borrow().shape().kind_name()
                    )));
                }
                _ => node("scalar", cell_to_tree(target, depth + 1)?),
            };
            match blessed {
                Some(class) => {
                    let mut object = Map::new();
                    object.insert("class".to_string(), Value::String(class.clone()));
                    object.insert("value".to_string(), payload);
                    Ok(node("object", Value::Object(object)))
                }
                None => Ok(payload),
            }
        }
        other => Err(die(format!(
            "Codec::Tree::encode failed: cannot encode a bare {} value",
            other.shape().kind_name()
        ))),
    }
}

fn node(tag: &str, payload: Value) -> Value {
    let mut map = Map::new();
    map.insert(tag.to_string(), payload);
    Value::Object(map)
}

fn tree_to_cell(tree: &Value) -> Result<RawCell, RawCell> {
    match tree {
        Value::Null => Ok(cell::undef()),
        Value::Bool(b) => Ok(cell::int(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(cell::int(i))
            } else {
                Ok(cell::num(n.as_f64().unwrap_or(0.0)))
            }
        }
        Value::String(s) => Ok(cell::bytes(s.clone().into_bytes())),
        Value::Object(map) if map.len() == 1 => {
            let Some((tag, payload)) = map.iter().next() else {
                return Err(die("Codec::Tree::decode failed: unrecognized tree node"));
            };
            match (tag.as_str(), payload) {
                ("array", Value::Array(items)) => {
                    let mut elements = Vec::with_capacity(items.len());
                    for item in items {
                        elements.push(tree_to_cell(item)?);
                    }
                    Ok(cell::ref_to(cell::new_cell(Cell::Array(elements))))
                }
                ("hash", Value::Object(entries)) => {
                    let mut map = BTreeMap::new();
                    for (key, entry) in entries {
                        map.insert(key.clone(), tree_to_cell(entry)?);
                    }
                    Ok(cell::ref_to(cell::new_cell(Cell::Hash(map))))
                }
                ("scalar", inner) => Ok(cell::ref_to(tree_to_cell(inner)?)),
                ("object", Value::Object(fields)) => {
                    let class = fields
                        .get("class")
                        .and_then(Value::as_str)
                        .ok_or_else(|| die("Codec::Tree::decode failed: object node without class"))?;
                    let value = fields
                        .get("value")
                        .ok_or_else(|| die("Codec::Tree::decode failed: object node without value"))?;
                    let decoded = tree_to_cell(value)?;
                    match &mut *decoded.borrow_mut() {
                        Cell::Ref { blessed, .. } => *blessed = Some(class.to_string()),
                        _ => {
                            return Err(die(
                                "Codec::Tree::decode failed: object node does not wrap a reference",
                            ));
                        }
                    }
                    Ok(decoded)
                }
                _ => Err(die(format!(
                    "Codec::Tree::decode failed: unrecognized node tag '{}'",
                    tag
                ))),
            }
        }
        _ => Err(die("Codec::Tree::decode failed: unrecognized tree node")),
    }
}

// ---- Codec::Lit: the language's own literal expressions ----
//
// Encoding renders a value as brine literal source; decoding is just
// evaluation. Code, glob and blessed references have no literal form.

fn install_lit_codec(engine: &mut Engine) {
    install(
        engine,
        "Codec::Lit::encode",
        Rc::new(|_engine, args, _cx| {
            if args.len() != 1 {
                return Err(arity_error("Codec::Lit::encode", "1", args.len()));
            }
            let mut out = String::new();
            cell_to_literal(&args[0], 0, &mut out)?;
            Ok(vec![cell::bytes(out.into_bytes())])
        }),
    );
    install(
        engine,
        "Codec::Lit::decode",
        Rc::new(|engine, args, _cx| {
            if args.len() != 1 {
                return Err(arity_error("Codec::Lit::decode", "1", args.len()));
            }
            let text = args[0].borrow().as_text();
            Ok(vec![eval_source(engine, &text)?])
        }),
    );
}

fn cell_to_literal(value: &RawCell, depth: usize, out: &mut String) -> Result<(), RawCell> {
    if depth > MAX_ENCODE_DEPTH {
        return Err(die("Codec::Lit::encode failed: value graph too deep"));
    }
    let body = value.borrow();
    match &*body {
        Cell::Undef => out.push_str("undef"),
        Cell::Int(v) => out.push_str(&v.to_string()),
        Cell::Num(v) => {
            if !v.is_finite() {
                return Err(die("Codec::Lit::encode failed: non-finite number"));
            }
            let text = format!("{}", v);
            out.push_str(&text);
            // An integral float must stay a float literal to round-trip.
            if !text.contains(['.', 'e', 'E']) {
                out.push_str(".0");
            }
        }
        Cell::Str(s) => quote_bytes(s, out),
        Cell::Ref { blessed: Some(_), .. } => {
            return Err(die(
                "Codec::Lit::encode failed: blessed references have no literal form",
            ));
        }
        Cell::Ref { target, blessed: None } => match &*target.borrow() {
            Cell::Array(elements) => {
                out.push('[');
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    cell_to_literal(element, depth + 1, out)?;
                }
                out.push(']');
            }
            Cell::Hash(entries) => {
                out.push('{');
                for (i, (key, entry)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    quote_bytes(key.as_bytes(), out);
                    out.push_str(": ");
                    cell_to_literal(entry, depth + 1, out)?;
                }
                out.push('}');
            }
            other @ (Cell::Code(_) | Cell::Glob(_)) => {
                return Err(die(format!(
                    "Codec::Lit::encode failed: cannot encode a {} reference",
                    other.shape().kind_name()
                )));
            }
            _ => {
                return Err(die(
                    "Codec::Lit::encode failed: scalar references have no literal form",
                ));
            }
        },
        other => {
            return Err(die(format!(
                "Codec::Lit::encode failed: cannot encode a bare {} value",
                other.shape().kind_name()
            )));
        }
    }
    Ok(())
}

/// Quotes a byte string as a double-quoted brine literal. Printable ASCII
/// passes through; everything else (including non-ASCII bytes) becomes an
/// escape, so arbitrary bytes survive the round trip.
fn quote_bytes(bytes: &[u8], out: &mut String) {
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('"');
}
