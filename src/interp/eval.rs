use std::collections::BTreeMap;

use crate::interp::cell::{self, Cell, RawCell};
use crate::interp::engine::{Engine, die};
use crate::interp::Context;
use crate::syntax::ast::{Expression, InfixOp, PrefixOp, Program, Statement};
use crate::syntax::parser::parse_source;

/// Parses and evaluates one source text; the program's value is the last
/// statement's, in scalar context. Syntax errors die like runtime errors.
pub fn eval_source(engine: &mut Engine, source: &str) -> Result<RawCell, RawCell> {
    let program = parse_source(source).map_err(die)?;
    eval_program(engine, &program)
}

pub fn eval_program(engine: &mut Engine, program: &Program) -> Result<RawCell, RawCell> {
    eval_statements(engine, &program.statements)
}

fn eval_statements(engine: &mut Engine, statements: &[Statement]) -> Result<RawCell, RawCell> {
    let mut last = cell::undef();
    for statement in statements {
        last = eval_statement(engine, statement)?;
    }
    Ok(last)
}

fn eval_statement(engine: &mut Engine, statement: &Statement) -> Result<RawCell, RawCell> {
    match statement {
        Statement::Expression(expression) => eval_expression(engine, expression),
        Statement::Assign { name, value } => {
            let value = eval_expression(engine, value)?;
            let slot = engine.scalar_slot(name);
            cell::set_from(&slot, &value);
            Ok(value)
        }
        Statement::Require { module } => {
            engine.require(module)?;
            Ok(cell::int(1))
        }
    }
}

fn eval_expression(engine: &mut Engine, expression: &Expression) -> Result<RawCell, RawCell> {
    match expression {
        Expression::Int(v) => Ok(cell::int(*v)),
        Expression::Float(v) => Ok(cell::num(*v)),
        Expression::Str(s) => Ok(cell::bytes(s.clone())),
        Expression::Undef => Ok(cell::undef()),
        // A global in expression position is the slot itself, so passing
        // it as a call argument aliases the variable.
        Expression::Var(name) => Ok(engine.scalar_slot(name)),
        Expression::ArrayLit(elements) => {
            let mut cells = Vec::with_capacity(elements.len());
            for element in elements {
                let value = eval_expression(engine, element)?;
                cells.push(cell::shallow_copy(&value));
            }
            Ok(cell::ref_to(cell::new_cell(Cell::Array(cells))))
        }
        Expression::HashLit(pairs) => {
            let mut entries = BTreeMap::new();
            for (key, value) in pairs {
                let value = eval_expression(engine, value)?;
                entries.insert(
                    String::from_utf8_lossy(key).into_owned(),
                    cell::shallow_copy(&value),
                );
            }
            Ok(cell::ref_to(cell::new_cell(Cell::Hash(entries))))
        }
        Expression::Call { name, args } => {
            let mut cells = Vec::with_capacity(args.len());
            for arg in args {
                cells.push(eval_expression(engine, arg)?);
            }
            let func = cell::bytes(name.clone().into_bytes());
            let mut values = engine.call(&func, &cells, Context::Scalar)?;
            Ok(values.pop().unwrap_or_else(cell::undef))
        }
        Expression::Eval(statements) => match eval_statements(engine, statements) {
            Ok(value) => {
                engine.clear_error();
                Ok(value)
            }
            Err(error) => {
                engine.set_error(&error);
                Ok(cell::undef())
            }
        },
        Expression::Prefix { op, right } => {
            let right = eval_expression(engine, right)?;
            let result = match (op, &*right.borrow()) {
                (PrefixOp::Neg, Cell::Int(v)) => cell::int(-v),
                (PrefixOp::Neg, other) => cell::num(-other.as_num()),
            };
            Ok(result)
        }
        Expression::Infix { op, left, right } => {
            let left = eval_expression(engine, left)?;
            let right = eval_expression(engine, right)?;
            eval_infix(*op, &left, &right)
        }
    }
}

fn eval_infix(op: InfixOp, left: &RawCell, right: &RawCell) -> Result<RawCell, RawCell> {
    if op == InfixOp::Concat {
        let mut bytes = left.borrow().as_bytes_vec();
        bytes.extend_from_slice(&right.borrow().as_bytes_vec());
        return Ok(cell::bytes(bytes));
    }

    let both_int = matches!(
        (&*left.borrow(), &*right.borrow()),
        (Cell::Int(_), Cell::Int(_))
    );
    if both_int && op != InfixOp::Div {
        let a = left.borrow().as_int();
        let b = right.borrow().as_int();
        let exact = match op {
            InfixOp::Add => a.checked_add(b),
            InfixOp::Sub => a.checked_sub(b),
            InfixOp::Mul => a.checked_mul(b),
            _ => None,
        };
        if let Some(value) = exact {
            return Ok(cell::int(value));
        }
        // Overflow degrades to the float representation.
    }

    let a = left.borrow().as_num();
    let b = right.borrow().as_num();
    let value = match op {
        InfixOp::Add => a + b,
        InfixOp::Sub => a - b,
        InfixOp::Mul => a * b,
        InfixOp::Div => {
            if b == 0.0 {
                return Err(die("illegal division by zero"));
            }
            a / b
        }
        InfixOp::Concat => unreachable!(),
    };
    Ok(cell::num(value))
}
