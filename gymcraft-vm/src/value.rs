//! Value semantics for policy operands.
//!
//! Operands are plain JSON. Integers stay integers as long as the checked
//! `i64` operation succeeds; anything else is computed in `f64`.

use crate::error::{self, Error, Result};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Truthiness used by `JUMP_IF`, `JUMP_UNLESS`, `AND`, `OR` and `NOT`.
///
/// `null`, `false`, zero, and empty strings, arrays and objects are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality that treats `1` and `1.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "ADD",
            ArithOp::Sub => "SUB",
            ArithOp::Mul => "MUL",
            ArithOp::Div => "DIV",
            ArithOp::Mod => "MOD",
        }
    }
}

/// Apply `a <op> b`.
///
/// `ADD` also concatenates two strings or two arrays. Integer `DIV` and `MOD`
/// floor toward negative infinity.
pub fn arith(op: ArithOp, a: &Value, b: &Value) -> Result<Value> {
    if let ArithOp::Add = op {
        match (a, b) {
            (Value::String(x), Value::String(y)) => return Ok(Value::String(format!("{}{}", x, y))),
            (Value::Array(x), Value::Array(y)) => {
                let mut out = x.clone();
                out.extend(y.iter().cloned());
                return Ok(Value::Array(out));
            }
            _ => {}
        }
    }

    let x = as_number(op.name(), a)?;
    let y = as_number(op.name(), b)?;

    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        let checked = match op {
            ArithOp::Add => x.checked_add(y),
            ArithOp::Sub => x.checked_sub(y),
            ArithOp::Mul => x.checked_mul(y),
            ArithOp::Div | ArithOp::Mod if y == 0 => return Err(error::division_by_zero(op.name())),
            ArithOp::Div => x.checked_div_euclid(y).map(|q| {
                // div_euclid rounds toward the sign of y; adjust to floor
                if y < 0 && x.rem_euclid(y) != 0 { q - 1 } else { q }
            }),
            ArithOp::Mod => x.checked_rem_euclid(y).map(|r| if y < 0 && r != 0 { r + y } else { r }),
        };
        if let Some(v) = checked {
            return Ok(Value::from(v));
        }
    }

    let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div | ArithOp::Mod if y == 0.0 => return Err(error::division_by_zero(op.name())),
        ArithOp::Div => x / y,
        ArithOp::Mod => x - y * (x / y).floor(),
    };
    float(op.name(), result)
}

#[derive(Debug, Clone, Copy)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Ordered comparison of two numbers or two strings
pub fn compare(op: CompareOp, a: &Value, b: &Value) -> Result<bool> {
    let name = match op {
        CompareOp::Lt => "LT",
        CompareOp::Le => "LE",
        CompareOp::Gt => "GT",
        CompareOp::Ge => "GE",
    };
    let ordering = match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64().zip(y.as_f64()).and_then(|(x, y)| x.partial_cmp(&y)),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(_), other) | (Value::String(_), other) => {
            return Err(error::type_mismatch(name, error::type_name(a), other))
        }
        (other, _) => return Err(error::type_mismatch(name, "number or string", other)),
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    })
}

/// Length of an array, object or string
pub fn len(value: &Value) -> Result<Value> {
    let n = match value {
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        Value::String(s) => s.chars().count(),
        other => return Err(error::type_mismatch("LEN", "array, object or string", other)),
    };
    Ok(Value::from(n))
}

/// Index into an array (negative counts from the end), object or string
pub fn get(container: &Value, key: &Value) -> Result<Value> {
    match (container, key) {
        (Value::Array(items), Value::Number(_)) => {
            let index = index_of(key, items.len())?;
            Ok(items[index].clone())
        }
        (Value::String(s), Value::Number(_)) => {
            let chars: Vec<char> = s.chars().collect();
            let index = index_of(key, chars.len())?;
            Ok(Value::String(chars[index].to_string()))
        }
        (Value::Object(map), Value::String(k)) => map
            .get(k)
            .cloned()
            .ok_or_else(|| Error::policy_execution(format!("key '{}' not found", k)).with_context("key", k.clone())),
        (Value::Array(_), other) | (Value::String(_), other) => {
            Err(error::type_mismatch("GET", "integer index", other))
        }
        (Value::Object(_), other) => Err(error::type_mismatch("GET", "string key", other)),
        (other, _) => Err(error::type_mismatch("GET", "array, object or string", other)),
    }
}

/// Membership: array element, object key, or substring
pub fn contains(container: &Value, needle: &Value) -> Result<bool> {
    match container {
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        Value::Object(map) => match needle {
            Value::String(k) => Ok(map.contains_key(k)),
            other => Err(error::type_mismatch("CONTAINS", "string key", other)),
        },
        Value::String(s) => match needle {
            Value::String(sub) => Ok(s.contains(sub.as_str())),
            other => Err(error::type_mismatch("CONTAINS", "string", other)),
        },
        other => Err(error::type_mismatch("CONTAINS", "array, object or string", other)),
    }
}

pub fn append(container: Value, item: Value) -> Result<Value> {
    match container {
        Value::Array(mut items) => {
            items.push(item);
            Ok(Value::Array(items))
        }
        other => Err(error::type_mismatch("APPEND", "array", &other)),
    }
}

// =============================================================================
// Dotted paths
// =============================================================================

/// Read `path` from a frame's locals.
///
/// The first segment names a local; later segments are object keys or array
/// indices, e.g. `observation.agent.0`.
pub fn resolve(locals: &Map<String, Value>, path: &str) -> Result<Value> {
    let mut segments = path.split('.');
    let head = segments.next().unwrap_or_default();
    let mut current = locals.get(head).ok_or_else(|| error::path_not_found(path))?;
    for segment in segments {
        current = step_into(current, segment).ok_or_else(|| error::path_not_found(path))?;
    }
    Ok(current.clone())
}

/// Write `value` at `path`, creating missing object keys along the way.
///
/// A single-segment path binds (or rebinds) a local.
pub fn assign(locals: &mut Map<String, Value>, path: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let (head, rest) = match segments.split_first() {
        Some((head, rest)) if !head.is_empty() => (*head, rest),
        _ => return Err(Error::policy_execution("STORE needs a non-empty path").with_context("path", path)),
    };
    let Some((last, parents)) = rest.split_last() else {
        locals.insert(head.to_string(), value);
        return Ok(());
    };

    let mut current = locals.get_mut(head).ok_or_else(|| error::path_not_found(path))?;
    for segment in parents {
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = segment.parse::<usize>().map_err(|_| error::path_not_found(path))?;
                items.get_mut(index).ok_or_else(|| error::path_not_found(path))?
            }
            other => return Err(error::type_mismatch("STORE", "array or object", other)),
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = last.parse::<usize>().map_err(|_| error::path_not_found(path))?;
            match index.cmp(&items.len()) {
                Ordering::Less => items[index] = value,
                Ordering::Equal => items.push(value),
                Ordering::Greater => return Err(error::path_not_found(path)),
            }
            Ok(())
        }
        other => Err(error::type_mismatch("STORE", "array or object", other)),
    }
}

fn step_into<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn as_number<'a>(opcode: &'static str, value: &'a Value) -> Result<&'a Number> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(error::type_mismatch(opcode, "number", other)),
    }
}

fn float(opcode: &'static str, result: f64) -> Result<Value> {
    Number::from_f64(result).map(Value::Number).ok_or_else(|| {
        Error::policy_execution(format!("{} produced a non-finite number", opcode))
            .with_context("opcode", opcode)
    })
}

fn index_of(key: &Value, len: usize) -> Result<usize> {
    let raw = key
        .as_i64()
        .ok_or_else(|| error::type_mismatch("GET", "integer index", key))?;
    let index = if raw < 0 { len as i64 + raw } else { raw };
    if index < 0 || index >= len as i64 {
        return Err(Error::policy_execution(format!("index {} out of range for length {}", raw, len))
            .with_context("index", raw.to_string()));
    }
    Ok(index as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!truthy(&falsy), "{} should be falsy", falsy);
        }
        for t in [json!(true), json!(-1), json!("x"), json!([0]), json!({"a": 0})] {
            assert!(truthy(&t), "{} should be truthy", t);
        }
    }

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        assert_eq!(arith(ArithOp::Add, &json!(2), &json!(3)).unwrap(), json!(5));
        assert_eq!(arith(ArithOp::Div, &json!(7), &json!(2)).unwrap(), json!(3));
        assert_eq!(arith(ArithOp::Div, &json!(-7), &json!(2)).unwrap(), json!(-4));
        assert_eq!(arith(ArithOp::Mod, &json!(-1), &json!(4)).unwrap(), json!(3));
        assert_eq!(arith(ArithOp::Mod, &json!(5), &json!(4)).unwrap(), json!(1));
        assert_eq!(arith(ArithOp::Mul, &json!(2.5), &json!(2)).unwrap(), json!(5.0));
    }

    #[test]
    fn test_overflow_falls_back_to_float() {
        let v = arith(ArithOp::Mul, &json!(i64::MAX), &json!(2)).unwrap();
        assert!(v.is_f64());
    }

    #[test]
    fn test_division_by_zero() {
        let err = arith(ArithOp::Div, &json!(1), &json!(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyExecution);
        assert!(arith(ArithOp::Mod, &json!(1.0), &json!(0.0)).is_err());
    }

    #[test]
    fn test_add_concatenates() {
        assert_eq!(arith(ArithOp::Add, &json!("ab"), &json!("c")).unwrap(), json!("abc"));
        assert_eq!(arith(ArithOp::Add, &json!([1]), &json!([2])).unwrap(), json!([1, 2]));
        assert!(arith(ArithOp::Sub, &json!("a"), &json!(1)).is_err());
    }

    #[test]
    fn test_compare() {
        assert!(compare(CompareOp::Lt, &json!(1), &json!(2.5)).unwrap());
        assert!(compare(CompareOp::Ge, &json!("b"), &json!("a")).unwrap());
        assert!(compare(CompareOp::Le, &json!(3), &json!(3)).unwrap());
        assert!(compare(CompareOp::Gt, &json!(1), &json!("a")).is_err());
        assert!(values_equal(&json!([1, 2]), &json!([1.0, 2])));
    }

    #[test]
    fn test_collections() {
        assert_eq!(len(&json!([1, 2, 3])).unwrap(), json!(3));
        assert_eq!(get(&json!([1, 2, 3]), &json!(-1)).unwrap(), json!(3));
        assert_eq!(get(&json!({"a": 1}), &json!("a")).unwrap(), json!(1));
        assert!(get(&json!([1]), &json!(1)).is_err());
        assert!(contains(&json!([[0, 1], [2, 3]]), &json!([2, 3])).unwrap());
        assert!(contains(&json!({"k": 1}), &json!("k")).unwrap());
        assert_eq!(append(json!([1]), json!(2)).unwrap(), json!([1, 2]));
        assert!(append(json!({}), json!(2)).is_err());
    }

    #[test]
    fn test_resolve_paths() {
        let mut locals = Map::new();
        locals.insert("observation".into(), json!({"agent": [2, 3], "grid": [[0, 1]]}));
        assert_eq!(resolve(&locals, "observation.agent.1").unwrap(), json!(3));
        assert_eq!(resolve(&locals, "observation.grid.0.1").unwrap(), json!(1));
        let err = resolve(&locals, "observation.goal").unwrap_err();
        assert_eq!(err.context_value("path"), Some("observation.goal"));
        assert!(resolve(&locals, "nothing").is_err());
    }

    #[test]
    fn test_assign_creates_keys() {
        let mut locals = Map::new();
        locals.insert("memory".into(), json!({}));
        assign(&mut locals, "memory.last.action", json!(2)).unwrap();
        assign(&mut locals, "x", json!(1)).unwrap();
        assert_eq!(locals["memory"], json!({"last": {"action": 2}}));
        assert_eq!(locals["x"], json!(1));

        locals.insert("xs".into(), json!([0]));
        assign(&mut locals, "xs.1", json!(5)).unwrap();
        assert_eq!(locals["xs"], json!([0, 5]));
        assert!(assign(&mut locals, "xs.5", json!(5)).is_err());
        assert!(assign(&mut locals, "x.y", json!(5)).is_err());
        assert!(assign(&mut locals, "missing.y", json!(5)).is_err());
    }
}
