//! Policy VM error types
//!
//! Re-exports gymcraft-error and provides VM-specific conveniences.

pub use gymcraft_error::{Error, ErrorKind, ErrorStatus, Result};

// =============================================================================
// Runtime faults (all are policy faults, eligible for regeneration)
// =============================================================================

pub fn stack_overflow() -> Error {
    Error::stack_overflow()
}

pub fn stack_underflow() -> Error {
    Error::stack_underflow()
}

/// Operand of the wrong JSON type
pub fn type_mismatch(opcode: &'static str, expected: &str, found: &serde_json::Value) -> Error {
    Error::policy_execution(format!(
        "{} expected {} but found {}",
        opcode,
        expected,
        type_name(found)
    ))
    .with_context("opcode", opcode)
}

pub fn division_by_zero(opcode: &'static str) -> Error {
    Error::policy_execution("division by zero").with_context("opcode", opcode)
}

pub fn path_not_found(path: impl Into<String>) -> Error {
    let path = path.into();
    Error::policy_execution(format!("'{}' is not defined", path)).with_context("path", path)
}

pub fn call_depth_exceeded(max: usize) -> Error {
    Error::new(ErrorKind::CallDepthExceeded, format!("call depth exceeded max {}", max))
        .with_context("max_depth", max.to_string())
}

pub fn instruction_budget_exceeded(max: usize) -> Error {
    Error::budget_exceeded(format!("executed more than {} instructions", max))
        .with_context("max_instructions", max.to_string())
}

pub fn time_budget_exceeded(budget_ms: u128) -> Error {
    Error::budget_exceeded(format!("ran longer than {}ms", budget_ms))
        .with_context("time_budget_ms", budget_ms.to_string())
}

pub fn missing_return(function: impl Into<String>) -> Error {
    let function = function.into();
    Error::policy_execution(format!("function '{}' ended without RETURN", function))
        .with_context("function", function)
}

// =============================================================================
// Compile-time faults (fatal, never retried)
// =============================================================================

pub fn unknown_label(function: &str, label: impl Into<String>) -> Error {
    let label = label.into();
    Error::policy_compilation(format!("label '{}' is not defined in '{}'", label, function))
        .with_context("function", function.to_string())
        .with_context("label", label)
}

pub fn duplicate_label(function: &str, label: impl Into<String>) -> Error {
    let label = label.into();
    Error::policy_compilation(format!("label '{}' is defined twice in '{}'", label, function))
        .with_context("function", function.to_string())
        .with_context("label", label)
}

pub fn unknown_function(name: impl Into<String>) -> Error {
    let name = name.into();
    Error::policy_compilation(format!("function '{}' is not defined", name))
        .with_context("function", name)
}

/// Short JSON type name used in error messages
pub fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
