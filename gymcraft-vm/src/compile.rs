//! # Policy Compiler
//!
//! Turns module source into a [`CompiledPolicy`]: the module is parsed, the
//! entry symbol is looked up and checked for the `(observation, memory)`
//! signature, and every label, call and random range is validated up front.
//! Anything rejected here is a definition error and is never retried.

use crate::error::{self, Error, Result};
use crate::opcode::{Opcode, PolicyModule};
use std::collections::{HashMap, HashSet};

/// Name of the function every policy must define
pub const DEFAULT_ENTRY: &str = "policy";

/// Number of parameters the entry function takes: observation and memory
pub const ENTRY_ARITY: usize = 2;

/// A function with its labels resolved to instruction indices
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    pub params: Vec<String>,
    pub code: Vec<Opcode>,
    labels: HashMap<String, usize>,
}

impl CompiledFunction {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Instruction index of a label
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }
}

/// A validated policy, ready for the interpreter
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    module: PolicyModule,
    entry: String,
    functions: HashMap<String, CompiledFunction>,
}

impl CompiledPolicy {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn entry_function(&self) -> Option<&CompiledFunction> {
        self.functions.get(&self.entry)
    }

    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.get(name)
    }

    pub fn module(&self) -> &PolicyModule {
        &self.module
    }

    pub fn name(&self) -> &str {
        self.module.name.as_deref().unwrap_or(&self.entry)
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.values().map(|f| f.code.len()).sum()
    }
}

/// Compile policy source, requiring `entry` as the callable entry point.
pub fn compile(source: &str, entry: &str) -> Result<CompiledPolicy> {
    let module = PolicyModule::parse(source).map_err(|e| {
        Error::policy_compilation(format!("policy could not be parsed: {}", e.message()))
            .with_operation("compile")
            .set_source(e)
    })?;
    compile_module(module, entry)
}

/// Compile an already-parsed module.
pub fn compile_module(module: PolicyModule, entry: &str) -> Result<CompiledPolicy> {
    let entry_fn = module.functions.get(entry).ok_or_else(|| {
        Error::policy_compilation(format!("the source does not define a callable \"{}\"", entry))
            .with_operation("compile")
            .with_context("entry", entry.to_string())
    })?;
    if entry_fn.params.len() != ENTRY_ARITY {
        return Err(Error::policy_compilation(format!(
            "\"{}\" must take exactly {} parameters (observation, memory), found {}",
            entry,
            ENTRY_ARITY,
            entry_fn.params.len()
        ))
        .with_operation("compile")
        .with_context("entry", entry.to_string()));
    }

    let mut functions = HashMap::with_capacity(module.functions.len());
    for (name, function) in &module.functions {
        let compiled = compile_function(name, &function.params, &function.code, &module)
            .map_err(|e| e.with_operation("compile"))?;
        functions.insert(name.clone(), compiled);
    }

    tracing::debug!(
        entry,
        functions = functions.len(),
        "compiled policy module"
    );

    Ok(CompiledPolicy {
        entry: entry.to_string(),
        module,
        functions,
    })
}

fn compile_function(
    name: &str,
    params: &[String],
    code: &[Opcode],
    module: &PolicyModule,
) -> Result<CompiledFunction> {
    let mut seen = HashSet::new();
    for param in params {
        if param.is_empty() || param.contains('.') {
            return Err(Error::policy_compilation(format!(
                "parameter name '{}' of '{}' is not a plain identifier",
                param, name
            ))
            .with_context("function", name.to_string()));
        }
        if !seen.insert(param.as_str()) {
            return Err(Error::policy_compilation(format!(
                "parameter '{}' appears twice in '{}'",
                param, name
            ))
            .with_context("function", name.to_string()));
        }
    }

    if code.is_empty() {
        return Err(Error::policy_compilation(format!("function '{}' has no code", name))
            .with_context("function", name.to_string()));
    }

    let mut labels = HashMap::new();
    for (pc, op) in code.iter().enumerate() {
        if let Opcode::Label { name: label } = op {
            if labels.insert(label.clone(), pc).is_some() {
                return Err(error::duplicate_label(name, label.clone()));
            }
        }
    }

    for (pc, op) in code.iter().enumerate() {
        if let Some(target) = op.jump_target() {
            if !labels.contains_key(target) {
                return Err(error::unknown_label(name, target).with_context("pc", pc.to_string()));
            }
        }
        match op {
            Opcode::Call { function } if !module.functions.contains_key(function) => {
                return Err(error::unknown_function(function.clone()).with_context("pc", pc.to_string()));
            }
            Opcode::Random { low, high } if low >= high => {
                return Err(Error::policy_compilation(format!(
                    "RANDOM range {}..{} is empty",
                    low, high
                ))
                .with_context("function", name.to_string())
                .with_context("pc", pc.to_string()));
            }
            _ => {}
        }
    }

    Ok(CompiledFunction {
        name: name.to_string(),
        params: params.to_vec(),
        code: code.to_vec(),
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const ALWAYS_RIGHT: &str = r#"{
        "functions": {
            "policy": {
                "params": ["observation", "memory"],
                "code": [{"op": "PUSH", "value": 1}, {"op": "RETURN"}]
            }
        }
    }"#;

    #[test]
    fn test_compile_minimal_policy() {
        let policy = compile(ALWAYS_RIGHT, DEFAULT_ENTRY).unwrap();
        assert_eq!(policy.entry(), "policy");
        assert_eq!(policy.entry_function().unwrap().arity(), 2);
        assert_eq!(policy.instruction_count(), 2);
    }

    #[test]
    fn test_missing_entry() {
        let err = compile(ALWAYS_RIGHT, "act").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyCompilation);
        assert!(err.message().contains("callable \"act\""));
    }

    #[test]
    fn test_parse_error_is_compilation_error() {
        let err = compile("{ not json", DEFAULT_ENTRY).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyCompilation);
        assert!(err.source_ref().is_some());
    }

    #[test]
    fn test_entry_signature() {
        let source = r#"{"functions": {"policy": {"params": ["observation"], "code": [{"op": "RETURN"}]}}}"#;
        let err = compile(source, DEFAULT_ENTRY).unwrap_err();
        assert!(err.message().contains("exactly 2 parameters"));
    }

    #[test]
    fn test_label_resolution() {
        let source = r#"{"functions": {"policy": {"params": ["o", "m"], "code": [
            {"op": "LABEL", "name": "top"},
            {"op": "PUSH", "value": true},
            {"op": "JUMP_IF", "target": "end"},
            {"op": "JUMP", "target": "top"},
            {"op": "LABEL", "name": "end"},
            {"op": "PUSH", "value": 0},
            {"op": "RETURN"}
        ]}}}"#;
        let policy = compile(source, DEFAULT_ENTRY).unwrap();
        let f = policy.function("policy").unwrap();
        assert_eq!(f.label("top"), Some(0));
        assert_eq!(f.label("end"), Some(4));
    }

    #[test]
    fn test_unknown_and_duplicate_labels() {
        let unknown = r#"{"functions": {"policy": {"params": ["o", "m"], "code": [
            {"op": "JUMP", "target": "nowhere"}
        ]}}}"#;
        let err = compile(unknown, DEFAULT_ENTRY).unwrap_err();
        assert_eq!(err.context_value("label"), Some("nowhere"));

        let duplicate = r#"{"functions": {"policy": {"params": ["o", "m"], "code": [
            {"op": "LABEL", "name": "a"}, {"op": "LABEL", "name": "a"}, {"op": "RETURN"}
        ]}}}"#;
        assert!(compile(duplicate, DEFAULT_ENTRY).is_err());
    }

    #[test]
    fn test_call_and_random_validation() {
        let bad_call = r#"{"functions": {"policy": {"params": ["o", "m"], "code": [
            {"op": "CALL", "function": "helper"}, {"op": "RETURN"}
        ]}}}"#;
        let err = compile(bad_call, DEFAULT_ENTRY).unwrap_err();
        assert_eq!(err.context_value("function"), Some("helper"));

        let bad_random = r#"{"functions": {"policy": {"params": ["o", "m"], "code": [
            {"op": "RANDOM", "low": 4, "high": 4}, {"op": "RETURN"}
        ]}}}"#;
        assert!(compile(bad_random, DEFAULT_ENTRY).is_err());
    }

    #[test]
    fn test_duplicate_params() {
        let source = r#"{"functions": {"policy": {"params": ["o", "o"], "code": [{"op": "RETURN"}]}}}"#;
        assert!(compile(source, DEFAULT_ENTRY).is_err());
    }
}
