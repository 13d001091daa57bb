//! # Policy Interpreter
//!
//! Executes a [`CompiledPolicy`] once per decision. Every call gets a fresh
//! frame (operand stack plus locals); the entry frame binds its two
//! parameters to the observation and the current memory. The memory returned
//! to the caller is whatever the second parameter is bound to when the entry
//! function returns.
//!
//! Execution is bounded by an instruction count, a call depth and a
//! wall-clock budget. A policy cannot reach anything outside its frames.

use crate::compile::{CompiledFunction, CompiledPolicy};
use crate::error::{self, Error, Result};
use crate::memory::PolicyMemory;
use crate::opcode::{LogLevel, Opcode};
use crate::stack::Stack;
use crate::value::{self, ArithOp, CompareOp};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Number of executed instructions kept for failure reports
pub const TRACE_CAPACITY: usize = 64;

/// Budgets for a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub max_instructions: usize,
    pub max_call_depth: usize,
    pub time_budget: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_instructions: 10_000,
            max_call_depth: 16,
            time_budget: Duration::from_millis(100),
        }
    }
}

/// One executed instruction
#[derive(Debug, Clone)]
pub struct ExecutionStep {
    pub step: usize,
    pub function: String,
    pub pc: usize,
    pub opcode: &'static str,
    /// Top of stack after the instruction, if any
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl fmt::Display for ExecutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}@{} {}", self.step, self.function, self.pc, self.opcode)?;
        if let Some(err) = &self.error {
            write!(f, " !! {}", err)
        } else if let Some(top) = &self.result {
            let text = top.to_string();
            if text.chars().count() > 40 {
                let head: String = text.chars().take(39).collect();
                write!(f, " -> {}…", head)
            } else {
                write!(f, " -> {}", text)
            }
        } else {
            Ok(())
        }
    }
}

/// What a successful invocation produced
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    pub action: Value,
    pub memory: PolicyMemory,
}

impl PolicyOutput {
    /// The action as an index in `0..action_count`.
    ///
    /// Anything else is a policy fault: the policy answered, but not with an
    /// action the environment accepts.
    pub fn action_index(&self, action_count: usize) -> Result<i64> {
        match self.action.as_i64() {
            Some(a) if a >= 0 && (a as u64) < action_count as u64 => Ok(a),
            _ => Err(Error::policy_execution(format!(
                "policy returned {} but the action must be an integer in 0..{}",
                self.action, action_count
            ))
            .with_context("action", self.action.to_string())),
        }
    }
}

type LogCallback<'a> = Box<dyn FnMut(LogLevel, &str) + 'a>;

enum Flow {
    Next,
    Jump(usize),
    Return(Value),
}

/// Runs a compiled policy under [`ExecutionLimits`]
pub struct Interpreter<'a> {
    policy: &'a CompiledPolicy,
    limits: ExecutionLimits,
    log_callback: Option<LogCallback<'a>>,
    trace: VecDeque<ExecutionStep>,
    steps: usize,
    started: Instant,
}

impl<'a> Interpreter<'a> {
    pub fn new(policy: &'a CompiledPolicy, limits: ExecutionLimits) -> Self {
        Self {
            policy,
            limits,
            log_callback: None,
            trace: VecDeque::with_capacity(TRACE_CAPACITY),
            steps: 0,
            started: Instant::now(),
        }
    }

    /// Receive `LOG` output in addition to the tracing event
    pub fn with_log_callback(mut self, callback: impl FnMut(LogLevel, &str) + 'a) -> Self {
        self.log_callback = Some(Box::new(callback));
        self
    }

    /// Instructions executed by the last invocation
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Most recent instructions, oldest first
    pub fn trace(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.trace.iter()
    }

    /// Last `n` trace lines, for failure reports
    pub fn trace_excerpt(&self, n: usize) -> String {
        let skip = self.trace.len().saturating_sub(n);
        self.trace
            .iter()
            .skip(skip)
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Call the entry function with `(observation, memory)`.
    ///
    /// On failure the caller's memory is untouched; the error carries the
    /// function, pc and opcode where it happened.
    pub fn invoke(
        &mut self,
        observation: &Value,
        memory: &PolicyMemory,
        rng: &mut StdRng,
    ) -> Result<PolicyOutput> {
        self.trace.clear();
        self.steps = 0;
        self.started = Instant::now();

        let policy = self.policy;
        let entry = policy
            .entry_function()
            .ok_or_else(|| error::unknown_function(policy.entry()))?;

        let args = vec![observation.clone(), memory.to_value()];
        let (action, locals) = self
            .call(entry, args, 1, rng)
            .map_err(|e| e.with_operation("interpreter::invoke"))?;

        let memory_name = &entry.params[1];
        let memory_value = locals.get(memory_name).cloned().unwrap_or(Value::Null);
        let memory = PolicyMemory::from_value(memory_value)
            .map_err(|e| e.with_operation("interpreter::invoke"))?;

        tracing::trace!(steps = self.steps, action = %action, "policy returned");
        Ok(PolicyOutput { action, memory })
    }

    fn call(
        &mut self,
        function: &'a CompiledFunction,
        args: Vec<Value>,
        depth: usize,
        rng: &mut StdRng,
    ) -> Result<(Value, Map<String, Value>)> {
        let mut locals = Map::new();
        for (name, arg) in function.params.iter().zip(args) {
            locals.insert(name.clone(), arg);
        }
        let mut stack = Stack::new();
        let mut pc = 0;

        while pc < function.code.len() {
            let op = &function.code[pc];
            let outcome = self
                .charge()
                .and_then(|_| self.execute(op, function, &mut stack, &mut locals, depth, rng));
            self.record(function, pc, op, &stack, outcome.as_ref().err());

            match outcome {
                Ok(Flow::Next) => pc += 1,
                Ok(Flow::Jump(target)) => pc = target,
                Ok(Flow::Return(value)) => return Ok((value, locals)),
                Err(e) if e.context_value("pc").is_some() => return Err(e),
                Err(e) => {
                    return Err(e
                        .with_context("function", function.name.clone())
                        .with_context("pc", pc.to_string())
                        .with_context("opcode", op.name()))
                }
            }
        }

        Err(error::missing_return(function.name.clone()))
    }

    fn charge(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.limits.max_instructions {
            return Err(error::instruction_budget_exceeded(self.limits.max_instructions));
        }
        if self.started.elapsed() > self.limits.time_budget {
            return Err(error::time_budget_exceeded(self.limits.time_budget.as_millis()));
        }
        Ok(())
    }

    fn execute(
        &mut self,
        op: &Opcode,
        function: &'a CompiledFunction,
        stack: &mut Stack,
        locals: &mut Map<String, Value>,
        depth: usize,
        rng: &mut StdRng,
    ) -> Result<Flow> {
        match op {
            // =================================================================
            // Stack
            // =================================================================
            Opcode::Push { value } => stack.push(value.clone())?,
            Opcode::Pop => {
                stack.pop()?;
            }
            Opcode::Dup => stack.dup()?,
            Opcode::Swap => stack.swap()?,

            // =================================================================
            // Variables
            // =================================================================
            Opcode::Load { path } => stack.push(value::resolve(locals, path)?)?,
            Opcode::Store { path } => {
                let v = stack.pop()?;
                value::assign(locals, path, v)?;
            }

            // =================================================================
            // Arithmetic, comparison, logic
            // =================================================================
            Opcode::Add => binary(stack, |a, b| value::arith(ArithOp::Add, &a, &b))?,
            Opcode::Sub => binary(stack, |a, b| value::arith(ArithOp::Sub, &a, &b))?,
            Opcode::Mul => binary(stack, |a, b| value::arith(ArithOp::Mul, &a, &b))?,
            Opcode::Div => binary(stack, |a, b| value::arith(ArithOp::Div, &a, &b))?,
            Opcode::Mod => binary(stack, |a, b| value::arith(ArithOp::Mod, &a, &b))?,
            Opcode::Eq => binary(stack, |a, b| Ok(Value::Bool(value::values_equal(&a, &b))))?,
            Opcode::Ne => binary(stack, |a, b| Ok(Value::Bool(!value::values_equal(&a, &b))))?,
            Opcode::Lt => binary(stack, |a, b| value::compare(CompareOp::Lt, &a, &b).map(Value::Bool))?,
            Opcode::Le => binary(stack, |a, b| value::compare(CompareOp::Le, &a, &b).map(Value::Bool))?,
            Opcode::Gt => binary(stack, |a, b| value::compare(CompareOp::Gt, &a, &b).map(Value::Bool))?,
            Opcode::Ge => binary(stack, |a, b| value::compare(CompareOp::Ge, &a, &b).map(Value::Bool))?,
            Opcode::And => {
                binary(stack, |a, b| Ok(Value::Bool(value::truthy(&a) && value::truthy(&b))))?
            }
            Opcode::Or => {
                binary(stack, |a, b| Ok(Value::Bool(value::truthy(&a) || value::truthy(&b))))?
            }
            Opcode::Not => {
                let v = stack.pop()?;
                stack.push(Value::Bool(!value::truthy(&v)))?;
            }

            // =================================================================
            // Collections
            // =================================================================
            Opcode::Len => {
                let v = stack.pop()?;
                stack.push(value::len(&v)?)?;
            }
            Opcode::Get => binary(stack, |container, key| value::get(&container, &key))?,
            Opcode::Contains => binary(stack, |container, needle| {
                value::contains(&container, &needle).map(Value::Bool)
            })?,
            Opcode::Append => binary(stack, value::append)?,

            // =================================================================
            // Control flow
            // =================================================================
            Opcode::Label { .. } | Opcode::Nop => {}
            Opcode::Jump { target } => return jump(function, target),
            Opcode::JumpIf { target } => {
                if value::truthy(&stack.pop()?) {
                    return jump(function, target);
                }
            }
            Opcode::JumpUnless { target } => {
                if !value::truthy(&stack.pop()?) {
                    return jump(function, target);
                }
            }
            Opcode::Call { function: name } => {
                let policy = self.policy;
                let callee = policy
                    .function(name)
                    .ok_or_else(|| error::unknown_function(name.clone()))?;
                if depth >= self.limits.max_call_depth {
                    return Err(error::call_depth_exceeded(self.limits.max_call_depth));
                }
                let args = stack.pop_n(callee.arity())?;
                let (result, _) = self.call(callee, args, depth + 1, rng)?;
                stack.push(result)?;
            }
            Opcode::Return => return Ok(Flow::Return(stack.pop()?)),

            // =================================================================
            // Misc
            // =================================================================
            Opcode::Random { low, high } => {
                if low >= high {
                    return Err(Error::policy_execution(format!("RANDOM range {}..{} is empty", low, high)));
                }
                stack.push(Value::from(rng.gen_range(*low..*high)))?;
            }
            Opcode::Log { level, message } => self.log(*level, &function.name, message),
            Opcode::Fail { error } => {
                return Err(Error::policy_execution(format!("policy raised: {}", error)))
            }
        }
        Ok(Flow::Next)
    }

    fn log(&mut self, level: LogLevel, function: &str, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "gymcraft_vm::policy", function, "{}", message),
            LogLevel::Info => tracing::info!(target: "gymcraft_vm::policy", function, "{}", message),
            LogLevel::Warn => tracing::warn!(target: "gymcraft_vm::policy", function, "{}", message),
            LogLevel::Error => tracing::error!(target: "gymcraft_vm::policy", function, "{}", message),
        }
        if let Some(callback) = self.log_callback.as_mut() {
            callback(level, message);
        }
    }

    fn record(
        &mut self,
        function: &CompiledFunction,
        pc: usize,
        op: &Opcode,
        stack: &Stack,
        error: Option<&Error>,
    ) {
        if self.trace.len() == TRACE_CAPACITY {
            self.trace.pop_front();
        }
        self.trace.push_back(ExecutionStep {
            step: self.steps,
            function: function.name.clone(),
            pc,
            opcode: op.name(),
            result: stack.peek().ok().cloned(),
            error: error.map(|e| e.message().to_string()),
        });
    }
}

/// Pop b, pop a, push f(a, b)
fn binary(stack: &mut Stack, f: impl FnOnce(Value, Value) -> Result<Value>) -> Result<()> {
    let b = stack.pop()?;
    let a = stack.pop()?;
    stack.push(f(a, b)?)
}

fn jump(function: &CompiledFunction, target: &str) -> Result<Flow> {
    function
        .label(target)
        .map(Flow::Jump)
        .ok_or_else(|| error::unknown_label(&function.name, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{compile, DEFAULT_ENTRY};
    use crate::error::ErrorKind;
    use rand::SeedableRng;
    use serde_json::json;

    fn policy(code: Value) -> CompiledPolicy {
        let source = json!({
            "functions": {
                "policy": { "params": ["observation", "memory"], "code": code }
            }
        });
        compile(&source.to_string(), DEFAULT_ENTRY).unwrap()
    }

    fn run(policy: &CompiledPolicy, observation: Value, memory: &PolicyMemory) -> Result<PolicyOutput> {
        let mut rng = StdRng::seed_from_u64(7);
        Interpreter::new(policy, ExecutionLimits::default()).invoke(&observation, memory, &mut rng)
    }

    #[test]
    fn test_constant_action() {
        let p = policy(json!([{"op": "PUSH", "value": 3}, {"op": "RETURN"}]));
        let out = run(&p, json!([0, 0]), &PolicyMemory::new()).unwrap();
        assert_eq!(out.action, json!(3));
        assert_eq!(out.action_index(4).unwrap(), 3);
        assert!(out.memory.is_empty());
    }

    #[test]
    fn test_memory_threads_through() {
        // memory.count = memory.count + 1 (starting from 0 when absent)
        let p = policy(json!([
            {"op": "LOAD", "path": "memory"},
            {"op": "PUSH", "value": "count"},
            {"op": "CONTAINS"},
            {"op": "JUMP_IF", "target": "have"},
            {"op": "PUSH", "value": 0},
            {"op": "STORE", "path": "memory.count"},
            {"op": "LABEL", "name": "have"},
            {"op": "LOAD", "path": "memory.count"},
            {"op": "PUSH", "value": 1},
            {"op": "ADD"},
            {"op": "STORE", "path": "memory.count"},
            {"op": "PUSH", "value": 0},
            {"op": "RETURN"}
        ]));
        let first = run(&p, json!(null), &PolicyMemory::new()).unwrap();
        assert_eq!(first.memory.get("count"), Some(&json!(1)));
        let second = run(&p, json!(null), &first.memory).unwrap();
        assert_eq!(second.memory.get("count"), Some(&json!(2)));
    }

    #[test]
    fn test_observation_path_and_branch() {
        // go down (1) while row < 4, else right (3)
        let p = policy(json!([
            {"op": "LOAD", "path": "observation.agent.0"},
            {"op": "PUSH", "value": 4},
            {"op": "LT"},
            {"op": "JUMP_UNLESS", "target": "right"},
            {"op": "PUSH", "value": 1},
            {"op": "RETURN"},
            {"op": "LABEL", "name": "right"},
            {"op": "PUSH", "value": 3},
            {"op": "RETURN"}
        ]));
        let memory = PolicyMemory::new();
        assert_eq!(run(&p, json!({"agent": [0, 0]}), &memory).unwrap().action, json!(1));
        assert_eq!(run(&p, json!({"agent": [4, 0]}), &memory).unwrap().action, json!(3));
    }

    #[test]
    fn test_call_uses_own_frame() {
        let source = json!({
            "functions": {
                "policy": {
                    "params": ["observation", "memory"],
                    "code": [
                        {"op": "PUSH", "value": 100},
                        {"op": "PUSH", "value": 5},
                        {"op": "PUSH", "value": 2},
                        {"op": "CALL", "function": "sub"},
                        {"op": "SWAP"},
                        {"op": "POP"},
                        {"op": "RETURN"}
                    ]
                },
                "sub": {
                    "params": ["a", "b"],
                    "code": [
                        {"op": "LOAD", "path": "a"},
                        {"op": "LOAD", "path": "b"},
                        {"op": "SUB"},
                        {"op": "RETURN"}
                    ]
                }
            }
        });
        let p = compile(&source.to_string(), DEFAULT_ENTRY).unwrap();
        let out = run(&p, json!(null), &PolicyMemory::new()).unwrap();
        assert_eq!(out.action, json!(3));
    }

    #[test]
    fn test_runtime_fault_has_location() {
        let p = policy(json!([
            {"op": "NOP"},
            {"op": "LOAD", "path": "observation.missing"},
            {"op": "RETURN"}
        ]));
        let err = run(&p, json!({}), &PolicyMemory::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyExecution);
        assert_eq!(err.context_value("pc"), Some("1"));
        assert_eq!(err.context_value("opcode"), Some("LOAD"));
        assert_eq!(err.context_value("function"), Some("policy"));
        assert!(err.kind().is_policy_fault());
    }

    #[test]
    fn test_fail_opcode() {
        let p = policy(json!([{"op": "FAIL", "error": "stuck"}]));
        let err = run(&p, json!(null), &PolicyMemory::new()).unwrap_err();
        assert!(err.message().contains("stuck"));
    }

    #[test]
    fn test_missing_return() {
        let p = policy(json!([{"op": "PUSH", "value": 1}]));
        let err = run(&p, json!(null), &PolicyMemory::new()).unwrap_err();
        assert!(err.message().contains("without RETURN"));
    }

    #[test]
    fn test_instruction_budget() {
        let p = policy(json!([
            {"op": "LABEL", "name": "spin"},
            {"op": "JUMP", "target": "spin"}
        ]));
        let err = run(&p, json!(null), &PolicyMemory::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BudgetExceeded);
    }

    #[test]
    fn test_call_depth() {
        let source = json!({
            "functions": {
                "policy": {
                    "params": ["observation", "memory"],
                    "code": [{"op": "CALL", "function": "again"}, {"op": "RETURN"}]
                },
                "again": {
                    "params": [],
                    "code": [{"op": "CALL", "function": "again"}, {"op": "RETURN"}]
                }
            }
        });
        let p = compile(&source.to_string(), DEFAULT_ENTRY).unwrap();
        let err = run(&p, json!(null), &PolicyMemory::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CallDepthExceeded);
    }

    #[test]
    fn test_memory_must_stay_object() {
        let p = policy(json!([
            {"op": "PUSH", "value": 5},
            {"op": "STORE", "path": "memory"},
            {"op": "PUSH", "value": 0},
            {"op": "RETURN"}
        ]));
        let err = run(&p, json!(null), &PolicyMemory::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyExecution);
    }

    #[test]
    fn test_random_is_seeded() {
        let p = policy(json!([{"op": "RANDOM", "low": 0, "high": 4}, {"op": "RETURN"}]));
        let a = run(&p, json!(null), &PolicyMemory::new()).unwrap();
        let b = run(&p, json!(null), &PolicyMemory::new()).unwrap();
        assert_eq!(a.action, b.action);
        assert!(a.action_index(4).is_ok());
    }

    #[test]
    fn test_action_index_rejects_bad_actions() {
        let out = |action| PolicyOutput { action, memory: PolicyMemory::new() };
        assert!(out(json!(4)).action_index(4).is_err());
        assert!(out(json!(-1)).action_index(4).is_err());
        assert!(out(json!(1.5)).action_index(4).is_err());
        assert!(out(json!("up")).action_index(4).is_err());
    }

    #[test]
    fn test_log_and_trace() {
        let p = policy(json!([
            {"op": "LOG", "level": "warn", "message": "thinking"},
            {"op": "PUSH", "value": 2},
            {"op": "RETURN"}
        ]));
        let mut logs = Vec::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut interpreter = Interpreter::new(&p, ExecutionLimits::default())
            .with_log_callback(|level, msg| logs.push((level, msg.to_string())));
        interpreter.invoke(&json!(null), &PolicyMemory::new(), &mut rng).unwrap();
        assert_eq!(interpreter.steps(), 3);
        let excerpt = interpreter.trace_excerpt(2);
        assert!(excerpt.contains("PUSH -> 2"));
        assert!(excerpt.contains("RETURN"));
        drop(interpreter);
        assert_eq!(logs, vec![(LogLevel::Warn, "thinking".to_string())]);
    }
}
