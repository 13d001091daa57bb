//! # Policy Opcodes
//!
//! The instruction set policies are written in. A collaborator answers with a
//! JSON *policy module*: named functions, each a list of opcodes run by the
//! [`Interpreter`](crate::Interpreter).
//!
//! ## Design Philosophy
//! - Plain JSON, so a chat model can emit it inside a fenced block
//! - Stack machine with named variables, no host access at all
//! - Control flow only through labels, `CALL` and `RETURN`

use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Policy opcode - one instruction of a policy function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // =========================================================================
    // STACK
    // =========================================================================
    /// Push a literal JSON value
    Push {
        value: serde_json::Value,
    },

    /// Discard the top value
    Pop,

    /// Duplicate the top value
    Dup,

    /// Swap the top two values
    Swap,

    // =========================================================================
    // VARIABLES
    // =========================================================================
    /// Push the value at a dotted path, e.g. `observation.agent.0`
    Load {
        path: String,
    },

    /// Pop a value and assign it to a dotted path, e.g. `memory.visited`
    Store {
        path: String,
    },

    // =========================================================================
    // ARITHMETIC - pop b, pop a, push a <op> b
    // =========================================================================
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // =========================================================================
    // COMPARISON AND LOGIC
    // =========================================================================
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,

    // =========================================================================
    // COLLECTIONS
    // =========================================================================
    /// Pop an array/object/string, push its length
    Len,

    /// Pop key or index, pop container, push the element
    Get,

    /// Pop needle, pop container, push whether the container holds it
    Contains,

    /// Pop item, pop array, push the array with the item appended
    Append,

    // =========================================================================
    // CONTROL FLOW
    // =========================================================================
    /// Define a jump target
    Label {
        name: String,
    },

    Jump {
        target: String,
    },

    /// Pop a value, jump when it is truthy
    JumpIf {
        target: String,
    },

    /// Pop a value, jump when it is falsy
    JumpUnless {
        target: String,
    },

    /// Pop one argument per callee parameter (last parameter on top), push the result
    Call {
        function: String,
    },

    /// Pop the return value and leave the function
    Return,

    // =========================================================================
    // MISC
    // =========================================================================
    /// Push a uniform random integer in `low..high`
    Random {
        low: i64,
        high: i64,
    },

    Log {
        #[serde(default)]
        level: LogLevel,
        message: String,
    },

    /// Raise an error from inside the policy
    Fail {
        error: String,
    },

    Nop,
}

/// Log levels for the `LOG` opcode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Opcode {
    /// Wire name of the opcode, as written in the `op` tag
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Push { .. } => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Swap => "SWAP",
            Opcode::Load { .. } => "LOAD",
            Opcode::Store { .. } => "STORE",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::Lt => "LT",
            Opcode::Le => "LE",
            Opcode::Gt => "GT",
            Opcode::Ge => "GE",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Not => "NOT",
            Opcode::Len => "LEN",
            Opcode::Get => "GET",
            Opcode::Contains => "CONTAINS",
            Opcode::Append => "APPEND",
            Opcode::Label { .. } => "LABEL",
            Opcode::Jump { .. } => "JUMP",
            Opcode::JumpIf { .. } => "JUMP_IF",
            Opcode::JumpUnless { .. } => "JUMP_UNLESS",
            Opcode::Call { .. } => "CALL",
            Opcode::Return => "RETURN",
            Opcode::Random { .. } => "RANDOM",
            Opcode::Log { .. } => "LOG",
            Opcode::Fail { .. } => "FAIL",
            Opcode::Nop => "NOP",
        }
    }

    /// Label this opcode may jump to
    pub fn jump_target(&self) -> Option<&str> {
        match self {
            Opcode::Jump { target } | Opcode::JumpIf { target } | Opcode::JumpUnless { target } => {
                Some(target)
            }
            _ => None,
        }
    }
}

/// A policy function: parameter names plus body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyFunction {
    #[serde(default)]
    pub params: Vec<String>,
    pub code: Vec<Opcode>,
}

/// A policy module is a set of named functions with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyModule {
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    /// What the policy tries to do
    #[serde(default)]
    pub description: Option<String>,
    pub functions: BTreeMap<String, PolicyFunction>,
}

impl PolicyModule {
    /// Parse module source (the body of a fenced JSON block).
    pub fn parse(source: &str) -> Result<Self> {
        serde_json::from_str(source.trim()).map_err(|e| {
            error::Error::parse_failed(format!("policy source is not a valid module: {}", e))
                .with_operation("policy_module::parse")
                .with_context("line", e.line().to_string())
                .set_source(e)
        })
    }

    /// Render an assembly-style listing
    pub fn listing(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("--- {} ---\n", self.name.as_deref().unwrap_or("policy")));
        if let Some(desc) = &self.description {
            out.push_str(desc);
            out.push('\n');
        }
        for (name, function) in &self.functions {
            out.push_str(&format!("\n{}({}):\n", name, function.params.join(", ")));
            for (i, op) in function.code.iter().enumerate() {
                let (op_name, details) = op.format_parts();
                // Labels at column 0, instructions indented
                let indent = if matches!(op, Opcode::Label { .. }) { "" } else { "    " };
                if details.is_empty() {
                    out.push_str(&format!("{:3} | {}{}\n", i, indent, op_name));
                } else {
                    out.push_str(&format!("{:3} | {}{} {}\n", i, indent, op_name, details));
                }
            }
        }
        out
    }
}

impl Opcode {
    /// Format opcode into (name, details) for listings
    fn format_parts(&self) -> (&'static str, String) {
        let details = match self {
            Opcode::Push { value } => format_value_brief(value),
            Opcode::Load { path } => path.clone(),
            Opcode::Store { path } => format!("→ {}", path),
            Opcode::Label { name } => format!(":{}", name),
            Opcode::Jump { target } | Opcode::JumpIf { target } | Opcode::JumpUnless { target } => {
                format!("→ {}", target)
            }
            Opcode::Call { function } => function.clone(),
            Opcode::Random { low, high } => format!("{}..{}", low, high),
            Opcode::Log { level, message } => format!("[{:?}] \"{}\"", level, truncate(message, 30)),
            Opcode::Fail { error } => format!("\"{}\"", truncate(error, 40)),
            _ => String::new(),
        };
        (self.name(), details)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

fn format_value_brief(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => format!("\"{}\"", truncate(s, 20)),
        serde_json::Value::Array(a) => format!("[{} items]", a.len()),
        serde_json::Value::Object(o) => {
            let keys: Vec<_> = o.keys().take(3).cloned().collect();
            if keys.len() < o.len() {
                format!("{{{}, …}}", keys.join(", "))
            } else {
                format!("{{{}}}", keys.join(", "))
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_opcode_wire_names() {
        let op: Opcode = serde_json::from_value(json!({"op": "JUMP_UNLESS", "target": "done"})).unwrap();
        assert_eq!(op, Opcode::JumpUnless { target: "done".into() });
        assert_eq!(op.name(), "JUMP_UNLESS");

        let json = serde_json::to_value(Opcode::Random { low: 0, high: 4 }).unwrap();
        assert_eq!(json, json!({"op": "RANDOM", "low": 0, "high": 4}));
    }

    #[test]
    fn test_log_level_defaults_to_info() {
        let op: Opcode = serde_json::from_value(json!({"op": "LOG", "message": "hi"})).unwrap();
        assert_eq!(op, Opcode::Log { level: LogLevel::Info, message: "hi".into() });
    }

    #[test]
    fn test_parse_module() {
        let source = r#"
        {
            "name": "always_right",
            "functions": {
                "policy": {
                    "params": ["observation", "memory"],
                    "code": [
                        {"op": "PUSH", "value": 1},
                        {"op": "RETURN"}
                    ]
                }
            }
        }"#;
        let module = PolicyModule::parse(source).unwrap();
        assert_eq!(module.name.as_deref(), Some("always_right"));
        assert_eq!(module.functions["policy"].params, vec!["observation", "memory"]);
        assert_eq!(module.functions["policy"].code.len(), 2);
    }

    #[test]
    fn test_parse_rejects_unknown_opcode() {
        let source = r#"{"functions": {"policy": {"params": [], "code": [{"op": "EXEC"}]}}}"#;
        let err = PolicyModule::parse(source).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ParseFailed);
    }

    #[test]
    fn test_jump_target() {
        assert_eq!(Opcode::JumpIf { target: "x".into() }.jump_target(), Some("x"));
        assert_eq!(Opcode::Nop.jump_target(), None);
    }

    #[test]
    fn test_listing() {
        let source = r#"{
            "name": "demo",
            "functions": {
                "policy": {
                    "params": ["observation", "memory"],
                    "code": [
                        {"op": "LABEL", "name": "start"},
                        {"op": "PUSH", "value": 3},
                        {"op": "RETURN"}
                    ]
                }
            }
        }"#;
        let module = PolicyModule::parse(source).unwrap();
        let listing = module.listing();
        assert!(listing.contains("policy(observation, memory):"));
        assert!(listing.contains("  0 | LABEL :start"));
        assert!(listing.contains("  1 |     PUSH 3"));
    }
}
