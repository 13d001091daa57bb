//! # Policy Schema for Code Generation
//!
//! A structured description of the policy language that is rendered into
//! the system prompt. The collaborator reads it to write policy modules the
//! compiler accepts.

use crate::compile::{DEFAULT_ENTRY, ENTRY_ARITY};
use crate::interpreter::ExecutionLimits;
use crate::memory::MAX_KEYS;
use crate::stack::MAX_STACK_SIZE;
use serde::Serialize;

/// A complete, valid policy used as the example in prompts
pub const EXAMPLE_POLICY: &str = r#"{
  "name": "walk_down_then_right",
  "description": "Move down until the last row, then move right.",
  "functions": {
    "policy": {
      "params": ["observation", "memory"],
      "code": [
        {"op": "LOAD", "path": "observation.0"},
        {"op": "PUSH", "value": 4},
        {"op": "LT"},
        {"op": "JUMP_UNLESS", "target": "right"},
        {"op": "PUSH", "value": 1},
        {"op": "RETURN"},
        {"op": "LABEL", "name": "right"},
        {"op": "PUSH", "value": 3},
        {"op": "RETURN"}
      ]
    }
  }
}"#;

/// Everything a collaborator needs to know to write policies
#[derive(Debug, Clone, Serialize)]
pub struct PolicySchema {
    pub version: &'static str,
    pub description: &'static str,
    pub opcodes: Vec<OpcodeCategory>,
    pub calling_convention: CallingConvention,
    pub limits: LimitsSchema,
    pub guidelines: Vec<Guideline>,
    pub example: &'static str,
}

impl Default for PolicySchema {
    fn default() -> Self {
        Self::new(ExecutionLimits::default())
    }
}

impl PolicySchema {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            version: "0.1.0",
            description: "Policies are JSON modules of named functions. Each function is a list of \
                         opcodes run by a stack machine. Values are JSON: numbers, strings, booleans, \
                         null, arrays and objects.",
            opcodes: Self::define_opcodes(),
            calling_convention: CallingConvention::default(),
            limits: LimitsSchema {
                max_instructions: limits.max_instructions,
                max_call_depth: limits.max_call_depth,
                time_budget_ms: limits.time_budget.as_millis() as u64,
                max_stack_size: MAX_STACK_SIZE,
                max_memory_keys: MAX_KEYS,
            },
            guidelines: Self::define_guidelines(),
            example: EXAMPLE_POLICY,
        }
    }

    /// Render as a prompt-friendly string
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();

        out.push_str("# Policy Language\n\n");
        out.push_str(self.description);
        out.push_str("\n\n");

        out.push_str("## Calling Convention\n\n");
        for rule in &self.calling_convention.rules {
            out.push_str(&format!("- {}\n", rule));
        }
        out.push('\n');

        out.push_str("## Limits\n\n");
        out.push_str(&format!(
            "- at most {} instructions and {}ms per decision\n",
            self.limits.max_instructions, self.limits.time_budget_ms
        ));
        out.push_str(&format!("- call depth at most {}\n", self.limits.max_call_depth));
        out.push_str(&format!("- stack at most {} values per call\n", self.limits.max_stack_size));
        out.push_str(&format!("- memory at most {} top-level keys\n\n", self.limits.max_memory_keys));

        out.push_str("## Opcodes\n\n");
        for category in &self.opcodes {
            out.push_str(&format!("### {}\n", category.name));
            out.push_str(&format!("{}\n\n", category.description));
            for op in &category.opcodes {
                out.push_str(&format!("- **{}**: {}\n", op.name, op.description));
                if let Some(example) = &op.example {
                    out.push_str(&format!("  - Example: `{}`\n", example));
                }
            }
            out.push('\n');
        }

        out.push_str("## Guidelines\n\n");
        for g in &self.guidelines {
            out.push_str(&format!("### {}\n{}\n\n", g.title, g.content));
        }

        out.push_str("## Example\n\n```json\n");
        out.push_str(self.example);
        out.push_str("\n```\n");

        out
    }

    /// Render as JSON for structured consumption
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    fn define_opcodes() -> Vec<OpcodeCategory> {
        vec![
            OpcodeCategory {
                name: "Stack",
                description: "Every call has its own operand stack.",
                opcodes: vec![
                    OpcodeSpec::new("PUSH", "Push a literal JSON value", Some(r#"{"op": "PUSH", "value": [0, 1]}"#)),
                    OpcodeSpec::new("POP", "Discard the top value", None),
                    OpcodeSpec::new("DUP", "Duplicate the top value", None),
                    OpcodeSpec::new("SWAP", "Swap the top two values", None),
                ],
            },
            OpcodeCategory {
                name: "Variables",
                description: "Paths are dotted: the first segment names a parameter or a variable \
                              stored earlier, later segments are object keys or array indices.",
                opcodes: vec![
                    OpcodeSpec::new("LOAD", "Push the value at a path", Some(r#"{"op": "LOAD", "path": "observation.agent.0"}"#)),
                    OpcodeSpec::new(
                        "STORE",
                        "Pop a value and write it to a path, creating missing object keys",
                        Some(r#"{"op": "STORE", "path": "memory.last_action"}"#),
                    ),
                ],
            },
            OpcodeCategory {
                name: "Arithmetic",
                description: "Pop b, pop a, push a <op> b. Integer DIV and MOD round toward negative \
                              infinity. ADD also joins two strings or two arrays.",
                opcodes: vec![
                    OpcodeSpec::new("ADD", "a + b", None),
                    OpcodeSpec::new("SUB", "a - b", None),
                    OpcodeSpec::new("MUL", "a * b", None),
                    OpcodeSpec::new("DIV", "a / b", None),
                    OpcodeSpec::new("MOD", "a mod b", None),
                ],
            },
            OpcodeCategory {
                name: "Comparison and Logic",
                description: "Pop b, pop a, push a boolean. null, false, 0, \"\", [] and {} are falsy.",
                opcodes: vec![
                    OpcodeSpec::new("EQ", "a == b (1 equals 1.0)", None),
                    OpcodeSpec::new("NE", "a != b", None),
                    OpcodeSpec::new("LT", "a < b for numbers or strings", None),
                    OpcodeSpec::new("LE", "a <= b", None),
                    OpcodeSpec::new("GT", "a > b", None),
                    OpcodeSpec::new("GE", "a >= b", None),
                    OpcodeSpec::new("AND", "both truthy", None),
                    OpcodeSpec::new("OR", "either truthy", None),
                    OpcodeSpec::new("NOT", "Pop one value, push its negated truthiness", None),
                ],
            },
            OpcodeCategory {
                name: "Collections",
                description: "Arrays, objects and strings.",
                opcodes: vec![
                    OpcodeSpec::new("LEN", "Pop a collection, push its length", None),
                    OpcodeSpec::new("GET", "Pop key or index, pop collection, push the element (negative indices count from the end)", None),
                    OpcodeSpec::new("CONTAINS", "Pop needle, pop collection, push whether it holds the needle", None),
                    OpcodeSpec::new("APPEND", "Pop item, pop array, push the array with the item appended", None),
                ],
            },
            OpcodeCategory {
                name: "Control Flow",
                description: "Labels are local to their function.",
                opcodes: vec![
                    OpcodeSpec::new("LABEL", "Mark a jump target", Some(r#"{"op": "LABEL", "name": "loop"}"#)),
                    OpcodeSpec::new("JUMP", "Jump to a label", Some(r#"{"op": "JUMP", "target": "loop"}"#)),
                    OpcodeSpec::new("JUMP_IF", "Pop a value, jump when truthy", None),
                    OpcodeSpec::new("JUMP_UNLESS", "Pop a value, jump when falsy", None),
                    OpcodeSpec::new(
                        "CALL",
                        "Pop one argument per callee parameter (last parameter on top), run the callee, push its result",
                        Some(r#"{"op": "CALL", "function": "distance"}"#),
                    ),
                    OpcodeSpec::new("RETURN", "Pop the return value and leave the function", None),
                ],
            },
            OpcodeCategory {
                name: "Misc",
                description: "Randomness, diagnostics and explicit failure.",
                opcodes: vec![
                    OpcodeSpec::new("RANDOM", "Push a uniform random integer in low..high (high excluded)", Some(r#"{"op": "RANDOM", "low": 0, "high": 4}"#)),
                    OpcodeSpec::new("LOG", "Emit a message (level: debug, info, warn, error)", Some(r#"{"op": "LOG", "level": "info", "message": "exploring"}"#)),
                    OpcodeSpec::new("FAIL", "Stop with an error", Some(r#"{"op": "FAIL", "error": "unexpected observation"}"#)),
                    OpcodeSpec::new("NOP", "Do nothing", None),
                ],
            },
        ]
    }

    fn define_guidelines() -> Vec<Guideline> {
        vec![
            Guideline {
                title: "Output Format",
                content: "Answer with exactly one fenced ```json block holding the whole module. \
                         Every reply that changes the policy must contain the complete module.",
            },
            Guideline {
                title: "Memory",
                content: "Memory starts as {} at the start of every episode. Store into paths under \
                         the second parameter (for example memory.visited) to remember things between \
                         decisions. Memory must remain an object.",
            },
            Guideline {
                title: "Actions",
                content: "The entry function must RETURN an integer action index accepted by the \
                         environment. Anything else counts as a failure.",
            },
            Guideline {
                title: "Failures",
                content: "A failing policy is reported back with the observation, the memory, the \
                         error and the last executed instructions. Fix the cause and send the full \
                         module again.",
            },
        ]
    }
}

/// A category of opcodes
#[derive(Debug, Clone, Serialize)]
pub struct OpcodeCategory {
    pub name: &'static str,
    pub description: &'static str,
    pub opcodes: Vec<OpcodeSpec>,
}

/// Specification for a single opcode
#[derive(Debug, Clone, Serialize)]
pub struct OpcodeSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub example: Option<&'static str>,
}

impl OpcodeSpec {
    fn new(name: &'static str, description: &'static str, example: Option<&'static str>) -> Self {
        Self { name, description, example }
    }
}

/// How the entry function is called
#[derive(Debug, Clone, Serialize)]
pub struct CallingConvention {
    pub entry: &'static str,
    pub arity: usize,
    pub rules: Vec<String>,
}

impl Default for CallingConvention {
    fn default() -> Self {
        Self {
            entry: DEFAULT_ENTRY,
            arity: ENTRY_ARITY,
            rules: vec![
                format!(
                    "The module must define a function \"{}\" with exactly {} params: [observation, memory].",
                    DEFAULT_ENTRY, ENTRY_ARITY
                ),
                "It is called once per step and must RETURN the action.".to_string(),
                "Whatever the memory parameter holds when it returns becomes the memory for the next call."
                    .to_string(),
                "Helper functions may take any number of params and are reached with CALL.".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitsSchema {
    pub max_instructions: usize,
    pub max_call_depth: usize,
    pub time_budget_ms: u64,
    pub max_stack_size: usize,
    pub max_memory_keys: usize,
}

/// A guideline for policy generation
#[derive(Debug, Clone, Serialize)]
pub struct Guideline {
    pub title: &'static str,
    pub content: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::opcode::Opcode;

    #[test]
    fn test_schema_generation() {
        let prompt = PolicySchema::default().to_prompt();

        assert!(prompt.contains("# Policy Language"));
        assert!(prompt.contains("JUMP_UNLESS"));
        assert!(prompt.contains("\"policy\" with exactly 2 params"));
        assert!(prompt.contains("10000 instructions"));
        assert!(prompt.contains("```json"));
    }

    #[test]
    fn test_example_policy_compiles() {
        let policy = compile(EXAMPLE_POLICY, DEFAULT_ENTRY).unwrap();
        assert_eq!(policy.name(), "walk_down_then_right");
    }

    #[test]
    fn test_every_opcode_documented() {
        let schema = PolicySchema::default();
        let documented: Vec<&str> = schema
            .opcodes
            .iter()
            .flat_map(|c| c.opcodes.iter().map(|o| o.name))
            .collect();
        let sample = [
            Opcode::Push { value: serde_json::Value::Null },
            Opcode::Pop,
            Opcode::Dup,
            Opcode::Swap,
            Opcode::Load { path: String::new() },
            Opcode::Store { path: String::new() },
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::Div,
            Opcode::Mod,
            Opcode::Eq,
            Opcode::Ne,
            Opcode::Lt,
            Opcode::Le,
            Opcode::Gt,
            Opcode::Ge,
            Opcode::And,
            Opcode::Or,
            Opcode::Not,
            Opcode::Len,
            Opcode::Get,
            Opcode::Contains,
            Opcode::Append,
            Opcode::Label { name: String::new() },
            Opcode::Jump { target: String::new() },
            Opcode::JumpIf { target: String::new() },
            Opcode::JumpUnless { target: String::new() },
            Opcode::Call { function: String::new() },
            Opcode::Return,
            Opcode::Random { low: 0, high: 1 },
            Opcode::Log { level: Default::default(), message: String::new() },
            Opcode::Fail { error: String::new() },
            Opcode::Nop,
        ];
        for op in &sample {
            assert!(documented.contains(&op.name()), "{} is not documented", op.name());
        }
    }

    #[test]
    fn test_schema_json() {
        let json = PolicySchema::default().to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["calling_convention"]["entry"], "policy");
    }
}
