//! # Operand Stack
//!
//! LIFO of JSON values. Every policy call frame owns one, so a callee can
//! never observe or clobber its caller's operands.

use crate::error::{self, Result};
use serde::{Deserialize, Serialize};

/// Maximum stack depth per frame
pub const MAX_STACK_SIZE: usize = 256;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stack {
    data: Vec<serde_json::Value>,
}

impl Stack {
    pub fn new() -> Self {
        Stack {
            data: Vec::with_capacity(16),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Push a value onto the stack
    pub fn push(&mut self, value: serde_json::Value) -> Result<()> {
        if self.data.len() >= MAX_STACK_SIZE {
            return Err(error::stack_overflow());
        }
        self.data.push(value);
        Ok(())
    }

    /// Pop a value from the stack
    pub fn pop(&mut self) -> Result<serde_json::Value> {
        self.data.pop().ok_or_else(error::stack_underflow)
    }

    /// Pop `n` values, returned bottom to top
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<serde_json::Value>> {
        if n > self.data.len() {
            return Err(error::stack_underflow());
        }
        Ok(self.data.split_off(self.data.len() - n))
    }

    /// Peek at the top value without removing it
    pub fn peek(&self) -> Result<&serde_json::Value> {
        self.data.last().ok_or_else(error::stack_underflow)
    }

    /// Duplicate the top value
    pub fn dup(&mut self) -> Result<()> {
        let value = self.peek()?.clone();
        self.push(value)
    }

    /// Swap top two values
    pub fn swap(&mut self) -> Result<()> {
        if self.data.len() < 2 {
            return Err(error::stack_underflow());
        }
        let len = self.data.len();
        self.data.swap(len - 1, len - 2);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Convert entire stack to JSON array (bottom to top)
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.data.clone())
    }
}
