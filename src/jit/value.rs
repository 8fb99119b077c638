//! Run-time values.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{ExecError, ExecResult};
use crate::codegen::IrConst;

/// A value produced by executing IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Bool(bool),
}

impl Value {
    pub fn as_int(self) -> ExecResult<i64> {
        match self {
            Value::Int(v) => Ok(v),
            Value::Bool(_) => Err(ExecError::TypeError {
                expected: "int",
                found: self.type_name(),
            }),
        }
    }

    pub fn as_bool(self) -> ExecResult<bool> {
        match self {
            Value::Bool(b) => Ok(b),
            Value::Int(_) => Err(ExecError::TypeError {
                expected: "bool",
                found: self.type_name(),
            }),
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
        }
    }
}

impl From<IrConst> for Value {
    fn from(c: IrConst) -> Self {
        match c {
            IrConst::Int(v) => Value::Int(v),
            IrConst::Bool(b) => Value::Bool(b),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(Value::Int(3).as_int().unwrap(), 3);
        assert!(Value::Int(3).as_bool().is_err());
        assert_eq!(Value::from(IrConst::Bool(true)), Value::Bool(true));
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(serde_json::to_string(&Value::Int(7)).unwrap(), "7");
    }
}
