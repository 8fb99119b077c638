//! Per-fragment compilation options.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether the captured value of a fragment is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValuePrinting {
    Disabled,
    Enabled,
    /// Print only values of expressions without side effects.
    #[default]
    Auto,
}

impl ValuePrinting {
    pub fn should_print(&self, has_side_effects: bool) -> bool {
        match self {
            ValuePrinting::Disabled => false,
            ValuePrinting::Enabled => true,
            ValuePrinting::Auto => !has_side_effects,
        }
    }
}

impl fmt::Display for ValuePrinting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuePrinting::Disabled => write!(f, "disabled"),
            ValuePrinting::Enabled => write!(f, "enabled"),
            ValuePrinting::Auto => write!(f, "auto"),
        }
    }
}

/// Options stamped on a transaction when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilationOptions {
    /// Wrap top-level statements and move their declarations out.
    pub declaration_extraction: bool,
    pub value_printing: ValuePrinting,
    /// Route the trailing expression's value to the caller.
    pub result_evaluation: bool,
    /// Resolve unknown names at run time instead of rejecting them.
    pub dynamic_scoping: bool,
    pub code_generation: bool,
    pub debug: bool,
}

impl Default for CompilationOptions {
    fn default() -> Self {
        Self {
            declaration_extraction: false,
            value_printing: ValuePrinting::Disabled,
            result_evaluation: false,
            dynamic_scoping: false,
            code_generation: true,
            debug: false,
        }
    }
}

impl CompilationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a fragment that should be wrapped and its value captured.
    pub fn wrapped() -> Self {
        Self::default()
            .declaration_extraction(true)
            .result_evaluation(true)
    }

    pub fn declaration_extraction(mut self, value: bool) -> Self {
        self.declaration_extraction = value;
        self
    }

    pub fn value_printing(mut self, value: ValuePrinting) -> Self {
        self.value_printing = value;
        self
    }

    pub fn result_evaluation(mut self, value: bool) -> Self {
        self.result_evaluation = value;
        self
    }

    pub fn dynamic_scoping(mut self, value: bool) -> Self {
        self.dynamic_scoping = value;
        self
    }

    pub fn code_generation(mut self, value: bool) -> Self {
        self.code_generation = value;
        self
    }

    pub fn debug(mut self, value: bool) -> Self {
        self.debug = value;
        self
    }

    /// True if the trailing expression needs to be captured at all.
    pub fn wants_value(&self) -> bool {
        self.result_evaluation || self.value_printing != ValuePrinting::Disabled
    }
}
