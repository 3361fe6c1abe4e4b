//! Capability definitions offered to the driver.
//!
//! A driver registers these with its model as callable tools. Each takes a
//! single string argument named `input` and maps onto one [`Stage`].

use serde::Serialize;
use serde_json::{Value, json};

use crate::core::types::Stage;

/// A tool definition in the shape most function-calling APIs accept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capability {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Definition for a single stage.
pub fn capability(stage: Stage) -> Capability {
    let (description, input) = match stage {
        Stage::SubmitSpecification => (
            "Submit a grammar specification. The parser generator runs over it and the \
             generated parser header is returned with function bodies removed. Call this \
             first, and again whenever the grammar changes.",
            "Complete grammar specification text.",
        ),
        Stage::SubmitInterpreter => (
            "Submit the interpreter header (int.hpp). It is compiled together with the \
             generated parser into an executable. Returns the compiler's stdout, stderr and \
             exit code. Requires a successful submit_specification.",
            "Complete C++ source of int.hpp, defining `interpreter(chisel::Parser::Node *)`.",
        ),
        Stage::RunExample => (
            "Run the compiled interpreter over an example program and return its stdout, \
             stderr and exit code. Requires a successful submit_interpreter.",
            "Source text of an example program in the generated language.",
        ),
    };
    Capability {
        name: stage.name(),
        description,
        parameters: json!({
            "type": "object",
            "properties": {
                "input": { "type": "string", "description": input }
            },
            "required": ["input"],
            "additionalProperties": false
        }),
    }
}

/// Definitions for every stage, in pipeline order.
pub fn capabilities() -> Vec<Capability> {
    Stage::ALL.into_iter().map(capability).collect()
}
