//! Parse-only syntax check

use std::sync::Arc;

use super::ValidationError;
use crate::sandbox::{Sandbox, SandboxError};

/// Confirms a candidate parses, without running any of it
#[derive(Clone)]
pub struct SyntaxValidator {
    sandbox: Arc<dyn Sandbox>,
}

impl SyntaxValidator {
    /// Check syntax with the given engine
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }

    /// Pass, or fail with the parser's message verbatim
    pub fn check(&self, source: &str) -> Result<(), ValidationError> {
        self.sandbox.parse(source).map_err(|e| match e {
            SandboxError::Parse(message) => ValidationError::Syntax { message },
            other => ValidationError::Syntax {
                message: other.to_string(),
            },
        })
    }
}
