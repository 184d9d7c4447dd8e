//! Tool trait and related types.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

use crate::error::ToolError;
use crate::schema::Schema;

/// A tool definition as handed to an AI provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A callable tool exposed to the host.
///
/// The host is expected to check arguments against [`Tool::parameters`]
/// before calling [`Tool::invoke`]; `invoke` forwards whatever it is given.
pub trait Tool: Send + Sync {
    /// The catalog-unique name of this tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// The translated parameter schema.
    fn parameters(&self) -> &Schema;

    /// The definition to send to an AI provider.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters().to_json(),
        }
    }

    /// Check arguments against the parameter schema.
    fn check_input(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        self.parameters()
            .validate(input)
            .map_err(|violation| ToolError::InvalidInput {
                tool: self.name().to_string(),
                message: violation.to_string(),
            })
    }

    /// Invoke the tool and return its textual output.
    fn invoke(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + '_>>;
}
