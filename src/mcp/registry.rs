//! Tool registry.
//!
//! Tools are registered once at startup through [`ToolRegistryBuilder`]. Each
//! registration derives the tool's input schema from its Rust input type and
//! installs a type-erased handler that deserializes the call arguments before
//! the typed handler runs. After [`ToolRegistryBuilder::build`] the registry is
//! immutable and shared without locking.

use crate::error::{DbError, DbResult};
use crate::tools::ToolContext;
use futures_util::future::BoxFuture;
use rmcp::model::{JsonObject, Tool};
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Future returned by a type-erased tool handler.
pub type ToolFuture = BoxFuture<'static, DbResult<JsonValue>>;

/// A type-erased tool handler: call context and raw JSON arguments in,
/// JSON result out.
pub type ToolHandler = Arc<dyn Fn(ToolContext, JsonValue) -> ToolFuture + Send + Sync>;

/// Wraps every handler of a registry at build time.
///
/// Layers are applied in registration order, so the first layer added ends up
/// innermost.
pub trait ToolLayer: Send + Sync {
    fn wrap(&self, tool: &str, handler: ToolHandler) -> ToolHandler;
}

/// An immutable registered tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    input_schema: Arc<JsonObject>,
    handler: ToolHandler,
}

impl ToolDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Arc<JsonObject> {
        &self.input_schema
    }

    /// Listing form sent to clients.
    pub fn to_tool(&self) -> Tool {
        Tool::new(
            self.name.clone(),
            self.description.clone(),
            Arc::clone(&self.input_schema),
        )
    }

    /// Invoke the handler with raw arguments.
    pub fn call(&self, ctx: ToolContext, arguments: JsonValue) -> ToolFuture {
        (self.handler)(ctx, arguments)
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Name-keyed, read-only set of tools.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// All tools sorted by name.
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Collects tool registrations and layers.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<ToolDescriptor>,
    layers: Vec<Arc<dyn ToolLayer>>,
}

impl ToolRegistryBuilder {
    /// Register a typed tool.
    ///
    /// `I` supplies both the advertised input schema and the argument
    /// decoding; arguments that fail to decode are rejected with
    /// [`DbError::InvalidParams`] before `handler` is called.
    pub fn tool<I, F, Fut, O>(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Self
    where
        I: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(ToolContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DbResult<O>> + Send + 'static,
        O: Serialize + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ToolHandler = Arc::new(
            move |ctx: ToolContext, arguments: JsonValue| -> ToolFuture {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let input: I = decode_arguments(arguments)?;
                    let output = handler(ctx, input).await?;
                    serde_json::to_value(output).map_err(|e| {
                        DbError::internal(format!("Failed to encode tool output: {}", e))
                    })
                })
            },
        );

        self.tools.push(ToolDescriptor {
            name: name.into(),
            description: description.into(),
            input_schema: Arc::new(input_schema::<I>()),
            handler: erased,
        });
        self
    }

    /// Wrap every handler with `layer` when the registry is built.
    pub fn layer<L: ToolLayer + 'static>(mut self, layer: L) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    /// Apply the layers and freeze the registry.
    ///
    /// Fails if two tools share a name.
    pub fn build(self) -> DbResult<ToolRegistry> {
        let mut tools = HashMap::with_capacity(self.tools.len());
        for mut descriptor in self.tools {
            for layer in &self.layers {
                descriptor.handler = layer.wrap(&descriptor.name, descriptor.handler);
            }
            let name = descriptor.name.clone();
            if tools.insert(name.clone(), descriptor).is_some() {
                return Err(DbError::internal(format!(
                    "Tool '{}' registered twice",
                    name
                )));
            }
        }
        debug!(tools = tools.len(), layers = self.layers.len(), "Built tool registry");
        Ok(ToolRegistry { tools })
    }
}

/// Decode call arguments; a missing `arguments` member means "no arguments".
fn decode_arguments<I: DeserializeOwned>(arguments: JsonValue) -> DbResult<I> {
    let arguments = match arguments {
        JsonValue::Null => JsonValue::Object(JsonObject::new()),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| DbError::invalid_params(format!("Invalid arguments: {}", e)))
}

fn input_schema<I: JsonSchema>() -> JsonObject {
    match serde_json::to_value(schemars::schema_for!(I)) {
        Ok(JsonValue::Object(map)) => map,
        _ => JsonObject::new(),
    }
}
