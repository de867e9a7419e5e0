//! Call dispatch and the JSON request/response envelope.
//!
//! Every capability is reached by name through a [`Router`]. Requests arrive as
//! `{op, params, id}`; responses carry either `result` or a tagged `error`, plus a
//! receipt with content hashes of the inputs and outputs.

use crate::core::context::Context;
use crate::core::error::TaskmeshError;
use crate::core::registry::ToolRegistry;
use crate::core::time;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::Digest;

/// Standard RPC request envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcRequest {
    /// Call name
    pub op: String,
    /// Call arguments
    #[serde(default)]
    pub params: JsonValue,
    /// Request ID for correlation
    #[serde(default = "default_request_id")]
    pub id: String,
}

pub fn default_request_id() -> String {
    time::new_event_id()
}

/// Standard RPC response envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcResponse {
    pub id: String,
    pub success: bool,
    pub receipt: Receipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Receipt documenting what happened
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Receipt {
    pub op: String,
    pub timestamp: String,
    pub inputs_hash: String,
    pub outputs_hash: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcError {
    /// One of `validation_error`, `not_found`, `backend_unavailable`,
    /// `partial_write`, `cancelled`, `internal_error`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

fn content_hash(value: &impl Serialize) -> String {
    format!(
        "{:x}",
        sha2::Sha256::digest(serde_json::to_string(value).unwrap_or_default())
    )
}

pub fn success_response(
    request_id: String,
    op: String,
    params: &JsonValue,
    result: JsonValue,
) -> RpcResponse {
    RpcResponse {
        id: request_id,
        success: true,
        receipt: Receipt {
            op,
            timestamp: time::now_epoch_z(),
            inputs_hash: content_hash(params),
            outputs_hash: content_hash(&result),
        },
        result: Some(result),
        error: None,
    }
}

pub fn error_response(
    request_id: String,
    op: String,
    params: &JsonValue,
    err: &TaskmeshError,
) -> RpcResponse {
    RpcResponse {
        id: request_id,
        success: false,
        receipt: Receipt {
            op,
            timestamp: time::now_epoch_z(),
            inputs_hash: content_hash(params),
            outputs_hash: format!("{:x}", sha2::Sha256::digest("error")),
        },
        result: None,
        error: Some(RpcError {
            code: err.code().to_string(),
            message: err.to_string(),
            details: err.details(),
        }),
    }
}

/// What a capability sees when it runs.
pub struct Invocation<'a> {
    pub ctx: &'a Context,
    /// Frozen registry, for capabilities that index or describe tools.
    pub registry: &'a ToolRegistry,
}

/// The common contract of every callable capability.
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the argument object.
    fn input_schema(&self) -> JsonValue;

    /// Called once while the router is assembled.
    fn setup(&self, registry: &mut ToolRegistry) -> Result<(), TaskmeshError> {
        registry.register(self.name(), self.description(), self.input_schema())
    }

    /// Shape check against [`Capability::input_schema`] before execution.
    fn validate(&self, params: &JsonValue) -> Result<(), TaskmeshError> {
        check_against_schema(&self.input_schema(), params)
    }

    fn execute(&self, call: &Invocation<'_>, params: &JsonValue)
    -> Result<JsonValue, TaskmeshError>;
}

pub type HandlerFn = fn(&Invocation<'_>, &JsonValue) -> Result<JsonValue, TaskmeshError>;

/// A capability backed by a plain function. All built-in calls use this.
pub struct BuiltinCapability {
    name: &'static str,
    description: &'static str,
    schema: JsonValue,
    handler: HandlerFn,
}

impl BuiltinCapability {
    pub fn new(
        name: &'static str,
        description: &'static str,
        schema: JsonValue,
        handler: HandlerFn,
    ) -> Self {
        Self {
            name,
            description,
            schema,
            handler,
        }
    }
}

impl Capability for BuiltinCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn input_schema(&self) -> JsonValue {
        self.schema.clone()
    }

    fn execute(
        &self,
        call: &Invocation<'_>,
        params: &JsonValue,
    ) -> Result<JsonValue, TaskmeshError> {
        (self.handler)(call, params)
    }
}

fn json_type_matches(expected: &str, value: &JsonValue) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Checks required keys and top-level property types. Nulls count as absent.
pub fn check_against_schema(schema: &JsonValue, params: &JsonValue) -> Result<(), TaskmeshError> {
    let obj = params.as_object().ok_or_else(|| {
        TaskmeshError::ValidationError("arguments must be a JSON object".to_string())
    })?;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if obj.get(field).is_none_or(|v| v.is_null()) {
                return Err(TaskmeshError::ValidationError(format!(
                    "{} is required",
                    field
                )));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (field, value) in obj {
            if value.is_null() {
                continue;
            }
            let expected = props
                .get(field)
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str());
            if let Some(expected) = expected
                && !json_type_matches(expected, value)
            {
                return Err(TaskmeshError::ValidationError(format!(
                    "{} must be of type {}",
                    field, expected
                )));
            }
        }
    }
    Ok(())
}

/// `{"type": "object", "properties": ..., "required": [...]}`
pub fn object_schema(properties: JsonValue, required: &[&str]) -> JsonValue {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Deserializes call arguments, reporting shape problems as validation errors.
pub fn parse_params<T: DeserializeOwned>(params: &JsonValue) -> Result<T, TaskmeshError> {
    serde_json::from_value(params.clone())
        .map_err(|e| TaskmeshError::ValidationError(format!("invalid arguments: {}", e)))
}

#[derive(Default)]
pub struct RouterBuilder {
    registry: ToolRegistry,
    handlers: FxHashMap<String, Box<dyn Capability>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the capability register its metadata, then adds it to the dispatch
    /// table under the same name. Installing a name twice replaces both.
    pub fn install<C: Capability + 'static>(&mut self, cap: C) -> Result<&mut Self, TaskmeshError> {
        cap.setup(&mut self.registry)?;
        self.handlers.insert(cap.name().to_string(), Box::new(cap));
        Ok(self)
    }

    pub fn build(self) -> Router {
        Router {
            registry: self.registry,
            handlers: self.handlers,
        }
    }
}

/// Immutable dispatch table plus the registry it was built from.
pub struct Router {
    registry: ToolRegistry,
    handlers: FxHashMap<String, Box<dyn Capability>>,
}

impl Router {
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn dispatch(
        &self,
        ctx: &Context,
        op: &str,
        params: &JsonValue,
    ) -> Result<JsonValue, TaskmeshError> {
        let cap = self
            .handlers
            .get(op)
            .ok_or_else(|| TaskmeshError::NotFound(format!("unknown call '{}'", op)))?;
        let params = if params.is_null() {
            JsonValue::Object(Default::default())
        } else {
            params.clone()
        };
        cap.validate(&params)?;
        cap.execute(
            &Invocation {
                ctx,
                registry: &self.registry,
            },
            &params,
        )
    }

    pub fn handle(&self, ctx: &Context, req: &RpcRequest) -> RpcResponse {
        match self.dispatch(ctx, &req.op, &req.params) {
            Ok(result) => success_response(req.id.clone(), req.op.clone(), &req.params, result),
            Err(err) => error_response(req.id.clone(), req.op.clone(), &req.params, &err),
        }
    }
}
