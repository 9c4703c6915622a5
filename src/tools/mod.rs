//! Agent tool registry.
//!
//! The Live agent calls named functions mid-conversation. Each tool pairs a
//! Gemini `functionDeclaration` with a synchronous handler. A registry is
//! built per call so tool state (the RNG, the roster) never leaks between
//! calls.

pub mod backends;
pub mod roster;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::call::CallEvent;

pub use backends::ConnectionRequest;
pub use roster::{Department, Roster, Technician, Ticket, TicketStatus};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Missing required argument '{argument}' for {tool}")]
    MissingArgument { tool: String, argument: String },
    #[error("{0}")]
    Failed(String),
}

/// A function call requested by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

/// Typed view over a call's argument map.
#[derive(Debug, Clone, Copy)]
pub struct ToolArgs<'a> {
    tool: &'a str,
    args: &'a Map<String, Value>,
}

impl<'a> ToolArgs<'a> {
    pub fn new(tool: &'a str, args: &'a Map<String, Value>) -> Self {
        Self { tool, args }
    }

    /// Primitive argument rendered as a string. Numbers and booleans are
    /// accepted since the agent sometimes reads account ids as numbers.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.args.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Result<String, ToolError> {
        self.get(key).ok_or_else(|| ToolError::MissingArgument {
            tool: self.tool.to_string(),
            argument: key.to_string(),
        })
    }
}

// ── Declarations (Gemini functionDeclarations schema) ────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: BTreeMap<String, PropertySchema>,
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn object() -> Self {
        Self {
            kind: "OBJECT".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// Add a required string property.
    pub fn string(mut self, name: &str, description: Option<&str>) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertySchema {
                kind: "STRING".to_string(),
                description: description.map(str::to_string),
            },
        );
        self.required.push(name.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

// ── Responses ────────────────────────────────────────────────────

/// Payload of a function response: a JSON-encoded result or an error text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Result(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: ToolOutcome,
}

/// Side effect requested by a handler, applied by the call controller.
#[derive(Debug, Clone)]
pub enum ToolEffect {
    Emit(CallEvent),
    /// Standalone system line in the transcript.
    SystemNote(String),
    /// Hand the call to a human and end it after the forward delay.
    ForwardCall,
}

/// What a handler can reach while it runs.
pub struct ToolContext<'a> {
    pub roster: &'a Roster,
    pub rng: &'a mut StdRng,
    effects: Vec<ToolEffect>,
}

impl ToolContext<'_> {
    pub fn emit(&mut self, event: CallEvent) {
        self.effects.push(ToolEffect::Emit(event));
    }

    pub fn note(&mut self, text: impl Into<String>) {
        self.effects.push(ToolEffect::SystemNote(text.into()));
    }

    pub fn forward_call(&mut self) {
        self.effects.push(ToolEffect::ForwardCall);
    }
}

pub trait ToolHandler: Send + Sync {
    fn declaration(&self) -> FunctionDeclaration;
    fn invoke(&self, args: ToolArgs<'_>, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError>;
}

/// Result of one dispatch: the response to send and the effects to apply.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub response: FunctionResponse,
    pub effects: Vec<ToolEffect>,
}

struct Registered {
    declaration: FunctionDeclaration,
    handler: Box<dyn ToolHandler>,
}

pub struct ToolRegistry {
    tools: Vec<Registered>,
    roster: Roster,
    rng: StdRng,
}

impl ToolRegistry {
    pub fn new(roster: Roster, rng: StdRng) -> Self {
        Self {
            tools: Vec::new(),
            roster,
            rng,
        }
    }

    /// Registry with every call-center tool.
    pub fn standard(roster: Roster, rng: StdRng) -> Self {
        let mut registry = Self::new(roster, rng);
        for handler in backends::all() {
            registry.register(handler);
        }
        registry
    }

    /// Standard registry with an entropy-seeded RNG.
    pub fn from_entropy(roster: Roster) -> Self {
        Self::standard(roster, StdRng::seed_from_u64(rand::random()))
    }

    /// Add a tool; a later registration replaces an earlier one of the same name.
    pub fn register(&mut self, handler: Box<dyn ToolHandler>) {
        let declaration = handler.declaration();
        self.tools.retain(|t| t.declaration.name != declaration.name);
        self.tools.push(Registered {
            declaration,
            handler,
        });
    }

    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools.iter().map(|t| t.declaration.clone()).collect()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Run one call. Always yields exactly one response tagged with the call id.
    pub fn dispatch(&mut self, call: &ToolCall) -> Dispatch {
        let mut ctx = ToolContext {
            roster: &self.roster,
            rng: &mut self.rng,
            effects: Vec::new(),
        };

        let outcome = match self.tools.iter().find(|t| t.declaration.name == call.name) {
            None => Err(ToolError::UnknownTool(call.name.clone())),
            Some(tool) => {
                let args = ToolArgs::new(&call.name, &call.args);
                validate_required(&tool.declaration, args)
                    .and_then(|()| tool.handler.invoke(args, &mut ctx))
            }
        };

        let response = match outcome {
            Ok(value) => {
                tracing::info!(tool = %call.name, call_id = %call.id, "Tool call handled");
                ToolOutcome::Result(value.to_string())
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, "Tool call failed: {e}");
                // Effects of a failed call are dropped.
                ctx.effects.clear();
                ToolOutcome::Error(e.to_string())
            }
        };

        Dispatch {
            response: FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response,
            },
            effects: ctx.effects,
        }
    }
}

fn validate_required(declaration: &FunctionDeclaration, args: ToolArgs<'_>) -> Result<(), ToolError> {
    for name in &declaration.parameters.required {
        args.string(name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        ToolRegistry::standard(Roster::default(), StdRng::seed_from_u64(11))
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "fc-1".into(),
            name: name.into(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn unknown_tool_returns_error_response() {
        let mut reg = registry();
        let out = reg.dispatch(&call("launchRocket", json!({})));
        assert_eq!(out.response.id, "fc-1");
        assert_eq!(out.response.name, "launchRocket");
        assert_eq!(
            out.response.response,
            ToolOutcome::Error("Unknown tool: launchRocket".into())
        );
        assert!(out.effects.is_empty());
    }

    #[test]
    fn missing_required_argument_is_reported() {
        let mut reg = registry();
        let out = reg.dispatch(&call("sendSms", json!({"accountId": "AC1234"})));
        match out.response.response {
            ToolOutcome::Error(msg) => assert!(msg.contains("'message'"), "{msg}"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn numeric_account_id_is_accepted() {
        let mut reg = registry();
        let out = reg.dispatch(&call("getDeviceDetails", json!({"accountId": 99887766})));
        let ToolOutcome::Result(body) = out.response.response else {
            panic!("expected result");
        };
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["deviceId"], "ONT-7766");
    }

    #[test]
    fn response_serializes_as_result_or_error() {
        let ok = FunctionResponse {
            id: "a".into(),
            name: "getBilling".into(),
            response: ToolOutcome::Result("{}".into()),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"id": "a", "name": "getBilling", "response": {"result": "{}"}})
        );
        let err = FunctionResponse {
            id: "b".into(),
            name: "x".into(),
            response: ToolOutcome::Error("boom".into()),
        };
        assert_eq!(serde_json::to_value(&err).unwrap()["response"], json!({"error": "boom"}));
    }

    #[test]
    fn declarations_cover_every_tool() {
        let names: Vec<String> = registry().declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "getBilling",
                "createTicket",
                "sendSms",
                "getDeviceDetails",
                "restartDevice",
                "transferCallToManager",
                "resolveIssue",
                "createNewConnectionRequest",
            ]
        );
    }

    #[test]
    fn declaration_schema_uses_gemini_types() {
        let decl = registry()
            .declarations()
            .into_iter()
            .find(|d| d.name == "createNewConnectionRequest")
            .unwrap();
        let json = serde_json::to_value(&decl).unwrap();
        assert_eq!(json["parameters"]["type"], "OBJECT");
        assert_eq!(json["parameters"]["properties"]["village"]["type"], "STRING");
        assert_eq!(
            json["parameters"]["properties"]["customerName"]["description"],
            "Customer's full name"
        );
        assert!(json["parameters"]["properties"].get("accountId").is_none());
    }

    #[test]
    fn register_replaces_same_name() {
        struct Fixed;
        impl ToolHandler for Fixed {
            fn declaration(&self) -> FunctionDeclaration {
                FunctionDeclaration {
                    name: "getBilling".into(),
                    description: "stub".into(),
                    parameters: ParameterSchema::object(),
                }
            }
            fn invoke(&self, _: ToolArgs<'_>, _: &mut ToolContext<'_>) -> Result<Value, ToolError> {
                Ok(json!({"stub": true}))
            }
        }

        let mut reg = registry();
        reg.register(Box::new(Fixed));
        assert_eq!(reg.declarations().len(), 8);
        let out = reg.dispatch(&call("getBilling", json!({})));
        assert_eq!(out.response.response, ToolOutcome::Result(r#"{"stub":true}"#.into()));
    }
}
