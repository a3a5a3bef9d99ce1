//! Inbound frame dispatch
//!
//! Parses control frames off the transport and routes function-call
//! requests through the injected handler map. Parsing oddities never
//! escape: a malformed frame is logged and dropped, an unknown function
//! name becomes an error frame back to the agent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::frames::{AgentFrame, ClientFrame};
use crate::{Error, Result};

/// Handler for one out-of-band function exposed to the agent
///
/// Implementations wrap external collaborators (e.g. the feedback
/// persistence endpoint) and must not panic on bad arguments.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Execute the function with the agent-supplied arguments
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

/// Dispatcher for inbound control frames
pub struct Dispatcher {
    functions: HashMap<String, Arc<dyn FunctionHandler>>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

impl Dispatcher {
    /// Create a dispatcher that replies on `outbound`
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<ClientFrame>) -> Self {
        Self {
            functions: HashMap::new(),
            outbound,
        }
    }

    /// Register a function handler under its wire name
    pub fn register_function(&mut self, name: impl Into<String>, handler: Arc<dyn FunctionHandler>) {
        let name = name.into();
        tracing::debug!(function = %name, "function handler registered");
        self.functions.insert(name, handler);
    }

    /// Parse a text frame; malformed input is logged and dropped
    #[must_use]
    pub fn parse(text: &str) -> Option<AgentFrame> {
        match serde_json::from_str(text) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed control frame");
                None
            }
        }
    }

    /// Handle one inbound text frame
    ///
    /// Function calls are consumed here (the reply goes out over the
    /// transport); every other frame is returned for the state machine.
    pub async fn handle_text(&self, text: &str) -> Option<AgentFrame> {
        let frame = Self::parse(text)?;

        if let AgentFrame::FunctionCall {
            name,
            call_id,
            arguments,
        } = frame
        {
            self.handle_function_call(&name, call_id, arguments).await;
            return None;
        }

        Some(frame)
    }

    /// Run a function call and send the result or error frame back
    async fn handle_function_call(
        &self,
        name: &str,
        call_id: String,
        arguments: serde_json::Value,
    ) {
        let reply = match self.functions.get(name) {
            Some(handler) => match handler.call(arguments).await {
                Ok(result) => {
                    tracing::debug!(function = %name, call_id = %call_id, "function call completed");
                    ClientFrame::FunctionResult { call_id, result }
                }
                Err(e) => {
                    tracing::warn!(function = %name, call_id = %call_id, error = %e, "function call failed");
                    ClientFrame::FunctionError {
                        call_id,
                        error: e.to_string(),
                    }
                }
            },
            None => {
                let e = Error::UnknownFunction(name.to_string());
                tracing::warn!(function = %name, call_id = %call_id, "unknown function requested");
                ClientFrame::FunctionError {
                    call_id,
                    error: e.to_string(),
                }
            }
        };

        if self.outbound.send(reply).is_err() {
            tracing::debug!("outbound channel closed, function reply dropped");
        }
    }
}
