//! Command Dispatcher
//!
//! Routes a single command to the handler registered for its type and races
//! the handler against its deadline and the caller's cancellation. Every call
//! ends in exactly one outcome: the handler's response, or an error paired
//! with a synthesized FAILED response stamped with the request's ID.
//!
//! Each `execute` spawns one task; there is no pooling, so callers bound
//! concurrency themselves.

mod command;
mod reporter;

pub use command::{CommandContext, CommandRequest, CommandResponse, CommandStatus};
pub use reporter::{
    CallbackReporter, ChannelReporter, NoopReporter, ProgressReporter, ProgressUpdate,
};

use crate::error::FleetError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default deadline for commands that don't carry one
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest deadline a command may ask for; larger requests are clamped
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Executes one command type
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: CommandContext,
        request: CommandRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> crate::error::Result<CommandResponse>;
}

/// Adapter turning an async closure into a [`CommandHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(CommandContext, CommandRequest, Arc<dyn ProgressReporter>) -> Fut + Send + Sync,
    Fut: Future<Output = crate::error::Result<CommandResponse>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: CommandContext,
        request: CommandRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> crate::error::Result<CommandResponse> {
        (self.0)(ctx, request, reporter).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(CommandContext, CommandRequest, Arc<dyn ProgressReporter>) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = crate::error::Result<CommandResponse>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Failed dispatch
///
/// `response` is the FAILED response synthesized for the caller; it is absent
/// only when the request was rejected before it could be identified.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DispatchError {
    #[source]
    pub error: FleetError,
    pub response: Option<CommandResponse>,
}

impl DispatchError {
    fn rejected(error: FleetError) -> Self {
        Self {
            error,
            response: None,
        }
    }

    fn failed(command_id: &str, error: FleetError) -> Self {
        let response = CommandResponse::failed(command_id, error.to_string());
        Self {
            error,
            response: Some(response),
        }
    }
}

/// Maps command types to handlers and executes them
pub struct CommandDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    default_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_default_timeout(default_timeout: Duration) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Register (or replace) the handler for a command type
    pub async fn register_handler(
        &self,
        command_type: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) {
        let command_type = command_type.into();
        debug!("Registering handler for {}", command_type);
        self.handlers.write().await.insert(command_type, handler);
    }

    pub async fn unregister_handler(&self, command_type: &str) -> bool {
        self.handlers.write().await.remove(command_type).is_some()
    }

    pub async fn has_handler(&self, command_type: &str) -> bool {
        self.handlers.read().await.contains_key(command_type)
    }

    /// Registered command types, sorted
    pub async fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    /// Execute a command with no outer cancellation
    pub async fn execute(
        &self,
        request: CommandRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<CommandResponse, DispatchError> {
        self.execute_with_cancel(request, reporter, CancellationToken::new())
            .await
    }

    /// Execute a command, giving up when `caller` is cancelled
    pub async fn execute_with_cancel(
        &self,
        request: CommandRequest,
        reporter: Arc<dyn ProgressReporter>,
        caller: CancellationToken,
    ) -> Result<CommandResponse, DispatchError> {
        if request.command_id.is_empty() {
            return Err(DispatchError::rejected(FleetError::InvalidRequest(
                "command_id is required".to_string(),
            )));
        }
        if request.command_type.is_empty() {
            return Err(DispatchError::failed(
                &request.command_id,
                FleetError::InvalidRequest("command_type is required".to_string()),
            ));
        }

        let handler = self
            .handlers
            .read()
            .await
            .get(&request.command_type)
            .cloned();
        let Some(handler) = handler else {
            warn!(
                "No handler for command {} of type {}",
                request.command_id, request.command_type
            );
            return Err(DispatchError::failed(
                &request.command_id,
                FleetError::HandlerNotRegistered(request.command_type.clone()),
            ));
        };

        let requested = if request.timeout_secs > 0 {
            Duration::from_secs(request.timeout_secs)
        } else {
            self.default_timeout
        };
        let timeout = requested.min(MAX_COMMAND_TIMEOUT);
        let deadline = Instant::now() + timeout;

        let command_id = request.command_id.clone();
        let token = caller.child_token();
        let ctx = CommandContext::new(command_id.clone(), deadline, token.clone());

        info!(
            "Executing command {} ({}) with timeout {:?}",
            command_id, request.command_type, timeout
        );

        let mut task = tokio::spawn(async move { handler.handle(ctx, request, reporter).await });

        let outcome = tokio::select! {
            biased;

            _ = caller.cancelled() => {
                token.cancel();
                task.abort();
                Err(FleetError::Cancelled)
            }

            joined = &mut task => match joined {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(e),
                Err(join_err) if join_err.is_panic() => {
                    Err(FleetError::HandlerPanicked(panic_message(join_err.into_panic())))
                }
                Err(_) => Err(FleetError::Cancelled),
            },

            _ = tokio::time::sleep_until(deadline) => {
                token.cancel();
                task.abort();
                Err(FleetError::CommandTimeout(timeout))
            }
        };

        match outcome {
            Ok(mut response) => {
                if response.command_id.is_empty() {
                    response.command_id = command_id.clone();
                }
                debug!("Command {} finished with {:?}", command_id, response.status);
                Ok(response)
            }
            Err(error) => {
                warn!("Command {} failed: {}", command_id, error);
                Err(DispatchError::failed(&command_id, error))
            }
        }
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
