//! Tool handler trait.

use super::{ToolContext, ToolError};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;

/// Executes one tool call.
///
/// This is the boundary between the dispatch loop and side effects.
/// Handlers must not panic on bad input; return [`ToolError::InvalidInput`].
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, cx: &ToolContext) -> Result<Value, ToolError>;
}

/// Handler backed by an async closure over raw JSON arguments.
pub struct FnHandler<F>(F);

/// Wrap an async closure taking raw JSON arguments.
pub fn tool_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: Value, cx: &ToolContext) -> Result<Value, ToolError> {
        (self.0)(arguments, cx.clone()).await
    }
}

/// Handler that decodes its arguments into `A` and encodes its output `O`.
pub struct TypedHandler<A, O, F> {
    f: F,
    _marker: PhantomData<fn(A) -> O>,
}

/// Wrap an async closure taking a deserializable argument struct.
///
/// Arguments that fail to decode become [`ToolError::InvalidInput`] without
/// calling the closure.
pub fn typed_tool<A, O, F, Fut>(f: F) -> TypedHandler<A, O, F>
where
    A: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(A, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
{
    TypedHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<A, O, F, Fut> ToolHandler for TypedHandler<A, O, F>
where
    A: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(A, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: Value, cx: &ToolContext) -> Result<Value, ToolError> {
        let args: A = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let output = (self.f)(args, cx.clone()).await?;
        serde_json::to_value(output)
            .map_err(|e| ToolError::Execution(format!("serialize result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Place {
        place: String,
    }

    #[tokio::test]
    async fn typed_tool_decodes_arguments() {
        let handler = typed_tool(|args: Place, _cx| async move {
            Ok::<_, ToolError>(json!({ "echo": args.place }))
        });
        let out = handler
            .call(json!({"place": "Seattle"}), &ToolContext::detached())
            .await
            .unwrap();
        assert_eq!(out, json!({"echo": "Seattle"}));
    }

    #[tokio::test]
    async fn typed_tool_rejects_bad_arguments() {
        let handler = typed_tool(|args: Place, _cx| async move { Ok::<_, ToolError>(args.place) });
        let err = handler
            .call(json!({"city": "Seattle"}), &ToolContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn fn_handler_passes_errors_through() {
        let handler = tool_fn(|_, _| async { Err(ToolError::execution("boom")) });
        let err = handler
            .call(Value::Null, &ToolContext::detached())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Execution("boom".into()));
    }
}
