//! Unit tests for the function registry.

use serde::{Deserialize, Serialize};
use serde_json::json;

use outpost::server::FunctionRegistry;
use outpost::{AppError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct DoubleArgs {
    value: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DoubleResult {
    value: u64,
}

async fn double(args: DoubleArgs) -> Result<DoubleResult> {
    Ok(DoubleResult {
        value: args.value * 2,
    })
}

#[tokio::test]
async fn invokes_a_registered_typed_handler() {
    let mut registry = FunctionRegistry::new();
    registry.register("Double", double);

    let result = registry
        .invoke("Double", json!({ "value": 21 }))
        .await
        .expect("handler ran");
    assert_eq!(result, json!({ "value": 42 }));
}

#[tokio::test]
async fn unknown_function_is_not_found_not_fatal() {
    let registry = FunctionRegistry::new();

    let err = registry
        .invoke("Nope", json!({}))
        .await
        .expect_err("nothing registered");
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(err.to_string().contains("Nope"));
}

#[tokio::test]
async fn bad_args_surface_as_a_cast_error() {
    let mut registry = FunctionRegistry::new();
    registry.register("Double", double);

    let err = registry
        .invoke("Double", json!({ "value": "not a number" }))
        .await
        .expect_err("args do not fit the handler input");
    assert!(matches!(err, AppError::Cast(_)));
}

#[tokio::test]
async fn handler_errors_propagate_verbatim() {
    let mut registry = FunctionRegistry::new();
    registry.register("Fail", |_: serde_json::Value| async {
        Err::<serde_json::Value, _>(AppError::Handler("deliberate failure".into()))
    });

    let err = registry
        .invoke("Fail", json!({}))
        .await
        .expect_err("handler fails");
    assert!(err.to_string().contains("deliberate failure"));
}

#[test]
fn registry_is_append_only_and_introspectable() {
    let mut registry = FunctionRegistry::new();
    assert!(!registry.contains("Double"));

    registry.register("Double", double);
    assert!(registry.contains("Double"));
    assert_eq!(registry.names(), vec!["Double"]);
}

#[test]
fn builtin_registry_serves_the_stock_operations() {
    let registry = outpost::ops::builtin_registry();
    for name in ["Ping", "Exec", "FileStat"] {
        assert!(registry.contains(name), "missing builtin: {name}");
    }
    // Close is a dispatcher control frame, not a handler.
    assert!(!registry.contains("Close"));
}
