//! End-to-end executor scenarios against an in-process `Fabric`: no mesh
//! hop, no authentication, just the pipeline itself (gates, cache, trace).

use chainbox::{ExecuteOptions, ExecutionResult, Fabric, FabricBuilder};
use serde_json::{json, Value as Json};
use std::sync::Arc;

fn test_fabric() -> Arc<Fabric> {
    FabricBuilder::new(chainbox::config::Config::default(), 0).build()
}

fn register_echo(fabric: &Fabric) {
    fabric.registry.register(
        "Math.Add",
        Arc::new(|input: Json, _ctx| {
            Box::pin(async move {
                let a = input.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
                let b = input.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(json!({ "sum": a + b }))
            })
        }),
        Default::default(),
    );
}

#[tokio::test]
async fn local_happy_path_returns_value_and_dev_trace() {
    let fabric = test_fabric();
    register_echo(&fabric);
    let executor = chainbox::Executor::new(fabric);

    let result = executor
        .execute("Math.Add", json!({"a": 2, "b": 3}), None, ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.value, json!({"sum": 5}));
    assert_eq!(result.outcome, chainbox::Outcome::Success);
    let trace = result.trace.expect("dev mode attaches the trace");
    assert_eq!(trace.fn_name, "Math.Add");
    assert!(trace.duration_ms.is_some());
}

#[tokio::test]
async fn production_mode_strips_trace() {
    let config = chainbox::config::Config {
        production: true,
        ..Default::default()
    };
    let fabric = FabricBuilder::new(config, 0).build();
    register_echo(&fabric);
    let executor = chainbox::Executor::new(fabric);

    let result = executor
        .execute("Math.Add", json!({"a": 1, "b": 1}), None, ExecuteOptions::default())
        .await
        .unwrap();

    assert!(result.trace.is_none());
}

#[tokio::test]
async fn unknown_capability_fails_not_found() {
    let fabric = test_fabric();
    let executor = chainbox::Executor::new(fabric);

    let result: ExecutionResult = executor
        .execute("Nope.Missing", json!({}), None, ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.outcome, chainbox::Outcome::NotFound);
    assert_eq!(result.value["error"], json!("FUNCTION_NOT_FOUND"));
}

#[tokio::test]
async fn depth_limit_exceeded_when_handler_recurses_past_max() {
    let config = chainbox::config::Config {
        default_max_depth: 2,
        ..Default::default()
    };
    let fabric = FabricBuilder::new(config, 0).build();
    fabric.registry.register(
        "Recurse.Self",
        Arc::new(|input: Json, ctx| {
            Box::pin(async move {
                ctx.call("Recurse.Self", input, Default::default()).await
            })
        }),
        Default::default(),
    );
    let executor = chainbox::Executor::new(fabric);

    let result = executor
        .execute("Recurse.Self", json!({}), None, ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.outcome, chainbox::Outcome::Failure);
    assert_eq!(result.value["error"], json!("MAX_CALL_DEPTH_EXCEEDED"));
}

#[tokio::test]
async fn cached_capability_hits_on_second_call() {
    let fabric = test_fabric();
    let call_count = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = call_count.clone();
    fabric.registry.register(
        "Price.Get.Cached",
        Arc::new(move |input: Json, _ctx| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(json!({ "price": input["sku"] }))
            })
        }),
        Default::default(),
    );
    let executor = chainbox::Executor::new(fabric);

    let first = executor
        .execute("Price.Get.Cached", json!({"sku": "abc"}), None, ExecuteOptions::default())
        .await
        .unwrap();
    let second = executor
        .execute("Price.Get.Cached", json!({"sku": "abc"}), None, ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(first.value, second.value);
    assert_eq!(call_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    let second_trace = second.trace.unwrap();
    assert_eq!(second_trace.cached, Some(true));
}

#[tokio::test]
async fn policy_forbids_identity_without_required_role() {
    let fabric = test_fabric();
    fabric.registry.register(
        "Admin.Purge",
        Arc::new(|_input, _ctx| Box::pin(async move { Ok(json!({})) })),
        chainbox::types::Permissions {
            allow: vec!["admin".to_string()],
        },
    );
    let executor = chainbox::Executor::new(fabric);

    let result = executor
        .execute("Admin.Purge", json!({}), None, ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.outcome, chainbox::Outcome::Forbidden);
}

#[tokio::test]
async fn parallel_fan_out_preserves_order_with_one_failure() {
    let fabric = test_fabric();
    register_echo(&fabric);
    fabric.registry.register(
        "Always.Fail",
        Arc::new(|_input, _ctx| {
            Box::pin(async move {
                Err(chainbox::ChainboxError::Execution {
                    fn_name: "Always.Fail".to_string(),
                    message: "boom".to_string(),
                    meta: Default::default(),
                })
            })
        }),
        Default::default(),
    );
    let executor = chainbox::Executor::new(fabric);

    let outcomes = executor
        .parallel_root(
            vec![
                ("Math.Add".to_string(), json!({"a": 1, "b": 1})),
                ("Always.Fail".to_string(), json!({})),
                ("Math.Add".to_string(), json!({"a": 10, "b": 5})),
            ],
            None,
            "trace-parallel".to_string(),
            chainbox::types::ExecutionFrame::root(10, 30_000, 0),
        )
        .await;

    assert_eq!(outcomes.len(), 3);
    match &outcomes[0] {
        chainbox::executor::ParallelOutcome::Ok(v) => assert_eq!(v, &json!({"sum": 2})),
        _ => panic!("expected success at index 0"),
    }
    match &outcomes[1] {
        chainbox::executor::ParallelOutcome::Err(e) => assert_eq!(e.error, "EXECUTION_ERROR"),
        _ => panic!("expected failure at index 1"),
    }
    match &outcomes[2] {
        chainbox::executor::ParallelOutcome::Ok(v) => assert_eq!(v, &json!({"sum": 15})),
        _ => panic!("expected success at index 2"),
    }
}

#[tokio::test]
async fn nested_call_shares_trace_tree() {
    let fabric = test_fabric();
    register_echo(&fabric);
    fabric.registry.register(
        "Order.Total",
        Arc::new(|input: Json, ctx| {
            Box::pin(async move {
                let sum = ctx.call("Math.Add", input, Default::default()).await?;
                Ok(json!({ "total": sum }))
            })
        }),
        Default::default(),
    );
    let executor = chainbox::Executor::new(fabric);

    let result = executor
        .execute("Order.Total", json!({"a": 4, "b": 6}), None, ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(result.value, json!({"total": {"sum": 10}}));
    let trace = result.trace.unwrap();
    assert_eq!(trace.fn_name, "Order.Total");
    assert_eq!(trace.children.len(), 1);
    assert_eq!(trace.children[0].fn_name, "Math.Add");
}
