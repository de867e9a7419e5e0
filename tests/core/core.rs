use serde_json::{Value, json};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::process::{Command, Stdio};
use taskmesh::build_router;
use taskmesh::core::config;
use taskmesh::core::context::Context;
use taskmesh::core::rpc::{RpcRequest, RpcResponse};
use tempfile::tempdir;

/// Opens a project whose config selects the local hashing embedder.
fn open_project(root: &Path) -> Context {
    let path = config::config_path(root);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        "[embedding]\nprovider = \"hashing\"\ndimension = 384\n\n[discovery]\ndefault_limit = 3\n",
    )
    .unwrap();
    Context::open(root).unwrap()
}

fn call(ctx: &Context, op: &str, params: Value) -> RpcResponse {
    let router = build_router().unwrap();
    router.handle(
        ctx,
        &RpcRequest {
            op: op.to_string(),
            params,
            id: format!("req-{}", op),
        },
    )
}

fn result(ctx: &Context, op: &str, params: Value) -> Value {
    let resp = call(ctx, op, params);
    assert!(resp.success, "{} failed: {:?}", op, resp.error);
    resp.result.unwrap()
}

#[test]
fn router_exposes_every_builtin() {
    let router = build_router().unwrap();
    let names = router.names();
    for expected in [
        "coordinator_create_human_task",
        "coordinator_create_agent_task",
        "coordinator_update_todo_status",
        "coordinator_add_task_prompt_notes",
        "coordinator_clear_todo_prompt_notes",
        "coordinator_list_agent_tasks",
        "coordinator_clear_task_board",
        "coordinator_get_popular_collections",
        "knowledge_store",
        "knowledge_find",
        "knowledge_list_collections",
        "discover_tools",
        "get_tool_schema",
        "discovery_index_tools",
        "discovery_reindex",
    ] {
        assert!(names.contains(&expected.to_string()), "missing {}", expected);
    }
    assert_eq!(router.registry().len(), names.len());
}

#[test]
fn config_file_selects_backends_and_limits() {
    let tmp = tempdir().unwrap();
    let ctx = open_project(tmp.path());
    assert_eq!(ctx.embedder.model_id(), "hashing:384");
    assert_eq!(ctx.config.discovery.default_limit, 3);
    assert!(ctx.store.root.ends_with(".taskmesh/data"));
}

#[test]
fn board_round_trip_through_calls() {
    let tmp = tempdir().unwrap();
    let ctx = open_project(tmp.path());

    let human = result(&ctx, "coordinator_create_human_task", json!({ "prompt": "Ship v1" }));
    let human_id = human["humanTaskId"].as_str().unwrap().to_string();

    let agent = result(
        &ctx,
        "coordinator_create_agent_task",
        json!({
            "humanTaskId": human_id,
            "agentRole": "backend",
            "contextSummary": "API work",
            "todos": [
                { "description": "design schema", "filePath": "src/schema.rs" },
                { "description": "write handlers" }
            ]
        }),
    );
    let agent_id = agent["agentTaskId"].as_str().unwrap().to_string();

    let task = result(&ctx, "coordinator_get_agent_task", json!({ "agentTaskId": agent_id }));
    assert_eq!(task["status"], "pending");
    assert_eq!(task["todos"][0]["orderIndex"], 0);
    assert_eq!(task["todos"][0]["filePath"], "src/schema.rs");
    assert_eq!(task["todos"][1]["orderIndex"], 1);
    let todo_id = task["todos"][1]["id"].as_str().unwrap().to_string();

    result(
        &ctx,
        "coordinator_update_todo_status",
        json!({ "agentTaskId": agent_id, "todoId": todo_id, "status": "completed" }),
    );
    result(
        &ctx,
        "coordinator_add_todo_prompt_notes",
        json!({ "agentTaskId": agent_id, "todoId": todo_id, "promptNotes": "_nice_" }),
    );

    let detail = result(&ctx, "coordinator_get_human_task", json!({ "humanTaskId": human_id }));
    assert_eq!(detail["prompt"], "Ship v1");
    let todo = &detail["agentTasks"][0]["todos"][1];
    assert_eq!(todo["status"], "completed");
    assert_eq!(todo["humanPromptNotes"], "_nice_");
    assert!(todo["completedAt"].is_i64());
    assert_eq!(detail["agentTasks"][0]["status"], "pending");

    let listed = result(&ctx, "coordinator_list_agent_tasks", json!({ "agentRole": "backend" }));
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[test]
fn errors_come_back_as_tagged_envelopes() {
    let tmp = tempdir().unwrap();
    let ctx = open_project(tmp.path());

    let resp = call(&ctx, "no_such_call", json!({}));
    assert!(!resp.success);
    assert_eq!(resp.id, "req-no_such_call");
    assert_eq!(resp.error.unwrap().code, "not_found");

    let resp = call(&ctx, "coordinator_create_human_task", json!({}));
    let err = resp.error.unwrap();
    assert_eq!(err.code, "validation_error");
    assert!(err.message.contains("prompt"));

    let resp = call(&ctx, "coordinator_create_human_task", json!({ "prompt": 7 }));
    assert_eq!(resp.error.unwrap().code, "validation_error");

    let resp = call(
        &ctx,
        "coordinator_update_task_status",
        json!({ "agentTaskId": "A_nope", "status": "completed" }),
    );
    assert_eq!(resp.error.unwrap().code, "not_found");

    let resp = call(
        &ctx,
        "coordinator_add_task_prompt_notes",
        json!({ "agentTaskId": "A_nope", "promptNotes": "x".repeat(5001) }),
    );
    assert_eq!(resp.error.unwrap().code, "validation_error");
}

#[test]
fn clearing_the_board_requires_confirmation() {
    let tmp = tempdir().unwrap();
    let ctx = open_project(tmp.path());
    result(&ctx, "coordinator_create_human_task", json!({ "prompt": "keep me" }));

    let resp = call(&ctx, "coordinator_clear_task_board", json!({ "confirm": false }));
    assert_eq!(resp.error.unwrap().code, "validation_error");
    let humans = result(&ctx, "coordinator_list_human_tasks", json!({}));
    assert_eq!(humans.as_array().unwrap().len(), 1);

    let cleared = result(&ctx, "coordinator_clear_task_board", json!({ "confirm": true }));
    assert_eq!(cleared["ok"], true);
    assert_eq!(cleared["humanTasksDeleted"], 1);
    let humans = result(&ctx, "coordinator_list_human_tasks", json!(null));
    assert!(humans.as_array().unwrap().is_empty());
}

#[test]
fn discovery_and_knowledge_through_calls() {
    let tmp = tempdir().unwrap();
    let ctx = open_project(tmp.path());

    let report = result(&ctx, "discovery_index_tools", json!({}));
    assert!(report["indexed"].as_u64().unwrap() >= 15);

    let found = result(
        &ctx,
        "discover_tools",
        json!({ "query": "store knowledge in a collection", "limit": 3 }),
    );
    let names: Vec<&str> = found
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert!(names.len() <= 3);
    assert!(names.contains(&"knowledge_store"), "got {:?}", names);

    let schema = result(&ctx, "get_tool_schema", json!({ "toolName": "knowledge_store" }));
    assert_eq!(schema["inputSchema"]["type"], "object");

    let stored = result(
        &ctx,
        "knowledge_store",
        json!({ "collection": "runbooks", "content": "Rotate the signing keys every quarter" }),
    );
    assert!(stored["id"].as_str().unwrap().starts_with("K_"));

    let hits = result(
        &ctx,
        "knowledge_find",
        json!({ "collection": "runbooks", "query": "signing keys" }),
    );
    assert_eq!(hits[0]["collection"], "runbooks");
    assert!(hits[0]["score"].as_f64().unwrap() > 0.0);

    let popular = result(&ctx, "coordinator_get_popular_collections", json!({}));
    assert_eq!(popular, json!([{ "collection": "runbooks", "count": 1 }]));

    let reindexed = result(&ctx, "discovery_reindex", json!({ "target": "all" }));
    assert_eq!(reindexed["knowledge"], 1);

    let resp = call(&ctx, "knowledge_find", json!({ "collection": "nothing", "query": "x" }));
    assert_eq!(resp.error.unwrap().code, "not_found");
}

#[test]
fn receipts_hash_inputs_and_outputs() {
    let tmp = tempdir().unwrap();
    let ctx = open_project(tmp.path());
    let a = call(&ctx, "coordinator_list_human_tasks", json!({}));
    let b = call(&ctx, "coordinator_list_human_tasks", json!({}));
    assert_eq!(a.receipt.op, "coordinator_list_human_tasks");
    assert_eq!(a.receipt.inputs_hash, b.receipt.inputs_hash);
    assert_eq!(a.receipt.outputs_hash, b.receipt.outputs_hash);
    assert_eq!(a.receipt.inputs_hash.len(), 64);
}

#[test]
fn serve_answers_each_line() {
    let tmp = tempdir().unwrap();
    let ctx = open_project(tmp.path());
    let router = build_router().unwrap();

    let input = [
        json!({ "op": "coordinator_create_human_task", "params": { "prompt": "one" }, "id": "a" }),
        json!({ "op": "coordinator_create_human_task", "params": { "prompt": "two" }, "id": "b" }),
        json!({ "op": "missing_op", "id": "c" }),
    ]
    .iter()
    .map(|v| v.to_string())
    .collect::<Vec<_>>()
    .join("\n")
        + "\n\nnot json\n";

    let mut output = Vec::new();
    taskmesh::serve(&router, &ctx, Cursor::new(input), &mut output).unwrap();

    let responses: Vec<RpcResponse> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(responses.len(), 4);

    let by_id = |id: &str| responses.iter().find(|r| r.id == id).unwrap();
    assert!(by_id("a").success);
    assert!(by_id("b").success);
    assert_eq!(by_id("c").error.as_ref().unwrap().code, "not_found");
    let malformed = responses
        .iter()
        .find(|r| r.receipt.op == "invalid_request")
        .unwrap();
    assert_eq!(malformed.error.as_ref().unwrap().code, "validation_error");

    let humans = result(&ctx, "coordinator_list_human_tasks", json!({}));
    assert_eq!(humans.as_array().unwrap().len(), 2);
}

#[test]
fn operations_are_audited() {
    let tmp = tempdir().unwrap();
    let ctx = open_project(tmp.path());
    result(&ctx, "coordinator_create_human_task", json!({ "prompt": "audit me" }));
    let _ = call(&ctx, "coordinator_get_agent_task", json!({ "agentTaskId": "A_missing" }));

    let events = ctx.store.broker().read_events().unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.op == "tasks.human.create" && e.status == "success" && e.db_id == "tasks.db")
    );
    assert!(
        events
            .iter()
            .any(|e| e.op == "tasks.agent.get" && e.status == "error" && e.error.is_some())
    );
}

#[test]
fn serve_refuses_to_start_when_requested_indexing_fails() {
    let tmp = tempdir().unwrap();
    let path = config::config_path(tmp.path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        "[embedding]\nprovider = \"http\"\nbase_url = \"http://127.0.0.1:1/v1\"\ntimeout_secs = 2\n",
    )
    .unwrap();

    let run = |index_on_start: bool| {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_taskmesh"));
        cmd.arg("--root").arg(tmp.path()).arg("serve");
        if index_on_start {
            cmd.arg("--index-on-start");
        }
        cmd.env_remove("TASKMESH_EMBEDDING_PROVIDER")
            .env_remove("TASKMESH_EMBEDDING_URL")
            .env_remove("TASKMESH_EMBEDDING_MODEL")
            .stdin(Stdio::null())
            .output()
            .unwrap()
    };

    let failed = run(true);
    assert!(!failed.status.success());
    assert!(failed.stdout.is_empty());

    // Without the flag the server starts and exits cleanly at end of input.
    assert!(run(false).status.success());
}
