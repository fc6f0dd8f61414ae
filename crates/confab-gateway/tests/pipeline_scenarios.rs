//! End-to-end pipeline scenarios over scripted backends: plain chat,
//! RAG-only, tool flows with argument rewriting and artifact handoff, and
//! the boundary behaviors around malformed frames and resets.

mod support;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use confab_core::types::session::FileSource;
use confab_core::{ClientFrame, Role};
use confab_gateway::session::Session;
use confab_storage::ObjectStore;
use serde_json::json;
use support::*;

#[tokio::test]
async fn plain_chat_round_trip() {
    let mut harness = harness();
    harness.backend.queue_plain("hello");
    let mut session = Session::new("a@b.c");

    let frame = chat_frame(json!({ "content": "hi", "model": "m1" }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;

    let frames = harness.frames();
    assert_eq!(frame_types(&frames), vec!["chat_response"]);
    assert_eq!(frames[0]["message"], "hello");
    assert_eq!(frames[0]["model"], "m1");
    assert_eq!(frames[0]["session_id"], session.id);

    assert_eq!(session.history.count_role(Role::User), 1);
    assert_eq!(session.history.count_role(Role::Assistant), 1);
}

#[tokio::test]
async fn missing_model_yields_error_and_session_survives() {
    let mut harness = harness();
    let mut session = Session::new("a@b.c");

    let frame = chat_frame(json!({ "content": "hi", "model": "" }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;
    let frames = harness.frames();
    assert_eq!(frame_types(&frames), vec!["error"]);
    assert!(session.history.is_empty());

    // The next turn still works.
    harness.backend.queue_plain("recovered");
    let frame = chat_frame(json!({ "content": "hi", "model": "m1" }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;
    assert_eq!(harness.frames()[0]["message"], "recovered");
}

#[tokio::test]
async fn unknown_frame_type_keeps_session_open() {
    let mut harness = harness();
    let mut session = Session::new("a@b.c");

    // An unknown type fails ClientFrame parsing; the connection layer
    // answers with an error frame.
    assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"subscribe"}"#).is_err());
    harness
        .pipeline
        .handle_malformed("unknown variant `subscribe`", &harness.updates);
    let frames = harness.frames();
    assert_eq!(frame_types(&frames), vec!["error"]);

    harness.backend.queue_plain("still here");
    let frame = chat_frame(json!({ "content": "hi", "model": "m1" }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;
    assert_eq!(harness.frames()[0]["message"], "still here");
}

#[tokio::test]
async fn reset_clears_state_but_preserves_identity() {
    let mut harness = harness();
    harness.backend.queue_plain("one");
    let mut session = Session::new("a@b.c");
    let original_id = session.id.clone();

    let frame = chat_frame(json!({ "content": "hi", "model": "m1" }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;
    harness.frames();

    harness
        .pipeline
        .handle_frame(&mut session, ClientFrame::ResetSession, &harness.updates)
        .await;
    let frames = harness.frames();
    assert_eq!(frame_types(&frames), vec!["session_reset"]);
    assert_eq!(frames[0]["session_id"], original_id);
    assert!(session.history.is_empty());
    assert!(session.files.is_empty());
    assert_eq!(session.user, "a@b.c");

    // Chat works after the reset.
    harness.backend.queue_plain("fresh");
    let frame = chat_frame(json!({ "content": "again", "model": "m1" }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;
    assert_eq!(harness.frames()[0]["message"], "fresh");
    assert_eq!(session.id, original_id);
}

#[tokio::test]
async fn rag_only_returns_retrieved_content_with_metadata() {
    let mut harness = harness_with(
        StaticTools::new(),
        Some(std::sync::Arc::new(StubRetriever { fail: false })),
    );
    let mut session = Session::new("a@b.c");

    let frame = chat_frame(json!({
        "content": "what do the docs say?",
        "model": "m1",
        "selected_data_sources": ["docs"],
        "only_rag": true,
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;

    let frames = harness.frames();
    assert_eq!(frame_types(&frames), vec!["chat_response"]);
    assert_eq!(frames[0]["message"], "CTX");
    // No LLM involved in RAG-only mode.
    assert_eq!(harness.backend.calls(), 0);

    let assistant = session.history.last().unwrap();
    let metadata = assistant.metadata.as_ref().unwrap();
    assert_eq!(metadata["data_sources"], json!(["docs"]));
}

#[tokio::test]
async fn rag_only_failure_is_terminal_but_session_survives() {
    let mut harness = harness_with(
        StaticTools::new(),
        Some(std::sync::Arc::new(StubRetriever { fail: true })),
    );
    let mut session = Session::new("a@b.c");

    let frame = chat_frame(json!({
        "content": "query",
        "model": "m1",
        "selected_data_sources": ["docs"],
        "only_rag": true,
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;

    let frames = harness.frames();
    assert_eq!(frame_types(&frames), vec!["error"]);
    assert!(frames[0]["message"].as_str().unwrap().contains("rag"));

    harness.backend.queue_plain("back");
    let frame = chat_frame(json!({ "content": "plain now", "model": "m1" }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;
    assert_eq!(harness.frames()[0]["message"], "back");
}

#[tokio::test]
async fn tool_call_rewrites_filename_and_skips_username() {
    let tools = StaticTools::new().with_tool(
        "srv_analyze",
        json!({
            "type": "object",
            "properties": {"filename": {"type": "string"}}
        }),
        Ok(json!({"results": {"pages": 3}}).to_string()),
    );
    let mut harness = harness_with(tools, None);
    let mut session = Session::new("a@b.c");

    // Pre-seed the session file the model will reference.
    let meta = harness
        .store
        .upload(
            "a@b.c",
            "report.pdf",
            &STANDARD.encode(b"%PDF"),
            "application/pdf",
            Default::default(),
            FileSource::User,
        )
        .await
        .unwrap();
    session.files.insert(
        "report.pdf".to_string(),
        confab_core::types::session::SessionFileRef {
            key: meta.key.clone(),
            content_type: meta.content_type.clone(),
            size: meta.size,
            last_modified: Some(meta.last_modified),
            source: FileSource::User,
            tool_call_id: None,
            incomplete: false,
        },
    );

    harness.backend.queue_tools(tool_call_response(&[(
        "call_1",
        "srv_analyze",
        r#"{"filename":"report.pdf"}"#,
    )]));
    harness.backend.queue_plain("The report has 3 pages.");

    let frame = chat_frame(json!({
        "content": "analyze report.pdf",
        "model": "m1",
        "selected_tools": ["srv_analyze"],
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;

    let args = harness.tools.dispatched_args(0);
    let rewritten = args["filename"].as_str().unwrap();
    assert!(rewritten.starts_with(&format!("/api/files/download/{}", meta.key)));
    assert!(rewritten.contains("?token="));
    assert_eq!(args["original_filename"], "report.pdf");
    assert_eq!(args["file_url"], args["filename"]);
    // Schema declares no username, so none is injected.
    assert!(args.get("username").is_none());

    let frames = harness.frames();
    let types = frame_types(&frames);
    assert!(types.contains(&"tool_start".to_string()));
    assert!(types.contains(&"tool_complete".to_string()));
    assert_eq!(types.last().unwrap(), "chat_response");
    assert_eq!(frames.last().unwrap()["message"], "The report has 3 pages.");
}

#[tokio::test]
async fn tool_artifact_flows_into_storage_and_canvas() {
    let artifact_payload = json!({
        "results": {"ok": true},
        "artifacts": [{
            "name": "out.png",
            "mime": "image/png",
            "size": 123,
            "b64": STANDARD.encode(b"png-bytes"),
        }],
        "display": {"open_canvas": true, "primary_file": "out.png"},
    })
    .to_string();
    let tools = StaticTools::new().with_tool(
        "plot_render",
        json!({"type": "object", "properties": {}}),
        Ok(artifact_payload),
    );
    let mut harness = harness_with(tools, None);
    let mut session = Session::new("a@b.c");

    harness
        .backend
        .queue_tools(tool_call_response(&[("call_1", "plot_render", "{}")]));
    harness.backend.queue_plain("Rendered your plot.");

    let frame = chat_frame(json!({
        "content": "plot it",
        "model": "m1",
        "selected_tools": ["plot_render"],
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;

    let frames = harness.frames();
    let types = frame_types(&frames);
    let pos = |t: &str| types.iter().position(|x| x == t).unwrap();
    assert!(pos("tool_start") < pos("tool_complete"));
    assert!(pos("tool_complete") < pos("intermediate_update"));

    let updates: Vec<&serde_json::Value> = frames
        .iter()
        .filter(|f| f["type"] == "intermediate_update")
        .collect();
    assert_eq!(updates[0]["update_type"], "files_update");
    assert_eq!(updates[0]["data"]["files"][0]["filename"], "out.png");
    assert_eq!(updates[1]["update_type"], "canvas_files");
    assert_eq!(updates[1]["data"]["files"][0]["filename"], "out.png");

    let reference = &session.files["out.png"];
    assert!(reference.key.contains("/generated/"));
    assert_eq!(reference.tool_call_id.as_deref(), Some("call_1"));

    let stored = harness
        .store
        .get("a@b.c", &reference.key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(STANDARD.decode(stored.content_base64).unwrap(), b"png-bytes");
}

#[tokio::test]
async fn failing_tool_reports_error_event_and_still_synthesizes() {
    let tools = StaticTools::new().with_tool(
        "srv_flaky",
        json!({"type": "object", "properties": {}}),
        Err("connection refused".to_string()),
    );
    let mut harness = harness_with(tools, None);
    let mut session = Session::new("a@b.c");

    harness
        .backend
        .queue_tools(tool_call_response(&[("call_1", "srv_flaky", "{}")]));
    harness.backend.queue_plain("The tool failed, sorry.");

    let frame = chat_frame(json!({
        "content": "try it",
        "model": "m1",
        "selected_tools": ["srv_flaky"],
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;

    let frames = harness.frames();
    let types = frame_types(&frames);
    assert!(types.contains(&"tool_start".to_string()));
    assert!(types.contains(&"tool_error".to_string()));
    assert!(!types.contains(&"tool_complete".to_string()));
    assert_eq!(types.last().unwrap(), "chat_response");

    // Durable history keeps the user/assistant pair; the tool exchange
    // lives in the turn's prompt snapshot.
    assert_eq!(session.history.count_role(Role::User), 1);
    assert_eq!(session.history.count_role(Role::Assistant), 1);
}

#[tokio::test]
async fn canvas_only_turn_skips_synthesis() {
    let mut harness = harness_with(StaticTools::new(), None);
    let mut session = Session::new("a@b.c");

    harness.backend.queue_tools(tool_call_response(&[(
        "call_1",
        "canvas_canvas",
        r##"{"content":"# Report\nbody"}"##,
    )]));

    let frame = chat_frame(json!({
        "content": "show a report",
        "model": "m1",
        "selected_tools": ["canvas_canvas"],
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;

    let frames = harness.frames();
    let types = frame_types(&frames);
    // One tool-enabled call, no synthesis call afterwards.
    assert_eq!(harness.backend.calls(), 1);
    assert!(types.iter().any(|t| t == "intermediate_update"));
    let canvas = frames
        .iter()
        .find(|f| f["type"] == "intermediate_update")
        .unwrap();
    assert_eq!(canvas["update_type"], "canvas_content");
    assert!(canvas["data"]["content"].as_str().unwrap().contains("# Report"));
    assert_eq!(frames.last().unwrap()["message"], "Content displayed in canvas.");
}

#[tokio::test]
async fn file_ingestion_emits_update_and_manifest_reaches_session() {
    let mut harness = harness();
    let mut session = Session::new("a@b.c");
    harness.backend.queue_plain("got your file");

    let frame = chat_frame(json!({
        "content": "here is a file",
        "model": "m1",
        "files": { "notes.txt": STANDARD.encode(b"remember the milk") },
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;

    let frames = harness.frames();
    let types = frame_types(&frames);
    assert_eq!(types[0], "intermediate_update");
    assert_eq!(frames[0]["update_type"], "files_update");
    assert_eq!(types.last().unwrap(), "chat_response");

    let reference = &session.files["notes.txt"];
    assert!(reference.key.starts_with("users/a@b.c/uploads/"));
    assert_eq!(reference.source, FileSource::User);
}

#[tokio::test]
async fn selected_prompts_replace_system_prompt_on_first_turn() {
    let tools = StaticTools::new().with_prompt("prompts_pirate", "Answer like a pirate.");
    let mut harness = harness_with(tools, None);
    let mut session = Session::new("a@b.c");
    harness.backend.queue_plain("arr");

    let frame = chat_frame(json!({
        "content": "hello",
        "model": "m1",
        "selected_prompts": ["prompts_pirate"],
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;
    harness.frames();

    let first = session.history.first().unwrap();
    assert!(matches!(first.role, Role::System));
    assert_eq!(first.content, "Answer like a pirate.");

    // Second turn: prompts no longer rewrite the system message.
    harness.backend.queue_plain("arr again");
    let frame = chat_frame(json!({
        "content": "more",
        "model": "m1",
        "selected_prompts": ["prompts_pirate"],
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;
    assert_eq!(session.history.count_role(Role::System), 1);
}

#[tokio::test]
async fn download_file_frame_round_trips_stored_bytes() {
    let mut harness = harness();
    let mut session = Session::new("a@b.c");
    harness.backend.queue_plain("ok");

    let frame = chat_frame(json!({
        "content": "upload",
        "model": "m1",
        "files": { "data.csv": STANDARD.encode(b"a,b\n1,2") },
    }));
    harness
        .pipeline
        .handle_frame(&mut session, frame, &harness.updates)
        .await;
    harness.frames();

    harness
        .pipeline
        .handle_frame(
            &mut session,
            ClientFrame::DownloadFile {
                filename: "data.csv".to_string(),
            },
            &harness.updates,
        )
        .await;
    let frames = harness.frames();
    assert_eq!(frame_types(&frames), vec!["file_download"]);
    assert_eq!(
        STANDARD
            .decode(frames[0]["content_base64"].as_str().unwrap())
            .unwrap(),
        b"a,b\n1,2"
    );

    // Unknown names produce an error frame, session stays usable.
    harness
        .pipeline
        .handle_frame(
            &mut session,
            ClientFrame::DownloadFile {
                filename: "ghost.txt".to_string(),
            },
            &harness.updates,
        )
        .await;
    assert_eq!(frame_types(&harness.frames()), vec!["error"]);
}
