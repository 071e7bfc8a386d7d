// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end executor flows: start → interaction → response → completion,
//! retry with injected conversation history, and jump branching.

use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use braid::db::{Database, VersionRepository};
use braid::llm::ScriptedLlmClient;
use braid::models::{EventType, InteractionResponseData, RunStatus, SourceType};
use braid::{EngineConfig, StartOptions, WorkflowProcessor};

async fn setup(llm_responses: Vec<&str>) -> (tempfile::TempDir, WorkflowProcessor, Arc<ScriptedLlmClient>) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db = Database::open(temp_dir.path().join("db").to_str().unwrap())
        .await
        .expect("DB open failed");
    let llm = ScriptedLlmClient::new(llm_responses.into_iter().map(String::from).collect());
    let processor =
        WorkflowProcessor::new(db, EngineConfig::default()).with_llm(llm.clone());
    (temp_dir, processor, llm)
}

async fn store_version(processor: &WorkflowProcessor, content: &Value, user: &str) -> String {
    let resolved = serde_json::from_value(content.clone()).expect("invalid workflow json");
    let hash = VersionRepository::content_hash(content);
    let template_name = content["workflow_id"].as_str().unwrap().to_string();
    let (version_id, _, _) = processor
        .db
        .versions
        .process_and_store_workflow_versions(
            &resolved,
            &hash,
            SourceType::Json,
            &template_name,
            user,
            &[],
        )
        .await
        .expect("version store failed");
    version_id
}

fn options(name: &str) -> StartOptions {
    StartOptions {
        project_name: "proj".to_string(),
        workflow_template_name: name.to_string(),
        user_id: "user1".to_string(),
        ..Default::default()
    }
}

fn selection_response(id: &str) -> InteractionResponseData {
    serde_json::from_value(json!({
        "selected_options": [{"id": id, "label": id}]
    }))
    .unwrap()
}

fn two_step_workflow() -> Value {
    json!({
        "workflow_id": "demo",
        "steps": [
            {
                "step_id": "step1",
                "name": "Step {step_number}: Seed",
                "modules": [{
                    "module_id": "data.transform",
                    "name": "moduleA",
                    "inputs": {"greeting": "hi"},
                    "outputs_to_state": {"greeting": "g"}
                }]
            },
            {
                "step_id": "step2",
                "modules": [{
                    "module_id": "user.select",
                    "name": "moduleB",
                    "inputs": {"prompt": "pick one", "options": ["a", "b"]},
                    "outputs_to_state": {"selected": "selected"},
                    "addons": [{
                        "addon_id": "style_hints",
                        "inputs": {"greeting": "{{ g }}"}
                    }]
                }]
            }
        ]
    })
}

#[tokio::test]
async fn test_start_interaction_response_complete() {
    let (_tmp, processor, _) = setup(vec![]).await;
    let version_id = store_version(&processor, &two_step_workflow(), "user1").await;

    // Start runs step1 and suspends on moduleB
    let response = processor
        .start_workflow(&version_id, options("demo"))
        .await
        .unwrap();
    assert_eq!(response.status, RunStatus::AwaitingInput);
    let run_id = response.workflow_run_id.clone();
    let request = response.interaction_request.expect("interaction expected");
    assert_eq!(request["options"].as_array().unwrap().len(), 2);
    let interaction_id = request["interaction_id"].as_str().unwrap().to_string();

    // The resolved inputs travel inside the request payload
    assert_eq!(request["_resolved_inputs"]["prompt"], "pick one");
    assert_eq!(request["module_id"], "user.select");

    // The run row caches the derived pointers
    let run = processor.db.runs.get_workflow(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::AwaitingInput);
    assert_eq!(run.current_step.as_deref(), Some("step2"));
    assert_eq!(run.current_step_name.as_deref(), Some("step2"));
    assert_eq!(run.current_module.as_deref(), Some("moduleB"));

    // Respond with selection "b" - the run completes
    let done = processor
        .respond(
            &run_id,
            &interaction_id,
            &selection_response("b"),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    let final_state = done.result.unwrap();
    assert_eq!(final_state["g"], "hi");
    assert_eq!(final_state["selected"], "b");

    // Event log shape
    let events = processor.get_events(&run_id, None).await.unwrap();
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::WorkflowCreated,
            EventType::StepStarted,
            EventType::ModuleStarted,
            EventType::ModuleCompleted,
            EventType::StepCompleted,
            EventType::StepStarted,
            EventType::ModuleStarted,
            EventType::InteractionRequested,
            EventType::InteractionResponse,
            EventType::ModuleCompleted,
            EventType::StepCompleted,
            EventType::WorkflowCompleted,
        ]
    );

    // module_completed for moduleB carries the projection
    let module_b_completed = events
        .iter()
        .find(|e| {
            e.event_type == EventType::ModuleCompleted
                && e.module_name.as_deref() == Some("moduleB")
        })
        .unwrap();
    assert_eq!(module_b_completed.data["_state_mapped"]["selected"], "b");

    // Derivations are deterministic: two calls agree
    let state_a = processor.get_state(&run_id).await.unwrap();
    let state_b = processor.get_state(&run_id).await.unwrap();
    assert_eq!(state_a, state_b);

    let position = processor
        .db
        .state
        .get_workflow_position(&run_id, None)
        .await
        .unwrap();
    assert_eq!(position.completed_steps, vec!["step1", "step2"]);
    assert!(position.pending_interaction.is_none());

    // Interaction history pairs request with response
    let history = processor.get_interaction_history(&run_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].interaction_id, interaction_id);
    assert_eq!(history[0].module_name.as_deref(), Some("moduleB"));

    // Status summary reflects the terminal run
    let status = processor.get_status(&run_id).await.unwrap().unwrap();
    assert_eq!(status["status"], "completed");
    assert_eq!(status["completed_steps"], json!(["step1", "step2"]));
    assert_eq!(status["pending_interaction"], false);

    // Hierarchical view: steps -> modules -> event-type nodes
    let state_v2 = processor.get_state_v2(&run_id).await.unwrap();
    let steps = state_v2["steps"].as_object().unwrap();
    assert_eq!(steps["_metadata"]["node_type"], "steps_container");
    let module_b = &steps["step2"]["moduleB"];
    assert_eq!(module_b["_metadata"]["node_type"], "module");
    assert!(module_b.get("interaction_requested").is_some());
    assert!(module_b.get("interaction_response").is_some());
    assert_eq!(module_b["module_completed"]["_state_mapped"]["selected"], "b");
    assert_eq!(state_v2["state_mapped"]["g"], "hi");
}

#[tokio::test]
async fn test_branch_from_interaction_request_reenters_interaction() {
    let (_tmp, processor, _) = setup(vec![]).await;
    let version_id = store_version(&processor, &two_step_workflow(), "user1").await;

    let response = processor
        .start_workflow(&version_id, options("demo"))
        .await
        .unwrap();
    let run_id = response.workflow_run_id.clone();
    let interaction_id = response.interaction_request.unwrap()["interaction_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Answer and finish the run
    let done = processor
        .respond(
            &run_id,
            &interaction_id,
            &selection_response("a"),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Completed);

    // Fork back to the exact interaction state: the request is the
    // inclusive cutoff, so it is pending again without re-running upstream
    let new_branch = processor
        .db
        .state
        .branch_from_interaction_request(&run_id, &interaction_id)
        .await
        .unwrap();

    let current = processor
        .db
        .state
        .get_current_branch_id(&run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current, new_branch);

    let position = processor
        .db
        .state
        .get_workflow_position(&run_id, None)
        .await
        .unwrap();
    let pending = position.pending_interaction.expect("interaction pending again");
    assert_eq!(pending["interaction_id"].as_str().unwrap(), interaction_id);

    // Upstream state survives; the answer does not
    let state = processor.get_state(&run_id).await.unwrap();
    assert_eq!(state["g"], "hi");
    assert!(!state.contains_key("selected"));

    // Unknown interaction ids are rejected
    let err = processor
        .db
        .state
        .branch_from_interaction_request(&run_id, "int_missing")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_step_name_placeholder_is_rendered() {
    let (_tmp, processor, _) = setup(vec![]).await;
    let workflow = json!({
        "workflow_id": "named",
        "steps": [{
            "step_id": "step1",
            "name": "Step {step_number}: Pick",
            "modules": [{
                "module_id": "user.select",
                "name": "moduleB",
                "inputs": {"prompt": "pick", "options": ["a"]}
            }]
        }]
    });
    let version_id = store_version(&processor, &workflow, "user1").await;

    let response = processor
        .start_workflow(&version_id, options("named"))
        .await
        .unwrap();
    assert_eq!(response.status, RunStatus::AwaitingInput);

    let run = processor
        .db
        .runs
        .get_workflow(&response.workflow_run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.current_step_name.as_deref(), Some("Step 1: Pick"));
}

fn retry_workflow() -> Value {
    json!({
        "workflow_id": "retry-demo",
        "steps": [
            {
                "step_id": "step1",
                "modules": [{
                    "module_id": "api.llm_call",
                    "name": "moduleGen",
                    "inputs": {"prompt": "write a draft"},
                    "outputs_to_state": {"response": "draft"}
                }]
            },
            {
                "step_id": "step2",
                "modules": [{
                    "module_id": "user.select",
                    "name": "moduleB",
                    "inputs": {"prompt": "accept?", "options": ["accept"]},
                    "outputs_to_state": {"selected": "decision"},
                    "retryable": {
                        "options": [{
                            "mode": "retry",
                            "id": "retry",
                            "target_module": "moduleGen",
                            "feedback": {"default_message": "please revise"}
                        }]
                    }
                }]
            }
        ]
    })
}

#[tokio::test]
async fn test_retry_preserves_conversation_history() {
    let (_tmp, processor, llm) = setup(vec!["first draft", "second draft"]).await;
    let version_id = store_version(&processor, &retry_workflow(), "user1").await;

    let response = processor
        .start_workflow(&version_id, options("retry-demo"))
        .await
        .unwrap();
    assert_eq!(response.status, RunStatus::AwaitingInput);
    let run_id = response.workflow_run_id.clone();
    let interaction_id = response.interaction_request.unwrap()["interaction_id"]
        .as_str()
        .unwrap()
        .to_string();

    let state = processor.get_state(&run_id).await.unwrap();
    assert_eq!(state["draft"], "first draft");

    // Free-form feedback with no selection means retry
    let feedback: InteractionResponseData =
        serde_json::from_value(json!({"custom_value": "try again"})).unwrap();
    let retried = processor
        .respond(&run_id, &interaction_id, &feedback, None, CancellationToken::new())
        .await
        .unwrap();
    // Retry re-enters at moduleGen and stops at the step boundary
    assert_eq!(retried.status, RunStatus::Processing);

    // A retry_requested event landed on the current branch
    let events = processor.get_events(&run_id, None).await.unwrap();
    let retry_event = events
        .iter()
        .find(|e| e.event_type == EventType::RetryRequested)
        .expect("retry event expected");
    assert_eq!(retry_event.data["target_module"], "moduleGen");
    assert_eq!(retry_event.data["feedback"], "try again");

    // The second LLM call saw the prior output and the feedback
    let requests = llm.seen_requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1];
    let contents: Vec<&str> = second.messages.iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&"first draft"));
    assert!(contents.contains(&"FEEDBACK FROM USER: try again"));
    // Strict alternation: assistant turn before the user feedback turn
    let assistant_index = contents.iter().position(|c| *c == "first draft").unwrap();
    let feedback_index = contents
        .iter()
        .position(|c| *c == "FEEDBACK FROM USER: try again")
        .unwrap();
    assert!(assistant_index < feedback_index);

    // Resume presents moduleB again with the regenerated draft
    let resumed = processor
        .resume_workflow(&run_id, None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::AwaitingInput);
    let state = processor.get_state(&run_id).await.unwrap();
    assert_eq!(state["draft"], "second draft");

    // Finish the run
    let interaction_id = resumed.interaction_request.unwrap()["interaction_id"]
        .as_str()
        .unwrap()
        .to_string();
    let done = processor
        .respond(
            &run_id,
            &interaction_id,
            &selection_response("accept"),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_jump_creates_branch_and_discards_later_state() {
    let (_tmp, processor, _) = setup(vec![]).await;
    let version_id = store_version(&processor, &two_step_workflow(), "user1").await;

    // Run to completion first
    let response = processor
        .start_workflow(&version_id, options("demo"))
        .await
        .unwrap();
    let run_id = response.workflow_run_id.clone();
    let interaction_id = response.interaction_request.unwrap()["interaction_id"]
        .as_str()
        .unwrap()
        .to_string();
    let done = processor
        .respond(
            &run_id,
            &interaction_id,
            &selection_response("b"),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Completed);

    let branch_before = processor
        .db
        .state
        .get_current_branch_id(&run_id)
        .await
        .unwrap()
        .unwrap();

    // Jump back to moduleB
    let jumped = processor.jump(&run_id, "step2", "moduleB").await.unwrap();
    assert_eq!(jumped.status, RunStatus::AwaitingInput);

    let branch_after = processor
        .db
        .state
        .get_current_branch_id(&run_id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(branch_before, branch_after, "jump must fork a new branch");

    // The new branch cuts off just before moduleB's first event
    let lineage = processor
        .db
        .branches
        .get_branch_lineage(&branch_after)
        .await
        .unwrap();
    assert!(lineage.len() >= 2);
    let (_, cutoff) = &lineage[lineage.len() - 2];
    let all_events = processor.get_events(&run_id, None).await.unwrap();
    let first_module_b_event = all_events
        .iter()
        .find(|e| {
            e.step_id.as_deref() == Some("step2") && e.module_name.as_deref() == Some("moduleB")
        })
        .unwrap();
    let expected_cutoff = all_events
        .iter()
        .take_while(|e| e.event_id < first_module_b_event.event_id)
        .last()
        .unwrap();
    assert_eq!(cutoff.as_deref(), Some(expected_cutoff.event_id.as_str()));

    // Derived state on the new branch: upstream survives, selection is gone
    let state = processor.get_state(&run_id).await.unwrap();
    assert_eq!(state["g"], "hi");
    assert!(!state.contains_key("selected"));

    // The jump_requested event lives on the new branch
    let lineage_events = processor
        .db
        .state
        .get_lineage_events(&run_id, None, Some(&[EventType::JumpRequested]))
        .await
        .unwrap();
    assert_eq!(lineage_events.len(), 1);
    assert_eq!(lineage_events[0].branch_id, branch_after);
    assert_eq!(lineage_events[0].data["target_module"], "moduleB");

    // Events on the parent branch past the cutoff are absent from lineage
    let lineage_all = processor
        .db
        .state
        .get_lineage_events(&run_id, None, None)
        .await
        .unwrap();
    assert!(lineage_all
        .iter()
        .all(|e| e.event_type != EventType::WorkflowCompleted));

    // Position on the new branch points at step2, module 0
    // (the second interaction_requested on the new branch is pending)
    let position = processor
        .db
        .state
        .get_workflow_position(&run_id, None)
        .await
        .unwrap();
    assert_eq!(position.current_step.as_deref(), Some("step2"));
    assert!(position.pending_interaction.is_some());
    assert_eq!(position.completed_steps, vec!["step1"]);
}

#[tokio::test]
async fn test_start_is_idempotent_for_pending_run() {
    let (_tmp, processor, _) = setup(vec![]).await;
    let version_id = store_version(&processor, &two_step_workflow(), "user1").await;

    let first = processor
        .start_workflow(&version_id, options("demo"))
        .await
        .unwrap();
    let second = processor
        .start_workflow(&version_id, options("demo"))
        .await
        .unwrap();

    // Same run, same pending interaction
    assert_eq!(first.workflow_run_id, second.workflow_run_id);
    assert_eq!(second.status, RunStatus::AwaitingInput);
    assert_eq!(
        first.interaction_request.unwrap()["interaction_id"],
        second.interaction_request.unwrap()["interaction_id"]
    );
}

#[tokio::test]
async fn test_force_new_resets_history() {
    let (_tmp, processor, _) = setup(vec![]).await;
    let version_id = store_version(&processor, &two_step_workflow(), "user1").await;

    let first = processor
        .start_workflow(&version_id, options("demo"))
        .await
        .unwrap();
    let run_id = first.workflow_run_id.clone();
    let events_before = processor.get_events(&run_id, None).await.unwrap();
    assert!(events_before.len() > 1);

    let mut opts = options("demo");
    opts.force_new = true;
    let restarted = processor.start_workflow(&version_id, opts).await.unwrap();
    assert_eq!(restarted.workflow_run_id, run_id, "run id survives a reset");

    let events = processor.get_events(&run_id, None).await.unwrap();
    let created = events
        .iter()
        .find(|e| e.event_type == EventType::WorkflowCreated)
        .unwrap();
    assert_eq!(created.data["reset"], true);
    // Fresh history: one created event, then step1 execution anew
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == EventType::WorkflowCreated)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_module_error_halts_run() {
    // api.llm_call with no LLM client configured fails at execution time
    let workflow = json!({
        "workflow_id": "failing",
        "steps": [{
            "step_id": "step1",
            "modules": [{
                "module_id": "api.llm_call",
                "name": "moduleFail",
                "inputs": {"prompt": "x"}
            }]
        }]
    });
    let temp_dir = tempdir().unwrap();
    let db = Database::open(temp_dir.path().join("db").to_str().unwrap())
        .await
        .unwrap();
    // No .with_llm here
    let bare = WorkflowProcessor::new(db, EngineConfig::default());

    let version_id = store_version(&bare, &workflow, "user1").await;

    let response = bare
        .start_workflow(&version_id, options("failing"))
        .await
        .unwrap();
    assert_eq!(response.status, RunStatus::Error);
    assert!(response.error.unwrap().contains("api.llm_call"));

    let run_id = response.workflow_run_id;
    let run = bare.db.runs.get_workflow(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Error);

    let events = bare.get_events(&run_id, None).await.unwrap();
    let error_event = events
        .iter()
        .find(|e| e.event_type == EventType::ModuleError)
        .expect("module_error event expected");
    assert!(error_event.data["error"].as_str().is_some());
    // No step_completed after the failure
    assert!(!events.iter().any(|e| e.event_type == EventType::StepCompleted));
}
