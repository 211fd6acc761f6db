use call_types::{TaskName, TaskPreconditions};
use serde_json::json;

use crate::registry::ValidationError;
use crate::tasks::builder::parse_instruction;
use crate::tasks::TaskError;

use super::support::Harness;

#[test]
fn test_parse_instruction_envelopes() {
    let (name, data) = parse_instruction(&json!({"say": {"text": "hi"}})).unwrap();
    assert_eq!(name, "say");
    assert_eq!(data, json!({"text": "hi"}));

    let (name, data) = parse_instruction(&json!({"verb": "hangup", "headers": {}})).unwrap();
    assert_eq!(name, "hangup");
    assert_eq!(data, json!({"headers": {}}));

    for malformed in [json!([]), json!({}), json!({"say": {}, "play": {}}), json!({"verb": 7})] {
        assert!(matches!(
            parse_instruction(&malformed),
            Err(TaskError::MalformedInstruction(_))
        ));
    }
}

#[tokio::test]
async fn test_bot_instruction_builds_bot_task() {
    let harness = Harness::new();
    let task = harness
        .builder
        .make_task(&json!({"cognigy": {
            "url": "wss://bot.example.com",
            "token": "secret",
            "prompt": "How can I help?",
            "actionHook": "/action",
            "data": {"user": {"noInputRetries": 1}}
        }}))
        .unwrap();

    assert_eq!(task.name(), TaskName::Cognigy);
    assert_eq!(task.preconditions(), TaskPreconditions::Endpoint);
    assert!(!task.killed());
    assert!(harness.steps.made_names().is_empty());
}

#[tokio::test]
async fn test_step_instructions_go_to_factory() {
    let harness = Harness::new();
    let task = harness
        .builder
        .make_task(&json!({"verb": "say", "text": "Hello"}))
        .unwrap();
    assert_eq!(task.name(), TaskName::Say);
    assert_eq!(harness.steps.made_names(), vec![TaskName::Say]);
}

#[tokio::test]
async fn test_invalid_instruction_never_reaches_factory() {
    let harness = Harness::new();

    let err = harness
        .builder
        .make_task(&json!({"cognigy": {"url": "wss://bot.example.com"}}))
        .err()
        .expect("instruction should be rejected");
    assert!(matches!(
        err,
        TaskError::Validation(ValidationError::MissingRequired { .. })
    ));

    let err = harness
        .builder
        .make_task(&json!({"say": {"text": "hi", "volume": 11}}))
        .err()
        .expect("instruction should be rejected");
    assert!(matches!(
        err,
        TaskError::Validation(ValidationError::UnknownProperty { .. })
    ));

    let err = harness
        .builder
        .make_task(&json!({"dial": {"target": []}}))
        .err()
        .expect("instruction should be rejected");
    assert!(matches!(
        err,
        TaskError::Validation(ValidationError::UnknownInstruction(_))
    ));

    assert!(harness.steps.made_names().is_empty());
}

#[tokio::test]
async fn test_registered_non_task_is_rejected() {
    let harness = Harness::new();
    let err = harness
        .builder
        .make_task(&json!({"synthesizer": {"vendor": "google"}}))
        .err()
        .expect("instruction should be rejected");
    assert!(matches!(err, TaskError::NotATask(name) if name == "synthesizer"));
}

#[tokio::test]
async fn test_build_application_validates_before_constructing() {
    let harness = Harness::new();
    let result = harness.builder.build_application(&[
        json!({"say": {"text": "one"}}),
        json!({"hangup": {"headers": "not-an-object"}}),
        json!({"say": {"text": "three"}}),
    ]);
    assert!(matches!(
        result,
        Err(TaskError::Validation(ValidationError::InvalidType { .. }))
    ));
    // Nothing is constructed for an application that fails validation
    assert!(harness.steps.made_names().is_empty());

    let tasks = harness
        .builder
        .build_application(&[
            json!({"say": {"text": "one"}}),
            json!({"sip:refer": {"referTo": "+15550001"}}),
        ])
        .unwrap();
    assert_eq!(tasks.len(), 2);
}
