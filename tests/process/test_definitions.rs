use procflow::core::process::{
    ActivityKind, CopySource, InstanceStatus, LoopBound, ProcessDefinition, ProcessEngine,
    Variables, WaitDuration,
};
use procflow::core::types::ErrorCategory;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

const ORDER_YAML: &str = r#"
id: order
name: Order fulfilment
version: "2.1"
rootActivityId: main
compensationHandler: refund
variables:
  - { name: quantity, default: 3 }
activities:
  - { id: main, type: sequence, children: [count, ship] }
  - id: count
    type: forEach
    counterVariable: i
    startValue: 1
    endValue: quantity
    children: [tick]
  - id: tick
    type: assign
    copies:
      - { from: { type: expression, expression: "ticks + 1" }, to: ticks }
  - id: ship
    type: wait
    duration: 5
  - { id: refund, type: empty }
"#;

const ORDER_JSON: &str = r#"{
  "id": "order",
  "name": "Order fulfilment",
  "rootActivityId": "main",
  "variables": [{ "name": "ticks", "default": 0 }],
  "activities": [
    { "id": "main", "type": "sequence", "children": ["bump"] },
    {
      "id": "bump",
      "type": "assign",
      "copies": [{ "from": { "type": "variable", "path": "ticks" }, "to": "copied" }]
    }
  ]
}"#;

#[test]
fn yaml_definition_keeps_declaration_order_and_fields() {
    let definition = ProcessDefinition::from_yaml_str(ORDER_YAML).unwrap();
    assert_eq!(definition.version, "2.1");
    assert!(definition.enabled);
    assert_eq!(definition.compensation_handler.as_deref(), Some("refund"));
    let ids: Vec<&str> = definition.activities.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["main", "count", "tick", "ship", "refund"]);

    let count = definition.activity("count").unwrap();
    assert_eq!(count.kind, ActivityKind::ForEach);
    assert_eq!(count.start_value, Some(LoopBound::Fixed(1)));
    assert_eq!(
        count.end_value,
        Some(LoopBound::Expression("quantity".to_string()))
    );
    assert_eq!(
        definition.activity("ship").unwrap().duration,
        Some(WaitDuration::Millis(5))
    );
    assert!(definition.dangling_references().is_empty());
}

#[test]
fn loads_json_and_yaml_files_by_extension() {
    let dir = TempDir::new().unwrap();
    let json_path = dir.path().join("order.json");
    let yaml_path = dir.path().join("order.yaml");
    fs::write(&json_path, ORDER_JSON).unwrap();
    fs::write(&yaml_path, ORDER_YAML).unwrap();

    let from_json = ProcessDefinition::load_from_file(&json_path).unwrap();
    assert_eq!(from_json.activities.len(), 2);
    assert_eq!(
        from_json.activity("bump").unwrap().copies[0].from,
        CopySource::Variable {
            path: "ticks".to_string()
        }
    );

    let from_yaml = ProcessDefinition::load_from_file(&yaml_path).unwrap();
    assert_eq!(from_yaml.id, "order");
    assert_eq!(from_yaml.activities.len(), 5);
}

#[test]
fn file_errors_carry_the_path() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.yaml");
    let err = ProcessDefinition::load_from_file(&missing).unwrap_err();
    assert_eq!(err.category, ErrorCategory::IoError);

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{\"id\": \"x\"").unwrap();
    let err = ProcessDefinition::load_from_file(&broken).unwrap_err();
    assert_eq!(err.code, "PFX-DEF-001");
    assert_eq!(err.category, ErrorCategory::DefinitionError);
    assert!(err.to_string().contains("broken.json"));
}

#[test]
fn missing_required_fields_fail_to_parse() {
    let err = ProcessDefinition::from_yaml_str("id: lonely\nname: Lonely\n").unwrap_err();
    assert_eq!(err.code, "PFX-DEF-001");
}

#[test]
fn unknown_activity_type_parses_as_unsupported() {
    let yaml = r#"
id: odd
name: Odd
rootActivityId: main
activities:
  - { id: main, type: teleport }
"#;
    let definition = ProcessDefinition::from_yaml_str(yaml).unwrap();
    assert_eq!(
        definition.activity("main").unwrap().kind,
        ActivityKind::Unsupported
    );
}

#[test]
fn dangling_references_name_field_and_target() {
    let yaml = r#"
id: broken
name: Broken references
rootActivityId: start
compensationHandler: undo
faultHandlers:
  - { faultName: "*", activity: recover }
activities:
  - { id: main, type: sequence, children: [a, ghost] }
  - id: a
    type: if
    condition: "x == 1"
    children: [main]
    elseActivity: nowhere
  - id: s
    type: scope
    children: [a]
    compensationHandler: undo_s
"#;
    let definition = ProcessDefinition::from_yaml_str(yaml).unwrap();
    let dangling: Vec<String> = definition
        .dangling_references()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        dangling,
        vec![
            "process rootActivityId -> start",
            "process faultHandlers -> recover",
            "process compensationHandler -> undo",
            "activity main children -> ghost",
            "activity a elseActivity -> nowhere",
            "activity s compensationHandler -> undo_s",
        ]
    );
}

#[tokio::test]
async fn deployment_accepts_definitions_with_dangling_references() {
    let yaml = r#"
id: lazy
name: Lazy resolution
rootActivityId: main
activities:
  - { id: main, type: if, condition: "flag == true", children: [ghost], elseActivity: fine }
  - id: fine
    type: assign
    copies:
      - { from: { type: literal, value: took-else }, to: branch }
"#;
    let engine = ProcessEngine::default();
    engine
        .deploy_process(ProcessDefinition::from_yaml_str(yaml).unwrap())
        .await
        .unwrap();

    let mut input = Variables::new();
    input.insert("flag".to_string(), json!(false));
    let instance = engine.start_process("lazy", input, "tests").await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.variables["branch"], json!("took-else"));

    let mut input = Variables::new();
    input.insert("flag".to_string(), json!(true));
    let instance = engine.start_process("lazy", input, "tests").await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Faulted);
    assert_eq!(instance.fault.unwrap().name, "ChildActivityNotFound");
}

#[test]
fn definitions_serialize_back_to_the_wire_shape() {
    let definition = ProcessDefinition::from_json_str(ORDER_JSON).unwrap();
    let value = serde_json::to_value(&definition).unwrap();
    assert_eq!(value["rootActivityId"], json!("main"));
    assert_eq!(value["activities"][1]["type"], json!("assign"));
    assert_eq!(value["activities"].as_array().unwrap().len(), 2);
    assert!(value.get("faultHandlers").is_none());
}
