use procflow::core::process::{
    ActivityStatus, InstanceStatus, ProcessDefinition, ProcessEngine, ProcessInstance, Variables,
};
use serde_json::{json, Value};

fn vars(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        _ => Variables::new(),
    }
}

async fn run(yaml: &str, input: Value) -> ProcessInstance {
    let engine = ProcessEngine::default();
    let definition = ProcessDefinition::from_yaml_str(yaml).expect("valid definition");
    let process_id = definition.id.clone();
    engine.deploy_process(definition).await.unwrap();
    engine
        .start_process(&process_id, vars(input), "tests")
        .await
        .unwrap()
}

const PAYMENT_SCOPE: &str = r#"
id: payment
name: Payment with recovery
rootActivityId: main
activities:
  - { id: main, type: sequence, children: [pay, after] }
  - id: pay
    type: scope
    children: [debit, unreachable]
    faultHandlers:
      - { faultName: InsufficientFunds, faultVariable: lastError, activity: recover }
  - id: debit
    type: throw
    faultName: InsufficientFunds
    faultVariable: account
  - { id: unreachable, type: empty }
  - id: recover
    type: assign
    copies:
      - { from: { type: literal, value: declined }, to: outcome }
  - { id: after, type: empty }
"#;

#[tokio::test]
async fn scope_handler_catches_named_fault() {
    let instance = run(PAYMENT_SCOPE, json!({"account": {"balance": 3}})).await;
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert!(instance.fault.is_none());
    assert_eq!(
        instance.activity_statuses.get("pay"),
        Some(&ActivityStatus::Completed)
    );
    assert_eq!(
        instance.activity_statuses.get("debit"),
        Some(&ActivityStatus::Faulted)
    );
    assert_eq!(instance.variables["outcome"], json!("declined"));
    assert_eq!(instance.variables["lastError"]["name"], json!("InsufficientFunds"));
    assert_eq!(
        instance.variables["lastError"]["data"],
        json!({"balance": 3})
    );
    assert_eq!(
        instance.logged_activity_ids(),
        vec!["debit", "recover", "pay", "after", "main"]
    );
}

#[tokio::test]
async fn exact_handler_wins_over_wildcard() {
    let yaml = PAYMENT_SCOPE.replace(
        "      - { faultName: InsufficientFunds, faultVariable: lastError, activity: recover }",
        "      - { faultName: \"*\", activity: after }\n      - { faultName: InsufficientFunds, activity: recover }",
    );
    let instance = run(&yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.variables["outcome"], json!("declined"));
}

#[tokio::test]
async fn wildcard_catches_any_fault() {
    let yaml = PAYMENT_SCOPE.replace("faultName: InsufficientFunds,", "faultName: \"*\",");
    let instance = run(&yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.variables["lastError"]["name"], json!("InsufficientFunds"));
    assert_eq!(instance.variables["lastError"]["data"], Value::Null);
}

#[tokio::test]
async fn unmatched_fault_escapes_and_faults_the_instance() {
    let yaml = PAYMENT_SCOPE.replace("faultName: InsufficientFunds,", "faultName: Timeout,");
    let instance = run(&yaml, json!({"account": {"balance": 3}})).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    let fault = instance.fault.clone().expect("fault recorded");
    assert_eq!(fault.name, "InsufficientFunds");
    assert_eq!(fault.data, Some(json!({"balance": 3})));
    assert_eq!(
        instance.activity_statuses.get("pay"),
        Some(&ActivityStatus::Faulted)
    );
    assert!(!instance.logged_activity_ids().contains(&"after"));
}

#[tokio::test]
async fn process_level_handler_completes_the_instance() {
    let yaml = r#"
id: guarded
name: Process-level guard
rootActivityId: main
faultHandlers:
  - { faultName: "*", faultVariable: failure, activity: cleanup }
activities:
  - { id: main, type: sequence, children: [boom, never] }
  - { id: boom, type: throw, faultName: Exploded }
  - { id: never, type: empty }
  - id: cleanup
    type: assign
    copies:
      - { from: { type: literal, value: true }, to: cleaned }
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert!(instance.fault.is_none());
    assert_eq!(instance.variables["cleaned"], json!(true));
    assert_eq!(instance.variables["failure"]["name"], json!("Exploded"));
    assert_eq!(
        instance.activity_statuses.get("main"),
        Some(&ActivityStatus::Faulted)
    );
    assert!(!instance.logged_activity_ids().contains(&"never"));
}

#[tokio::test]
async fn rethrow_reaches_the_enclosing_scope() {
    let yaml = r#"
id: layered
name: Layered scopes
rootActivityId: outer
activities:
  - id: outer
    type: scope
    children: [inner]
    faultHandlers:
      - { faultName: CardDeclined, faultVariable: seen, activity: note }
  - id: inner
    type: scope
    children: [decline]
    faultHandlers:
      - { faultName: "*", activity: pass_up }
  - { id: decline, type: throw, faultName: CardDeclined }
  - { id: pass_up, type: rethrow }
  - id: note
    type: assign
    copies:
      - { from: { type: literal, value: outer }, to: handledBy }
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.variables["handledBy"], json!("outer"));
    assert_eq!(instance.variables["seen"]["name"], json!("CardDeclined"));
    assert_eq!(
        instance.activity_statuses.get("inner"),
        Some(&ActivityStatus::Faulted)
    );
    assert_eq!(
        instance.activity_statuses.get("outer"),
        Some(&ActivityStatus::Completed)
    );
}

#[tokio::test]
async fn rethrow_without_a_recorded_fault_fails() {
    let yaml = r#"
id: stray
name: Stray rethrow
rootActivityId: again
activities:
  - { id: again, type: rethrow }
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    let fault = instance.fault.unwrap();
    assert_eq!(fault.name, "UnhandledFault");
    assert_eq!(fault.message, "no fault to rethrow");
}

#[tokio::test]
async fn fault_inside_handler_is_not_retried() {
    let yaml = r#"
id: relapse
name: Handler relapse
rootActivityId: guard
activities:
  - id: guard
    type: scope
    children: [first]
    faultHandlers:
      - { faultName: Flaky, activity: second }
  - { id: first, type: throw, faultName: Flaky }
  - { id: second, type: throw, faultName: Flaky }
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    assert_eq!(instance.fault.as_ref().unwrap().name, "Flaky");
    assert_eq!(instance.logged_activity_ids(), vec!["first", "second", "guard"]);
}

#[tokio::test]
async fn flow_reports_first_failure_after_all_children_settle() {
    let yaml = r#"
id: fanout
name: Fan-out failure
rootActivityId: main
activities:
  - { id: main, type: flow, children: [left, right, tail] }
  - { id: left, type: throw, faultName: LeftFailed }
  - { id: right, type: throw, faultName: RightFailed }
  - id: tail
    type: assign
    copies:
      - { from: { type: literal, value: 1 }, to: tailRan }
"#;
    let instance = run(yaml, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    assert_eq!(instance.fault.clone().unwrap().name, "LeftFailed");
    assert_eq!(instance.variables["tailRan"], json!(1));
    assert_eq!(instance.execution_log.len(), 4);
}

#[tokio::test]
async fn expression_errors_surface_as_unhandled_faults() {
    let yaml = r#"
id: badmath
name: Bad arithmetic
rootActivityId: calc
activities:
  - id: calc
    type: assign
    copies:
      - { from: { type: expression, expression: "amount * (2 +" }, to: result }
"#;
    let instance = run(yaml, json!({"amount": 4})).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    let fault = instance.fault.unwrap();
    assert_eq!(fault.name, "UnhandledFault");
    assert!(fault.message.starts_with("expression error"));
}

#[tokio::test]
async fn out_of_range_array_write_faults_instead_of_panicking() {
    let yaml = r#"
id: farwrite
name: Far array write
rootActivityId: scribble
activities:
  - id: scribble
    type: assign
    copies:
      - { from: { type: literal, value: 3 }, to: items.18446744073709551615 }
"#;
    let instance = run(yaml, json!({"items": [1]})).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    let fault = instance.fault.as_ref().unwrap();
    assert_eq!(fault.name, "UnhandledFault");
    assert!(fault.message.starts_with("variable error"));
    assert_eq!(instance.variables["items"], json!([1]));
}

#[tokio::test]
async fn deeply_nested_input_expression_faults_instead_of_overflowing() {
    let yaml = r#"
id: deep
name: Deep expression
rootActivityId: calc
activities:
  - id: calc
    type: assign
    copies:
      - { from: { type: expression, expression: "x + 1" }, to: result }
"#;
    let deep = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
    let instance = run(yaml, json!({ "x": deep })).await;
    assert_eq!(instance.status, InstanceStatus::Faulted);
    let fault = instance.fault.unwrap();
    assert_eq!(fault.name, "UnhandledFault");
    assert!(fault.message.contains("nests deeper than 256 levels"));
}
