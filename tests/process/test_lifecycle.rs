use procflow::core::process::{
    ActivityStatus, IdGenerator, InstanceStatus, ProcessDefinition, ProcessEngine,
    ProcessInstance, Variables,
};
use procflow::core::types::ErrorCategory;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn vars(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        _ => Variables::new(),
    }
}

struct CountingIds(AtomicUsize);

impl IdGenerator for CountingIds {
    fn generate_id(&self) -> String {
        format!("run-{}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

fn engine() -> ProcessEngine {
    ProcessEngine::default().with_id_generator(Arc::new(CountingIds(AtomicUsize::new(0))))
}

const GREETING: &str = r#"
id: greet
name: Greeting
rootActivityId: main
variables:
  - { name: greeting, default: hello }
  - { name: audience, default: world }
activities:
  - id: main
    type: assign
    copies:
      - { from: { type: expression, expression: "greeting audience" }, to: message }
"#;

const FAILING: &str = r#"
id: failing
name: Always fails
rootActivityId: main
activities:
  - { id: main, type: throw, faultName: Broken }
"#;

const SLOW: &str = r#"
id: slow
name: Slow steps
rootActivityId: main
activities:
  - { id: main, type: sequence, children: [pause, after] }
  - { id: pause, type: wait, duration: "100ms" }
  - { id: after, type: empty }
"#;

async fn deploy(engine: &ProcessEngine, yaml: &str) {
    let definition = ProcessDefinition::from_yaml_str(yaml).expect("valid definition");
    engine.deploy_process(definition).await.unwrap();
}

#[tokio::test]
async fn deploy_and_undeploy_preconditions() {
    let engine = engine();
    deploy(&engine, GREETING).await;
    assert_eq!(engine.process_count().await, 1);
    assert!(engine.get_process("greet").await.is_some());

    let duplicate = ProcessDefinition::from_yaml_str(GREETING).unwrap();
    let err = engine.deploy_process(duplicate).await.unwrap_err();
    assert_eq!(err.code, "PFX-DEPLOY-001");
    assert_eq!(err.category, ErrorCategory::DeploymentError);

    engine.undeploy_process("greet").await.unwrap();
    assert!(engine.get_process("greet").await.is_none());
    let err = engine.undeploy_process("greet").await.unwrap_err();
    assert_eq!(err.code, "PFX-DEPLOY-002");

    let err = engine
        .start_process("greet", Variables::new(), "tests")
        .await
        .unwrap_err();
    assert_eq!(err.code, "PFX-DEPLOY-002");
}

#[tokio::test]
async fn disabled_definition_cannot_start() {
    let engine = engine();
    let mut definition = ProcessDefinition::from_yaml_str(GREETING).unwrap();
    definition.enabled = false;
    engine.deploy_process(definition).await.unwrap();
    let err = engine
        .start_process("greet", Variables::new(), "tests")
        .await
        .unwrap_err();
    assert_eq!(err.code, "PFX-START-001");
    assert_eq!(engine.instance_count().await, 0);
}

#[tokio::test]
async fn input_overrides_declared_defaults() {
    let engine = engine();
    deploy(&engine, GREETING).await;
    let instance = engine
        .start_process("greet", vars(json!({"audience": "team"})), "alice")
        .await
        .unwrap();
    assert_eq!(instance.instance_id, "run-0");
    assert_eq!(instance.process_id, "greet");
    assert_eq!(instance.initiated_by, "alice");
    assert_eq!(instance.variables["greeting"], json!("hello"));
    assert_eq!(instance.variables["message"], json!("hello team"));
}

#[tokio::test]
async fn callbacks_fire_once_per_outcome() {
    let engine = engine();
    deploy(&engine, GREETING).await;
    deploy(&engine, FAILING).await;

    let completed = Arc::new(Mutex::new(Vec::new()));
    let faulted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&completed);
    engine
        .on_complete(move |instance: &ProcessInstance| {
            sink.lock().unwrap().push(instance.instance_id.clone());
            Ok(())
        })
        .await;
    let sink = Arc::clone(&faulted);
    engine
        .on_faulted(move |instance: &ProcessInstance| {
            let name = instance.fault.as_ref().map(|f| f.name.clone());
            sink.lock().unwrap().push(name.unwrap_or_default());
            Ok(())
        })
        .await;

    engine
        .start_process("greet", Variables::new(), "tests")
        .await
        .unwrap();
    let failed = engine
        .start_process("failing", Variables::new(), "tests")
        .await
        .unwrap();
    assert_eq!(failed.status, InstanceStatus::Faulted);

    assert_eq!(*completed.lock().unwrap(), vec!["run-0".to_string()]);
    assert_eq!(*faulted.lock().unwrap(), vec!["Broken".to_string()]);
}

#[tokio::test]
async fn misbehaving_callbacks_are_swallowed() {
    let engine = engine();
    deploy(&engine, GREETING).await;
    let later = Arc::new(AtomicUsize::new(0));
    engine
        .on_complete(|_: &ProcessInstance| anyhow::bail!("observer is broken"))
        .await;
    engine
        .on_complete(|_: &ProcessInstance| -> anyhow::Result<()> { panic!("observer exploded") })
        .await;
    let counter = Arc::clone(&later);
    engine
        .on_complete(move |_: &ProcessInstance| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    let instance = engine
        .start_process("greet", Variables::new(), "tests")
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(later.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn suspend_takes_effect_at_the_next_child_boundary() {
    let engine = engine();
    deploy(&engine, SLOW).await;

    let (instance, suspended) = tokio::join!(
        engine.start_process("slow", Variables::new(), "tests"),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            engine.suspend_instance("run-0").await
        }
    );
    suspended.unwrap();
    let instance = instance.unwrap();

    assert_eq!(instance.status, InstanceStatus::Suspended);
    assert!(instance.completed_at.is_none());
    assert_eq!(instance.logged_activity_ids(), vec!["pause", "main"]);
    assert_eq!(
        instance.activity_statuses.get("pause"),
        Some(&ActivityStatus::Completed)
    );
    assert_eq!(
        instance.activity_statuses.get("main"),
        Some(&ActivityStatus::Interrupted)
    );
    assert_eq!(engine.active_count().await, 0);

    let err = engine.suspend_instance("run-0").await.unwrap_err();
    assert_eq!(err.message, "cannot suspend instance in status suspended");

    engine.resume_instance("run-0").await.unwrap();
    assert_eq!(engine.active_count().await, 1);
    let err = engine.resume_instance("run-0").await.unwrap_err();
    assert_eq!(err.message, "cannot resume instance in status active");
    assert_eq!(err.code, "PFX-LIFE-002");
}

#[tokio::test(start_paused = true)]
async fn terminate_mid_flight_skips_remaining_work_and_callbacks() {
    let engine = engine();
    deploy(&engine, SLOW).await;
    let notified = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let counter = Arc::clone(&notified);
        engine
            .on_complete(move |_: &ProcessInstance| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
    }

    let (instance, terminated) = tokio::join!(
        engine.start_process("slow", Variables::new(), "tests"),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            engine.terminate_instance("run-0").await
        }
    );
    terminated.unwrap();
    let instance = instance.unwrap();
    assert_eq!(instance.status, InstanceStatus::Terminated);
    assert!(instance.completed_at.is_some());
    assert!(!instance.logged_activity_ids().contains(&"after"));
    assert_eq!(notified.load(Ordering::SeqCst), 0);

    let err = engine.terminate_instance("run-0").await.unwrap_err();
    assert_eq!(err.message, "cannot terminate instance in status terminated");
    let err = engine.resume_instance("run-0").await.unwrap_err();
    assert_eq!(err.code, "PFX-LIFE-002");
}

#[tokio::test]
async fn finished_instances_reject_lifecycle_changes() {
    let engine = engine();
    deploy(&engine, GREETING).await;
    deploy(&engine, FAILING).await;
    engine
        .start_process("greet", Variables::new(), "tests")
        .await
        .unwrap();
    engine
        .start_process("failing", Variables::new(), "tests")
        .await
        .unwrap();

    for id in ["run-0", "run-1"] {
        assert!(engine.suspend_instance(id).await.is_err());
        assert!(engine.terminate_instance(id).await.is_err());
    }
    let err = engine.suspend_instance("missing").await.unwrap_err();
    assert_eq!(err.code, "PFX-LIFE-001");
    assert_eq!(err.category, ErrorCategory::LifecycleError);
}

#[tokio::test]
async fn queries_and_counts() {
    let engine = engine();
    deploy(&engine, GREETING).await;
    deploy(&engine, FAILING).await;
    for _ in 0..2 {
        engine
            .start_process("greet", Variables::new(), "tests")
            .await
            .unwrap();
    }
    engine
        .start_process("failing", Variables::new(), "tests")
        .await
        .unwrap();

    assert_eq!(engine.process_count().await, 2);
    assert_eq!(engine.instance_count().await, 3);
    assert_eq!(engine.active_count().await, 0);

    let greet_ids: Vec<String> = engine
        .get_instances_by_process("greet")
        .await
        .into_iter()
        .map(|instance| instance.instance_id)
        .collect();
    assert_eq!(greet_ids, vec!["run-0".to_string(), "run-1".to_string()]);

    let faulted = engine.get_instances_by_status(InstanceStatus::Faulted).await;
    assert_eq!(faulted.len(), 1);
    assert_eq!(faulted[0].process_id, "failing");
    assert!(engine.get_instance("run-2").await.is_some());
    assert!(engine.get_instance("run-9").await.is_none());

    engine.undeploy_process("greet").await.unwrap();
    assert_eq!(engine.get_instances_by_process("greet").await.len(), 2);
}

#[tokio::test]
async fn engines_do_not_share_registries() {
    let first = engine();
    let second = engine();
    deploy(&first, GREETING).await;
    deploy(&second, GREETING).await;
    first
        .start_process("greet", Variables::new(), "tests")
        .await
        .unwrap();
    assert_eq!(first.instance_count().await, 1);
    assert_eq!(second.instance_count().await, 0);
}
