//! End-to-end tests of the client façade over a mock service.
//!
//! Covers create (with and without an agent object), get, list, update,
//! delete, method binding and long-running operation failures.

mod common;

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_engines::agent::Receiver;
use agent_engines::deployment::EnvVars;
use agent_engines::error::AgentEngineError;
use agent_engines::packaging::BuildOptions;
use agent_engines::storage::InMemoryObjectStore;
use agent_engines::types::{AgentFramework, ApiMode, SecretRef, Status};
use agent_engines::AgentEngineOptions;
use common::{engine_name, full_agent, query_agent, test_setup, text_method};
use serde_json::json;

const STAGED: &str = "gs://test-bucket/agent_engine";

// ===========================================================================
// create
// ===========================================================================

/// Without an agent object only the display fields are sent.
#[tokio::test]
async fn lightweight_create_sends_no_spec() {
    let (transport, store, client) = test_setup();

    let engine = client
        .create(None, AgentEngineOptions::new().with_display_name("light"))
        .await
        .unwrap();

    assert_eq!(engine.resource_name(), engine_name(1));
    assert_eq!(engine.display_name().as_deref(), Some("light"));
    assert!(engine.method_names().is_empty());
    assert!(store.uris().await.is_empty());

    transport.with_state(|s| {
        assert_eq!(s.creates.len(), 1);
        assert!(s.creates[0].spec.is_none());
        assert_eq!(s.creates[0].display_name.as_deref(), Some("light"));
        assert_eq!(s.operation_polls, 1);
    });
}

/// A full deployment stages every artifact and binds the echoed methods.
#[tokio::test]
async fn full_create_stages_artifacts_and_binds_methods() {
    let (transport, store, client) = test_setup();
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("p");
    std::fs::create_dir(&package).unwrap();
    std::fs::write(package.join("module.py"), "VALUE = 1\n").unwrap();

    let agent = full_agent().build();
    let engine = client
        .create(
            Some(&agent),
            AgentEngineOptions::new()
                .with_display_name("full")
                .with_requirements(vec!["pkg-a==1.0"])
                .with_extra_packages([package.to_string_lossy().to_string()]),
        )
        .await
        .unwrap();

    assert_eq!(
        store.get(&format!("{STAGED}/agent_engine.pkl")).await.unwrap(),
        b"full-agent-blob".to_vec()
    );
    assert_eq!(
        store.get(&format!("{STAGED}/requirements.txt")).await.unwrap(),
        b"pkg-a==1.0".to_vec()
    );
    assert!(store
        .get(&format!("{STAGED}/dependencies.tar.gz"))
        .await
        .is_some());

    transport.with_state(|s| {
        let spec = s.creates[0].spec.as_ref().unwrap();
        let package_spec = spec.package_spec.as_ref().unwrap();
        assert_eq!(package_spec.python_version.as_deref(), Some("3.12"));
        assert_eq!(
            package_spec.pickle_object_gcs_uri.as_deref(),
            Some(format!("{STAGED}/agent_engine.pkl").as_str())
        );
        assert_eq!(
            package_spec.requirements_gcs_uri.as_deref(),
            Some(format!("{STAGED}/requirements.txt").as_str())
        );
        assert_eq!(
            package_spec.dependency_files_gcs_uri.as_deref(),
            Some(format!("{STAGED}/dependencies.tar.gz").as_str())
        );
        assert_eq!(spec.class_methods.len(), 4);
        assert_eq!(spec.agent_framework, Some(AgentFramework::Custom));
        assert!(spec.deployment_spec.is_none());
    });

    assert_eq!(
        engine.method_names(),
        vec!["async_query", "async_stream_query", "query", "stream_query"]
    );
    assert_eq!(
        engine.method("stream_query").unwrap().api_mode(),
        ApiMode::Stream
    );
    assert_eq!(engine.operation_schemas().len(), 4);
}

/// Env vars become plain and secret-backed deployment settings.
#[tokio::test]
async fn env_vars_map_to_plain_and_secret_entries() {
    let (transport, _store, client) = test_setup();
    let agent = query_agent().build();

    client
        .create(
            Some(&agent),
            AgentEngineOptions::new().with_env_vars(
                EnvVars::new()
                    .plain("MODE", "prod")
                    .secret("API_KEY", "api-key-secret", Some("3")),
            ),
        )
        .await
        .unwrap();

    transport.with_state(|s| {
        let deployment = s.creates[0]
            .spec
            .as_ref()
            .and_then(|spec| spec.deployment_spec.as_ref())
            .unwrap();
        assert_eq!(deployment.env.len(), 1);
        assert_eq!(deployment.env[0].name, "MODE");
        assert_eq!(deployment.env[0].value, "prod");
        assert_eq!(deployment.secret_env.len(), 1);
        assert_eq!(deployment.secret_env[0].name, "API_KEY");
        assert_eq!(
            deployment.secret_env[0].secret_ref,
            SecretRef {
                secret: "api-key-secret".into(),
                version: Some("3".into()),
            }
        );
    });
}

/// A method without a receiver fails before anything is staged or sent.
#[tokio::test]
async fn missing_self_fails_before_side_effects() {
    let (transport, store, client) = test_setup();
    let agent = agent_engines::AgentBuilder::new("Broken", b"blob".to_vec())
        .with_method("query", text_method().with_receiver(Receiver::Missing))
        .build();

    let err = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AgentEngineError::Validation { .. }));
    assert!(err.to_string().contains("missing `self`"));
    assert!(store.uris().await.is_empty());
    transport.with_state(|s| assert!(s.creates.is_empty()));
}

/// Deployment settings need an agent object to deploy.
#[tokio::test]
async fn deployment_settings_without_agent_are_rejected() {
    let (transport, _store, client) = test_setup();

    let err = client
        .create(None, AgentEngineOptions::new().with_requirements(vec!["a==1"]))
        .await
        .unwrap_err();

    assert!(matches!(err, AgentEngineError::Validation { .. }));
    transport.with_state(|s| assert!(s.creates.is_empty()));
}

/// Build options only shape the agent's container image.
#[tokio::test]
async fn build_options_without_agent_are_rejected() {
    let (transport, _store, client) = test_setup();

    let err = client
        .create(
            None,
            AgentEngineOptions::new()
                .with_build_options(BuildOptions::with_installation_scripts(["installation_scripts/a.sh"])),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AgentEngineError::Validation { .. }));
    assert!(err.to_string().contains("build_options can only be specified"));
    transport.with_state(|s| assert!(s.creates.is_empty()));
}

/// Declared installation scripts are checked against the shipped packages.
#[tokio::test]
async fn build_options_with_agent_are_enforced() {
    let (transport, store, client) = test_setup();
    let agent = query_agent().build();

    let err = client
        .create(
            Some(&agent),
            AgentEngineOptions::new()
                .with_build_options(BuildOptions::with_installation_scripts(["installation_scripts/a.sh"])),
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("must also be listed in extra_packages"));
    assert!(store.uris().await.is_empty());
    transport.with_state(|s| assert!(s.creates.is_empty()));
}

/// A staged blob that does not load back aborts the deployment.
#[tokio::test]
async fn corrupted_staging_aborts_create() {
    use agent_engines::error::AgentEngineResult;
    use agent_engines::storage::ObjectStore;
    use async_trait::async_trait;

    struct CorruptingStore(InMemoryObjectStore);

    #[async_trait]
    impl ObjectStore for CorruptingStore {
        async fn ensure_bucket(&self, bucket: &str) -> AgentEngineResult<()> {
            self.0.ensure_bucket(bucket).await
        }

        async fn upload(&self, bucket: &str, object: &str, data: Vec<u8>) -> AgentEngineResult<()> {
            self.0.upload(bucket, object, data).await
        }

        async fn download(&self, bucket: &str, object: &str) -> AgentEngineResult<Vec<u8>> {
            let mut data = self.0.download(bucket, object).await?;
            data.push(0);
            Ok(data)
        }
    }

    let transport = common::MockTransport::new();
    let store = Arc::new(CorruptingStore(InMemoryObjectStore::new()));
    let client = common::test_client(transport.clone(), store.clone());
    let agent = query_agent().build();

    let err = client
        .create(
            Some(&agent),
            AgentEngineOptions::new().with_requirements(vec!["a==1"]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AgentEngineError::Serialization { .. }));
    assert!(store
        .0
        .get(&format!("{STAGED}/requirements.txt"))
        .await
        .is_none());
    transport.with_state(|s| assert!(s.creates.is_empty()));
}

/// An operation that finishes with an error surfaces it.
#[tokio::test]
async fn failed_operation_is_reported() {
    let (transport, _store, client) = test_setup();
    transport.with_state(|s| {
        s.operation_error = Some(Status {
            code: 9,
            message: "image build failed".into(),
            details: vec![],
        })
    });
    let agent = query_agent().build();

    let err = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap_err();

    match err {
        AgentEngineError::OperationFailed { code, message } => {
            assert_eq!(code, 9);
            assert_eq!(message, "image build failed");
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Creating an agent requires a staging bucket.
#[tokio::test]
async fn agent_create_requires_a_staging_bucket() {
    let transport = common::MockTransport::new();
    let client = agent_engines::ClientBuilder::new(common::PROJECT, common::LOCATION)
        .with_transport(transport.clone())
        .with_object_store(Arc::new(InMemoryObjectStore::new()))
        .build()
        .unwrap();
    let agent = query_agent().build();

    let err = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AgentEngineError::Config { .. }));
    transport.with_state(|s| assert!(s.creates.is_empty()));
}

// ===========================================================================
// method synthesis
// ===========================================================================

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Unknown modes are logged and left off the handle.
#[tokio::test]
async fn unknown_api_mode_is_logged_and_skipped() {
    let (transport, _store, client) = test_setup();
    transport.with_state(|s| {
        s.echoed_class_methods = Some(vec![
            json!({"name": "query", "api_mode": "", "parameters": {"type": "object"}}),
            json!({"name": "teleport", "api_mode": "warp", "parameters": {"type": "object"}}),
        ])
    });

    let logs = Arc::new(Mutex::new(Vec::new()));
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || SharedBuffer(writer.clone()))
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let agent = query_agent().build();
    let engine = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap();

    assert_eq!(engine.method_names(), vec!["query"]);
    let output = String::from_utf8(logs.lock().unwrap().clone()).unwrap();
    assert!(output.contains("Unsupported api mode: `warp`"));
    assert!(output.contains("supported modes are:"));
}

/// Calls forward the method name and keyword arguments.
#[tokio::test]
async fn async_method_forwards_to_query() {
    let (transport, _store, client) = test_setup();
    let agent = full_agent().build();
    let engine = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap();

    let method = engine.method("async_query").unwrap();
    assert!(method.doc().contains("async_query"));
    let output = method
        .as_async()
        .unwrap()
        .call(json!({"input": "hi"}))
        .await
        .unwrap();

    assert_eq!(output, json!({"method": "async_query", "echo": {"input": "hi"}}));
    transport.with_state(|s| {
        assert_eq!(s.queries.len(), 1);
        assert_eq!(s.queries[0].0, engine_name(1));
        assert!(s.queries[0].1.include_all_fields);
    });
}

/// Nothing is sent until the stream is polled, and then exactly once.
#[tokio::test]
async fn async_stream_is_lazy() {
    use futures::StreamExt;

    let (transport, _store, client) = test_setup();
    transport.with_state(|s| {
        s.stream_body = b"data: {\"chunk\": 1}\n\n: keep-alive\n\ndata: {\"chunk\": 2}\n\n".to_vec()
    });
    let agent = full_agent().build();
    let engine = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap();

    let stream = engine
        .method("async_stream_query")
        .unwrap()
        .as_async_stream()
        .unwrap()
        .call(json!({"input": "go"}))
        .unwrap();
    transport.with_state(|s| assert!(s.stream_calls.is_empty()));

    let items: Vec<_> = stream.map(Result::unwrap).collect().await;

    assert_eq!(items, vec![json!({"chunk": 1}), json!({"chunk": 2})]);
    transport.with_state(|s| {
        assert_eq!(s.stream_calls.len(), 1);
        assert!(s.stream_calls[0].2, "async streams ask for SSE framing");
        assert_eq!(s.stream_calls[0].1.class_method, "async_stream_query");
    });
}

/// Body lines without `data:` framing still reach the caller.
#[tokio::test]
async fn async_stream_passes_unframed_lines_through() {
    use futures::StreamExt;

    let (transport, _store, client) = test_setup();
    transport.with_state(|s| s.stream_body = b"{\"chunk\": 1}\n{\"chunk\": 2}\n".to_vec());
    let agent = full_agent().build();
    let engine = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap();

    let items: Vec<_> = engine
        .method("async_stream_query")
        .unwrap()
        .as_async_stream()
        .unwrap()
        .call(json!({}))
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(items, vec![json!({"chunk": 1}), json!({"chunk": 2})]);
}

/// The first element arrives while the rest of the body is still pending.
#[tokio::test]
async fn first_stream_element_does_not_wait_for_the_body() {
    use futures::StreamExt;

    let (transport, _store, client) = test_setup();
    transport.with_state(|s| s.stream_never_ends = true);
    let agent = full_agent().build();
    let engine = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap();

    let mut stream = engine
        .method("async_stream_query")
        .unwrap()
        .as_async_stream()
        .unwrap()
        .call(json!({}))
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("first element should not wait for the whole body")
        .unwrap()
        .unwrap();

    assert_eq!(first, json!({"chunk": 1}));
    assert!(
        tokio::time::timeout(Duration::from_millis(50), stream.next())
            .await
            .is_err()
    );
    transport.with_state(|s| assert_eq!(s.stream_calls.len(), 1));
}

/// Blocking shapes refuse to run on a current-thread runtime.
#[tokio::test]
async fn blocking_methods_refuse_async_context() {
    let (_transport, _store, client) = test_setup();
    let agent = full_agent().build();
    let engine = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap();

    let err = engine
        .method("query")
        .unwrap()
        .as_unary()
        .unwrap()
        .call_blocking(json!({}))
        .unwrap_err();
    assert!(matches!(err, AgentEngineError::Config { .. }));
}

/// On a multi-threaded runtime the blocking pool can use the blocking shapes.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_methods_run_on_the_blocking_pool() {
    let (transport, _store, client) = test_setup();
    let agent = full_agent().build();
    let engine = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap();
    let query = engine.method("query").unwrap();
    let stream = engine.method("stream_query").unwrap();

    let (output, items) = tokio::task::spawn_blocking(move || {
        let output = query.as_unary().unwrap().call_blocking(json!({"input": "pool"}));
        let items: Vec<_> = stream
            .as_stream()
            .unwrap()
            .call_blocking(json!({}))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        (output, items)
    })
    .await
    .unwrap();

    assert_eq!(output.unwrap()["method"], "query");
    assert_eq!(items, vec![json!({"chunk": 1}), json!({"chunk": 2})]);
    transport.with_state(|s| assert_eq!(s.stream_calls.len(), 1));
}

/// Methods outliving their handle report it instead of calling out.
#[tokio::test]
async fn methods_outliving_the_handle_fail() {
    let (transport, _store, client) = test_setup();
    let agent = full_agent().build();
    let engine = client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap();
    let method = engine.method("async_query").unwrap();
    drop(engine);

    let err = method.as_async().unwrap().call(json!({})).await.unwrap_err();
    assert!(err.to_string().contains("no longer exists"));
    transport.with_state(|s| assert!(s.queries.is_empty()));
}

/// The blocking façade and blocking method shapes work off-runtime.
#[test]
fn blocking_create_and_stream() {
    let (transport, _store, client) = test_setup();
    let agent = full_agent().build();
    let engine = client
        .create_blocking(Some(&agent), AgentEngineOptions::new())
        .unwrap();

    let output = engine
        .method("query")
        .unwrap()
        .as_unary()
        .unwrap()
        .call_blocking(json!({"input": "sync"}))
        .unwrap();
    assert_eq!(output["method"], "query");

    let stream = engine
        .method("stream_query")
        .unwrap()
        .as_stream()
        .unwrap()
        .call_blocking(json!({"input": "lines"}))
        .unwrap();
    transport.with_state(|s| assert!(s.stream_calls.is_empty()));

    let items: Vec<_> = stream.map(Result::unwrap).collect();
    assert_eq!(items, vec![json!({"chunk": 1}), json!({"chunk": 2})]);
    transport.with_state(|s| {
        assert_eq!(s.stream_calls.len(), 1);
        assert!(!s.stream_calls[0].2);
    });
}

// ===========================================================================
// get / list / delete
// ===========================================================================

#[tokio::test]
async fn get_accepts_short_ids() {
    let (_transport, _store, client) = test_setup();
    let agent = query_agent().build();
    client
        .create(Some(&agent), AgentEngineOptions::new())
        .await
        .unwrap();

    let engine = client.get("1").await.unwrap();
    assert_eq!(engine.resource_name(), engine_name(1));
    assert_eq!(engine.method_names(), vec!["query"]);

    let err = client.get("42").await.unwrap_err();
    assert!(matches!(err, AgentEngineError::NotFound(_)));
}

#[tokio::test]
async fn list_follows_every_page() {
    let (_transport, _store, client) = test_setup();
    for i in 0..5 {
        client
            .create(
                None,
                AgentEngineOptions::new().with_display_name(format!("engine-{i}")),
            )
            .await
            .unwrap();
    }

    let engines = client.list(None).await.unwrap();
    assert_eq!(engines.len(), 5);
    let mut names: Vec<_> = engines.iter().map(|e| e.resource_name()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 5);
}

#[tokio::test]
async fn delete_forwards_force() {
    let (transport, _store, client) = test_setup();
    let engine = client.create(None, AgentEngineOptions::new()).await.unwrap();

    engine.delete(true).await.unwrap();

    transport.with_state(|s| {
        assert_eq!(s.deletes, vec![(engine_name(1), true)]);
        assert!(s.engines.is_empty());
    });
    assert!(matches!(
        client.get(&engine_name(1)).await.unwrap_err(),
        AgentEngineError::NotFound(_)
    ));
}

// ===========================================================================
// update
// ===========================================================================

/// Only the display name is masked when it is the only change.
#[tokio::test]
async fn display_name_update_masks_one_field() {
    let (transport, _store, client) = test_setup();
    let created = client
        .create(None, AgentEngineOptions::new().with_display_name("before"))
        .await
        .unwrap();

    let updated = client
        .update(
            &created.resource_name(),
            None,
            AgentEngineOptions::new().with_display_name("after"),
        )
        .await
        .unwrap();

    assert_eq!(updated.display_name().as_deref(), Some("after"));
    transport.with_state(|s| {
        assert_eq!(s.updates.len(), 1);
        assert_eq!(s.updates[0].1.paths(), ["display_name"]);
        assert_eq!(s.updates[0].0.name, engine_name(1));
    });
}

/// Each single-field change yields exactly its own mask paths.
#[tokio::test]
async fn single_field_updates_have_matching_masks() {
    let cases: Vec<(AgentEngineOptions, Vec<&str>)> = vec![
        (
            AgentEngineOptions::new().with_description("d"),
            vec!["description"],
        ),
        (
            AgentEngineOptions::new().with_min_instances(2),
            vec!["spec.deployment_spec.min_instances"],
        ),
        (
            AgentEngineOptions::new().with_resource_limits("4", "8Gi"),
            vec!["spec.deployment_spec.resource_limits"],
        ),
        (
            AgentEngineOptions::new().with_service_account("sa@p.iam.gserviceaccount.com"),
            vec!["spec.service_account"],
        ),
        (
            AgentEngineOptions::new().with_env_vars(EnvVars::new().plain("A", "1")),
            vec!["spec.deployment_spec.env", "spec.deployment_spec.secret_env"],
        ),
    ];

    for (options, expected) in cases {
        let (transport, _store, client) = test_setup();
        let engine = client.create(None, AgentEngineOptions::new()).await.unwrap();
        engine.update(None, options).await.unwrap();
        transport.with_state(|s| assert_eq!(s.updates[0].1.paths(), expected.as_slice()));
    }
}

#[tokio::test]
async fn empty_update_is_rejected() {
    let (transport, _store, client) = test_setup();
    let engine = client.create(None, AgentEngineOptions::new()).await.unwrap();

    let err = engine
        .update(None, AgentEngineOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AgentEngineError::Validation { .. }));
    assert!(err.to_string().contains("At least one of"));
    transport.with_state(|s| assert!(s.updates.is_empty()));
}

#[tokio::test]
async fn build_options_only_update_needs_an_agent() {
    let (transport, _store, client) = test_setup();
    let engine = client.create(None, AgentEngineOptions::new()).await.unwrap();

    let err = client
        .update(
            &engine.resource_name(),
            None,
            AgentEngineOptions::new().with_build_options(BuildOptions::default()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AgentEngineError::Validation { .. }));
    assert!(err
        .to_string()
        .contains("build_options can only be specified together with an agent object"));
    transport.with_state(|s| assert!(s.updates.is_empty()));
}

/// Updating with a new object restages it and rebinds the handle.
#[tokio::test]
async fn update_with_agent_rebinds_methods() {
    let (transport, store, client) = test_setup();
    let first = query_agent().build();
    let engine = client
        .create(Some(&first), AgentEngineOptions::new())
        .await
        .unwrap();
    assert_eq!(engine.method_names(), vec!["query"]);
    let other_handle = engine.clone();

    let second = agent_engines::AgentBuilder::new("StreamAgent", b"second-blob".to_vec())
        .with_method("stream_query", text_method())
        .build();
    engine
        .update(Some(&second), AgentEngineOptions::new())
        .await
        .unwrap();

    assert_eq!(other_handle.method_names(), vec!["stream_query"]);
    assert!(engine.method("query").is_none());
    assert_eq!(
        store.get(&format!("{STAGED}/agent_engine.pkl")).await.unwrap(),
        b"second-blob".to_vec()
    );
    transport.with_state(|s| {
        let paths = s.updates[0].1.paths();
        assert!(paths.contains(&"spec.package_spec.pickle_object_gcs_uri".to_string()));
        assert!(paths.contains(&"spec.class_methods".to_string()));
        assert!(paths.contains(&"spec.agent_framework".to_string()));
        assert!(!paths.contains(&"display_name".to_string()));
    });
}
