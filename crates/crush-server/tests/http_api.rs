//! End-to-end tests: a real server on a local listener, driven through the
//! typed client adapter.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crush_client::Client;
use crush_core::app::DefaultProviderFactory;
use crush_server::net::LocalListener;
use crush_server::Server;
use crush_shared::event::EventPayload;
use crush_shared::host::Scheme;
use crush_shared::instance::Instance as InstanceSpec;
use crush_shared::{AgentEventKind, MessageRole};

fn workspace_with_mock_provider() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let config = serde_json::json!({
        "providers": {
            "mock": {
                "type": "mock",
                "models": [{
                    "id": "test",
                    "context_window": 8192,
                    "default_max_tokens": 1024,
                    "cost_per_1m_in": 1.0,
                    "cost_per_1m_out": 2.0
                }]
            }
        },
        "models": {
            "large": {"provider": "mock", "model": "test"},
            "small": {"provider": "mock", "model": "test"}
        }
    });
    std::fs::write(
        dir.path().join("crush.json"),
        serde_json::to_string_pretty(&config).unwrap(),
    )
    .unwrap();
    dir
}

async fn start_server(scheme: Scheme, address: &str) -> (Client, JoinHandle<()>, String) {
    let listener = LocalListener::bind(scheme, address).await.unwrap();
    let bound = listener.local_addr();
    let host = format!("{}://{}", scheme, bound);

    let server = Server::new(Arc::new(DefaultProviderFactory));
    let shutdown_client = Client::new(&host).unwrap();
    let handle = tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    // Wait for the listener to answer.
    for _ in 0..100 {
        if shutdown_client.health().await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    (Client::new(&host).unwrap(), handle, host)
}

#[tokio::test]
async fn full_prompt_round_trip_over_tcp() {
    let (client, server, _host) = start_server(Scheme::Tcp, "127.0.0.1:0").await;
    let workspace = workspace_with_mock_provider();

    client.health().await.unwrap();
    let version = client.version_info().await.unwrap();
    assert!(!version.version.is_empty());

    // Create an instance for the workspace.
    let instance = client
        .create_instance(&InstanceSpec {
            path: workspace.path().to_string_lossy().to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!instance.id.is_empty());
    assert_eq!(client.list_instances().await.unwrap().len(), 1);

    let info = client.agent_info(&instance.id).await.unwrap();
    assert!(!info.is_busy);
    assert_eq!(info.model.id, "test");

    // Session + prompt, observed over SSE.
    let session = client.create_session(&instance.id, "Hello").await.unwrap();
    assert_eq!(session.title, "Hello");
    let mut events = client.events(&instance.id).await.unwrap();

    client
        .run_agent(&instance.id, &session.id, "say hi", vec![])
        .await
        .unwrap();

    let mut saw_message_event = false;
    let mut response_content = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while response_content.is_none() {
        let remaining = deadline - tokio::time::Instant::now();
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .expect("agent response within deadline")
            .expect("stream open");
        match event.payload {
            EventPayload::Message(_) => saw_message_event = true,
            EventPayload::AgentEvent(agent_event)
                if agent_event.kind == AgentEventKind::Response =>
            {
                response_content =
                    Some(agent_event.message.expect("response message").content().to_string());
            }
            _ => {}
        }
    }
    assert!(saw_message_event, "message events precede the terminal event");
    assert_eq!(response_content.as_deref(), Some("echo: say hi"));

    // Persisted transcript is visible over the REST surface.
    let messages = client.messages(&instance.id, &session.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content(), "echo: say hi");

    let agent_session = client.agent_session(&instance.id, &session.id).await.unwrap();
    assert_eq!(agent_session.session.id, session.id);
    assert_eq!(agent_session.session.message_count, 2);

    assert_eq!(
        client.queued_prompts(&instance.id, &session.id).await.unwrap(),
        0
    );

    // Permission skip round-trip.
    assert!(!client.skip_requests(&instance.id).await.unwrap());
    client.set_skip_requests(&instance.id, true).await.unwrap();
    assert!(client.skip_requests(&instance.id).await.unwrap());

    // Teardown.
    client.delete_instance(&instance.id).await.unwrap();
    assert!(client.list_instances().await.unwrap().is_empty());

    client.shutdown_server().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server shuts down within the drain timeout")
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn health_and_errors_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("crush-test.sock");
    let (client, server, _host) =
        start_server(Scheme::Unix, socket.to_str().unwrap()).await;

    client.health().await.unwrap();

    // Unknown instance surfaces the {message} envelope.
    let err = client.agent_info("missing").await.unwrap_err();
    assert!(err.to_string().contains("instance not found"));

    // Bad instance specs are the caller's fault.
    let err = client
        .create_instance(&InstanceSpec::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("path is required"));

    client.shutdown_server().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn instance_creation_requires_valid_config() {
    let (client, server, _host) = start_server(Scheme::Tcp, "127.0.0.1:0").await;

    // A workspace without any provider config is a 400-class failure.
    let empty = tempfile::tempdir().unwrap();
    let err = client
        .create_instance(&InstanceSpec {
            path: empty.path().to_string_lossy().to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("failed to initialize config"),
        "got: {err}"
    );

    client.shutdown_server().await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(10), server).await;
}
