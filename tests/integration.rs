use agent_chat_client::{
    agent::{AgentHttpClient, AgentTransport, Event},
    app::{App, SendOptions},
    models::RunRequest,
    response::{process, ResponseAccumulator},
    stream::{CollectingObserver, SessionState, StreamSession},
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> AgentHttpClient {
    AgentHttpClient::new(server.uri(), Duration::from_secs(5))
}

fn tool_turn() -> serde_json::Value {
    json!([
        {
            "author": "banker",
            "invocationId": "inv-1",
            "content": { "parts": [
                { "text": "Checking your balance", "thought": true },
                { "functionCall": { "id": "c1", "name": "get_balance", "args": { "account": "chk" } } }
            ] }
        },
        {
            "author": "banker",
            "content": { "parts": [
                { "functionResponse": { "id": "c1", "name": "get_balance", "response": { "amount": 42 } } }
            ] },
            "actions": { "stateDelta": { "last_account": "chk" } }
        },
        {
            "author": "banker",
            "content": { "parts": [{ "text": "Your balance is $42." }] },
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15 },
            "turnComplete": true
        }
    ])
}

fn sse_body(events: &serde_json::Value) -> String {
    events
        .as_array()
        .unwrap()
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect()
}

#[tokio::test]
async fn test_buffered_run_end_to_end() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/run"))
        .and(body_partial_json(json!({ "appName": "bank", "streaming": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_turn()))
        .expect(1)
        .mount(&server)
        .await;

    let events = client(&server)
        .run(&RunRequest::user_text("bank", "u1", "s1", "balance?"))
        .await
        .unwrap();
    let response = process(&events, false);

    assert_eq!(response.text_content, "Your balance is $42.");
    assert!(response.metadata.has_thoughts);
    assert!(response.metadata.turn_complete);
    assert_eq!(response.metadata.author.as_deref(), Some("banker"));
    assert_eq!(response.metadata.state_delta.get("last_account"), Some(&json!("chk")));
    assert_eq!(response.usage.as_ref().unwrap().total_token_count, Some(15));

    let tools = response.tool_activity.unwrap();
    let pairs = tools.pairs();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0.name, "get_balance");
    assert_eq!(pairs[0].1.unwrap().result.get("amount"), Some(&json!(42)));
}

#[tokio::test]
async fn test_streamed_run_matches_buffered_run() {
    let server = MockServer::start().await;
    let events = tool_turn();

    Mock::given(method("POST"))
        .and(path("/run_sse"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&events)),
        )
        .mount(&server)
        .await;

    let transport = client(&server);
    let request = RunRequest::user_text("bank", "u1", "s1", "balance?").with_streaming(true);

    let mut accumulator = ResponseAccumulator::new(false);
    let summary = StreamSession::new()
        .run(&transport, &request, &mut accumulator)
        .await;

    assert_eq!(summary.state, SessionState::Completed);
    assert_eq!(summary.events, 3);

    let buffered: Vec<Event> = serde_json::from_value(events).unwrap();
    assert_eq!(accumulator.finish(), process(&buffered, false));
}

#[tokio::test]
async fn test_stream_http_error_fails_session_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/run_sse"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let mut observer = CollectingObserver::default();
    let summary = StreamSession::new()
        .run(
            &client(&server),
            &RunRequest::user_text("bank", "u1", "s1", "hi").with_streaming(true),
            &mut observer,
        )
        .await;

    assert_eq!(summary.state, SessionState::Failed);
    assert!(!observer.completed);
    assert!(observer.events.is_empty());
    assert_eq!(observer.error.unwrap().status(), Some(503));
}

#[tokio::test]
async fn test_app_over_http_creates_session_and_streams() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/apps/bank/users/u1/sessions/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "s1" })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/run_sse"))
        .and(body_partial_json(json!({ "sessionId": "s1", "streaming": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(
                    "data: {\"partial\":true,\"content\":{\"parts\":[{\"text\":\"Hi \"}]}}\n\n\
                     data: {\"partial\":true,\"content\":{\"parts\":[{\"text\":\"there\"}]}}\n\n\
                     data: {\"content\":{\"parts\":[{\"text\":\"Hi there\"}]},\"turnComplete\":true}\n\n",
                ),
        )
        .mount(&server)
        .await;

    let app = App::with_transport(Box::new(client(&server)), "bank", "u1", "s1");
    app.ensure_session(None).await.unwrap();

    let mut live = String::new();
    let response = app
        .send_streaming(
            "hello",
            SendOptions::default(),
            CancellationToken::new(),
            |text| live.push_str(text),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(live, "Hi there");
    assert_eq!(response.text_content, "Hi there");
    assert!(response.metadata.turn_complete);
}
