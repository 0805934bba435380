//! HTTP and WebSocket surface over the build coordinator.

use anyhow::Result;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bldr_core::backends::RemoteCommandRunner;
use bldr_core::{BuildCoordinator, BuildRequest, Error as CoreError, ProgressEvent, Session};
use bldr_db::SharedStore;
use bldr_llm::BuildMode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::app::App;
use crate::config::ServeArgs;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: BuildCoordinator,
    pub store: SharedStore,
    /// Provider used when a build request does not name one.
    pub default_provider: String,
    pub sandbox: Option<RemoteCommandRunner>,
}

pub async fn serve(app: App, args: ServeArgs) -> Result<()> {
    recover_interrupted(&app.store)?;

    let state = AppState {
        coordinator: app.coordinator,
        store: app.store,
        default_provider: args.provider,
        sandbox: app.sandbox,
    };
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(addr = %args.listen, "HTTP/WebSocket listening");
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Fail builds a previous server left unfinished. Only `serve` does this:
/// other subcommands share the database with a running server.
fn recover_interrupted(store: &SharedStore) -> Result<usize> {
    let interrupted = store.with(|s| s.builds().fail_interrupted("server restarted"))?;
    if interrupted > 0 {
        tracing::warn!(count = interrupted, "marked interrupted builds as failed");
    }
    Ok(interrupted)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/providers", get(list_providers))
        .route("/api/projects/{project_id}/builds", post(start_build))
        .route(
            "/api/projects/{project_id}/builds/latest",
            get(latest_build),
        )
        .route("/api/active-build/{project_id}", get(active_build))
        .route("/api/build-progress/{build_id}", get(build_progress))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/{id}", get(get_conversation))
        .route("/api/conversations/{id}/rollback", post(rollback_conversation))
        .route(
            "/api/conversations/{id}/checkpoints",
            get(list_checkpoints).post(create_checkpoint),
        )
        .route("/ws/projects/{project_id}", get(project_socket))
        .layer(cors)
        .with_state(state)
}

/// A core error rendered as `{"error": "..."}` with a matching status code.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::EmptyPrompt | CoreError::InvalidProjectId(_) | CoreError::InvalidPath(_) => {
                StatusCode::BAD_REQUEST
            }
            CoreError::ConversationNotFound(_) | CoreError::MessageNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            CoreError::InvalidRollback { .. } | CoreError::BuildInProgress { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": what }))).into_response()
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let sandbox_status = match &state.sandbox {
        None => "not_configured",
        Some(sandbox) if sandbox.health().await => "connected",
        Some(_) => "unreachable",
    };
    Json(json!({ "status": "ok", "sandboxStatus": sandbox_status }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderInfo {
    id: String,
    name: String,
    default_model: String,
    configured: bool,
}

async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    let providers = state
        .coordinator
        .registry()
        .known_providers()
        .into_iter()
        .map(|p| ProviderInfo {
            id: p.id,
            name: p.name,
            default_model: p.default_model,
            configured: p.configured,
        })
        .collect();
    Json(providers)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBuildInput {
    prompt: String,
    conversation_id: Option<String>,
    #[serde(default)]
    mode: BuildMode,
    provider: Option<String>,
    #[serde(default)]
    thinking: bool,
    #[serde(default)]
    high_power: bool,
    #[serde(default)]
    web_search: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartBuildOutput {
    build_id: String,
    conversation_id: String,
    /// True when the project already had a build running and this request
    /// joined it instead of starting a new one.
    attached: bool,
}

impl StartBuildInput {
    fn into_request(self, project_id: String, default_provider: &str) -> BuildRequest {
        let provider = self.provider.unwrap_or_else(|| default_provider.to_string());
        let mut request = BuildRequest::new(project_id, provider, self.prompt);
        request.conversation_id = self.conversation_id;
        request.mode = self.mode;
        request.thinking = self.thinking;
        request.high_power = self.high_power;
        request.web_search = self.web_search;
        request
    }
}

fn begin_build(
    state: &AppState,
    request: BuildRequest,
) -> std::result::Result<StartBuildOutput, CoreError> {
    let start = state.coordinator.start_build(request)?;
    let handle = start.handle();
    Ok(StartBuildOutput {
        build_id: handle.build_id().to_string(),
        conversation_id: handle.conversation_id().to_string(),
        attached: start.is_attached(),
    })
}

async fn start_build(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(input): Json<StartBuildInput>,
) -> ApiResult<(StatusCode, Json<StartBuildOutput>)> {
    let request = input.into_request(project_id, &state.default_provider);
    let output = begin_build(&state, request)?;
    let status = if output.attached {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(output)))
}

async fn active_build(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Response {
    match state.coordinator.active_build(&project_id) {
        Some(handle) => Json(json!({
            "buildId": handle.build_id(),
            "conversationId": handle.conversation_id(),
            "progress": handle.snapshot(),
            "draft": handle.draft(),
        }))
        .into_response(),
        None => not_found("no active build"),
    }
}

async fn build_progress(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> ApiResult<Response> {
    Ok(match state.coordinator.progress(&build_id)? {
        Some(progress) => Json(progress).into_response(),
        None => not_found("build not found"),
    })
}

async fn latest_build(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Response> {
    let latest = state
        .store
        .with(|s| s.builds().latest_for_project(&project_id))
        .map_err(CoreError::from)?;
    Ok(match latest {
        Some(progress) => Json(progress).into_response(),
        None => not_found("no builds for project"),
    })
}

#[derive(Deserialize, Default)]
struct CreateConversationInput {
    title: Option<String>,
}

async fn list_conversations(State(state): State<AppState>) -> ApiResult<Response> {
    let conversations = state.coordinator.conversations().list()?;
    Ok(Json(conversations).into_response())
}

async fn create_conversation(
    State(state): State<AppState>,
    input: Option<Json<CreateConversationInput>>,
) -> ApiResult<(StatusCode, Response)> {
    let input = input.map(|Json(input)| input).unwrap_or_default();
    let conversation = state
        .coordinator
        .conversations()
        .create_conversation(input.title.as_deref())?;
    Ok((StatusCode::CREATED, Json(conversation).into_response()))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    match state.coordinator.conversations().get(&id)? {
        Some(conversation) => Ok(Json(conversation).into_response()),
        None => Err(CoreError::ConversationNotFound(id).into()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RollbackInput {
    message_id: String,
}

async fn rollback_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<RollbackInput>,
) -> ApiResult<Json<Value>> {
    let remaining = state
        .coordinator
        .conversations()
        .rollback(&id, &input.message_id)?;
    Ok(Json(json!({ "messageCount": remaining })))
}

async fn list_checkpoints(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let checkpoints = state.coordinator.conversations().checkpoints(&id)?;
    Ok(Json(checkpoints).into_response())
}

async fn create_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Response)> {
    let checkpoint = state.coordinator.conversations().create_checkpoint(&id)?;
    Ok((StatusCode::CREATED, Json(checkpoint).into_response()))
}

async fn project_socket(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let (out, outgoing) = mpsc::unbounded_channel();
    let client = SocketClient::new(state, project_id, out);
    // Late joiners get the running build's current position first.
    let current = client
        .state
        .coordinator
        .active_build(&client.project_id)
        .map(|handle| {
            let snapshot = handle.snapshot();
            ProgressEvent::Progress {
                project_id: snapshot.project_id,
                build_id: snapshot.build_id,
                step: snapshot.current_step_description,
                progress: snapshot.progress_percent,
            }
        });
    ws.on_upgrade(move |socket| run_socket(socket, client, current, outgoing))
}

/// A request sent by a socket client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum ClientMessage {
    /// Start a build in the client's active conversation.
    Build(StartBuildInput),
    /// Start a fresh conversation and stop following the current build.
    NewConversation,
    SwitchConversation { conversation_id: String },
}

/// Replies to [`ClientMessage`]s. Progress events share the socket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum ClientReply {
    BuildStarted(StartBuildOutput),
    Conversation { conversation_id: String },
    RequestFailed { message: String },
}

/// One socket client: its [`Session`] and the task forwarding project
/// events to it.
struct SocketClient {
    state: AppState,
    project_id: String,
    session: Session,
    out: mpsc::UnboundedSender<ProgressEvent>,
}

impl SocketClient {
    fn new(state: AppState, project_id: String, out: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        let session = Session::new(state.coordinator.conversations().clone());
        let client = Self {
            state,
            project_id,
            session,
            out,
        };
        client.follow(None);
        client
    }

    /// Forward the project's events, skipping those of `ignored_build`.
    fn follow(&self, ignored_build: Option<String>) {
        let events = self.state.coordinator.subscribe(&self.project_id);
        let task = forward_events(events, ignored_build, self.out.clone());
        self.session.track(&task);
    }

    fn handle(&self, message: ClientMessage) -> ClientReply {
        match self.try_handle(message) {
            Ok(reply) => reply,
            Err(e) => ClientReply::RequestFailed {
                message: e.to_string(),
            },
        }
    }

    fn try_handle(&self, message: ClientMessage) -> std::result::Result<ClientReply, CoreError> {
        match message {
            ClientMessage::Build(input) => {
                match input.conversation_id.as_deref() {
                    Some(id) if self.session.active_conversation().as_deref() != Some(id) => {
                        self.session.switch_to(id)?;
                        self.follow(None);
                    }
                    _ => {}
                }
                let conversation_id = self.session.ensure_conversation()?;
                let mut request =
                    input.into_request(self.project_id.clone(), &self.state.default_provider);
                request.conversation_id = Some(conversation_id);
                Ok(ClientReply::BuildStarted(begin_build(&self.state, request)?))
            }
            ClientMessage::NewConversation => {
                let running = self
                    .state
                    .coordinator
                    .active_build(&self.project_id)
                    .map(|handle| handle.build_id().to_string());
                let conversation = self.session.new_conversation()?;
                // The running build goes on without this client.
                self.follow(running);
                Ok(ClientReply::Conversation {
                    conversation_id: conversation.id,
                })
            }
            ClientMessage::SwitchConversation { conversation_id } => {
                self.session.switch_to(&conversation_id)?;
                self.follow(None);
                Ok(ClientReply::Conversation { conversation_id })
            }
        }
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.session.abandon_tracking();
        self.state.coordinator.hub().prune(&self.project_id);
    }
}

fn forward_events(
    mut events: broadcast::Receiver<ProgressEvent>,
    ignored_build: Option<String>,
    out: mpsc::UnboundedSender<ProgressEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if ignored_build.as_deref() == Some(event.build_id()) {
                        continue;
                    }
                    if out.send(event).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "progress socket lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn run_socket(
    mut socket: WebSocket,
    client: SocketClient,
    current: Option<ProgressEvent>,
    mut outgoing: mpsc::UnboundedReceiver<ProgressEvent>,
) {
    let project_id = client.project_id.clone();
    tracing::debug!(project_id = %project_id, "progress socket opened");
    if let Some(event) = current
        && send_json(&mut socket, &event).await.is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            event = outgoing.recv() => match event {
                Some(event) => {
                    if send_json(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(message) => client.handle(message),
                        Err(e) => ClientReply::RequestFailed {
                            message: format!("invalid message: {e}"),
                        },
                    };
                    if send_json(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!(project_id = %project_id, "progress socket closed");
}

async fn send_json(socket: &mut WebSocket, payload: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string(payload)?;
    socket.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use bldr_core::{BuildProgress, BuildStatus, BuildStore, CoordinatorConfig, DirectoryProjects};
    use bldr_db::Store;
    use bldr_llm::{
        Action, LanguageModel, LanguageModelBackend, ModelProvider, ModelProviderBackend,
        ModelRequest, Plan, PlanResponse,
    };
    use bldr_llm_registry::{ProviderOptions, ProviderRegistration, Registry};
    use tower::ServiceExt;

    use super::*;

    struct FixedProvider;

    struct FixedModel;

    impl ModelProviderBackend for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn model(&self, _model_id: &str) -> LanguageModel {
            LanguageModel::new(FixedModel)
        }
    }

    impl LanguageModelBackend for FixedModel {
        fn model_id(&self) -> &str {
            "fixed-1"
        }

        fn provider(&self) -> &str {
            "fixed"
        }

        fn plan(&self, _request: &ModelRequest) -> PlanResponse {
            PlanResponse::from_plan(Plan {
                content: "Created the landing page.".into(),
                actions: vec![Action::create_file("/index.html", "<h1>hi</h1>\n")],
                ..Default::default()
            })
        }
    }

    fn fixed_factory(
        _options: ProviderOptions,
    ) -> std::result::Result<ModelProvider, bldr_llm_registry::Error> {
        Ok(ModelProvider::new(FixedProvider))
    }

    struct Fixture {
        state: AppState,
        projects: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let projects = tempfile::tempdir().expect("tempdir");
        let store = Store::open_in_memory().expect("open").into_shared();

        let mut registry = Registry::new();
        registry.add_provider(
            ProviderRegistration::new("fixed", "Fixed", "fixed-1"),
            fixed_factory,
        );
        registry.add_provider(
            ProviderRegistration::new("locked", "Locked", "locked-1")
                .with_credential_env("BLDR_TEST_NEVER_SET_API_KEY"),
            fixed_factory,
        );

        let coordinator = BuildCoordinator::new(
            Arc::new(registry),
            Arc::new(DirectoryProjects::new(projects.path())),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            CoordinatorConfig {
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
        );
        Fixture {
            state: AppState {
                coordinator,
                store,
                default_provider: "fixed".into(),
                sandbox: None,
            },
            projects,
        }
    }

    async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        let resp = app_router(state.clone()).oneshot(req).await.expect("response");
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        let payload = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("json")
        };
        (status, payload)
    }

    async fn wait_finished(state: &AppState, build_id: &str) -> bldr_core::BuildProgress {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(progress) = state.coordinator.progress(build_id).expect("progress")
                    && progress.is_finished()
                {
                    return progress;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("build timeout")
    }

    async fn until_terminal(
        outgoing: &mut mpsc::UnboundedReceiver<ProgressEvent>,
    ) -> Vec<ProgressEvent> {
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut seen = Vec::new();
            while let Some(event) = outgoing.recv().await {
                let terminal = event.is_terminal();
                seen.push(event);
                if terminal {
                    break;
                }
            }
            seen
        })
        .await
        .expect("terminal event")
    }

    fn client_message(value: Value) -> ClientMessage {
        serde_json::from_value(value).expect("client message")
    }

    fn started(reply: ClientReply) -> StartBuildOutput {
        match reply {
            ClientReply::BuildStarted(output) => output,
            other => panic!("expected a started build, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let f = fixture();
        let (status, payload) = send(&f.state, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["sandboxStatus"], "not_configured");
    }

    #[tokio::test]
    async fn health_reports_an_unreachable_sandbox() {
        let mut f = fixture();
        f.state.sandbox = Some(RemoteCommandRunner::new("http://127.0.0.1:1").expect("client"));
        let (status, payload) = send(&f.state, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["sandboxStatus"], "unreachable");
    }

    #[tokio::test]
    async fn project_busy_in_another_process_is_a_conflict() {
        let f = fixture();
        let mut elsewhere = BuildProgress::new("remote", "site");
        elsewhere
            .advance(BuildStatus::Building, "Applying")
            .expect("advance");
        BuildStore::save(&f.state.store, &elsewhere).expect("save");

        let (status, payload) = send(
            &f.state,
            "POST",
            "/api/projects/site/builds",
            Some(json!({ "prompt": "Make a landing page" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(payload["error"].as_str().expect("error").contains("remote"));

        assert_eq!(recover_interrupted(&f.state.store).expect("recover"), 1);
        let (status, _) = send(
            &f.state,
            "POST",
            "/api/projects/site/builds",
            Some(json!({ "prompt": "Make a landing page" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn socket_builds_stay_in_the_client_conversation() {
        let f = fixture();
        let (out, mut outgoing) = mpsc::unbounded_channel();
        let client = SocketClient::new(f.state.clone(), "site".into(), out);

        let first = started(client.handle(client_message(
            json!({ "type": "build", "prompt": "Make a landing page" }),
        )));
        assert_eq!(
            client.session.active_conversation().as_deref(),
            Some(first.conversation_id.as_str())
        );
        let events = until_terminal(&mut outgoing).await;
        assert!(events.iter().all(|e| e.build_id() == first.build_id));
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Complete { .. })));

        let second = started(client.handle(client_message(
            json!({ "type": "build", "prompt": "Add a footer" }),
        )));
        assert_eq!(second.conversation_id, first.conversation_id);
        assert_ne!(second.build_id, first.build_id);
        until_terminal(&mut outgoing).await;

        let reply = client.handle(client_message(
            json!({ "type": "switch_conversation", "conversationId": "missing" }),
        ));
        assert!(
            matches!(&reply, ClientReply::RequestFailed { message } if message.contains("not found")),
            "{reply:?}"
        );
    }

    #[tokio::test]
    async fn new_conversation_stops_following_the_running_build() {
        let f = fixture();
        let (out, mut outgoing) = mpsc::unbounded_channel();
        let client = SocketClient::new(f.state.clone(), "site".into(), out);

        let build = started(client.handle(client_message(
            json!({ "type": "build", "prompt": "Make a landing page" }),
        )));
        let ClientReply::Conversation { conversation_id } =
            client.handle(client_message(json!({ "type": "new_conversation" })))
        else {
            panic!("expected a conversation reply");
        };
        assert_ne!(conversation_id, build.conversation_id);

        // The build goes on server-side; the client no longer hears of it.
        let progress = wait_finished(&f.state, &build.build_id).await;
        assert_eq!(progress.status, BuildStatus::Completed);
        tokio::task::yield_now().await;
        assert!(outgoing.try_recv().is_err());
    }

    #[tokio::test]
    async fn build_route_applies_the_plan() {
        let f = fixture();
        let (status, payload) = send(
            &f.state,
            "POST",
            "/api/projects/site/builds",
            Some(json!({ "prompt": "Make a landing page" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(payload["attached"], false);
        let build_id = payload["buildId"].as_str().expect("build id").to_string();
        let conversation_id = payload["conversationId"]
            .as_str()
            .expect("conversation id")
            .to_string();

        let progress = wait_finished(&f.state, &build_id).await;
        assert_eq!(progress.status, BuildStatus::Completed);
        assert_eq!(progress.files_modified, 1);
        let written =
            std::fs::read_to_string(f.projects.path().join("site/index.html")).expect("file");
        assert_eq!(written, "<h1>hi</h1>\n");

        let (status, payload) =
            send(&f.state, "GET", &format!("/api/build-progress/{build_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "completed");
        assert_eq!(payload["progressPercent"], 100);

        let (status, payload) = send(
            &f.state,
            "GET",
            &format!("/api/conversations/{conversation_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let messages = payload["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["content"], "Created the landing page.");

        let (status, _) = send(&f.state, "GET", "/api/active-build/site", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, payload) =
            send(&f.state, "GET", "/api/projects/site/builds/latest", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["buildId"], build_id.as_str());
    }

    #[tokio::test]
    async fn missing_credentials_end_in_a_fallback_message() {
        let f = fixture();
        let (status, payload) = send(
            &f.state,
            "POST",
            "/api/projects/site/builds",
            Some(json!({ "prompt": "Make a landing page", "provider": "locked" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let build_id = payload["buildId"].as_str().expect("build id").to_string();

        let progress = wait_finished(&f.state, &build_id).await;
        assert_eq!(progress.status, BuildStatus::Error);

        let conversation_id = payload["conversationId"].as_str().expect("conversation id");
        let (_, payload) = send(
            &f.state,
            "GET",
            &format!("/api/conversations/{conversation_id}"),
            None,
        )
        .await;
        let messages = payload["messages"].as_array().expect("messages");
        assert_eq!(messages.last().expect("fallback")["role"], "system");
    }

    #[tokio::test]
    async fn invalid_build_requests_are_rejected() {
        let f = fixture();
        let (status, payload) = send(
            &f.state,
            "POST",
            "/api/projects/site/builds",
            Some(json!({ "prompt": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(payload["error"].as_str().expect("error").contains("empty"));

        let (status, _) = send(
            &f.state,
            "POST",
            "/api/projects/..%2Fetc/builds",
            Some(json!({ "prompt": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &f.state,
            "POST",
            "/api/projects/site/builds",
            Some(json!({ "prompt": "hello", "conversationId": "missing" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn conversations_can_be_rolled_back() {
        let f = fixture();
        let (status, created) = send(
            &f.state,
            "POST",
            "/api/conversations",
            Some(json!({ "title": "Landing page" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().expect("id").to_string();

        let store = f.state.coordinator.conversations();
        let first = bldr_llm::Message::user("one");
        let first_id = first.id.clone();
        store.append(&id, first).expect("append");
        store
            .append(&id, bldr_llm::Message::assistant("two"))
            .expect("append");

        let (status, payload) = send(
            &f.state,
            "POST",
            &format!("/api/conversations/{id}/rollback"),
            Some(json!({ "messageId": first_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["messageCount"], 0);

        let (status, _) = send(
            &f.state,
            "POST",
            &format!("/api/conversations/{id}/rollback"),
            Some(json!({ "messageId": "gone" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, payload) = send(&f.state, "GET", "/api/conversations", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload[0]["title"], "Landing page");
    }

    #[tokio::test]
    async fn unknown_builds_are_not_found() {
        let f = fixture();
        let (status, _) = send(&f.state, "GET", "/api/build-progress/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&f.state, "GET", "/api/active-build/site", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
