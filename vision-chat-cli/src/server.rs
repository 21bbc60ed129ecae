use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde::Deserialize;
use vision_chat::{ChatBot, ChatInterface, ChatMessage, ExamplePrompt, History, StreamExt};

#[derive(Clone)]
struct AppState {
    bot: ChatBot,
    interface: Arc<ChatInterface>,
}

impl AppState {
    /// The example file with the given name, if there is one.
    fn asset(&self, file: &str) -> Option<PathBuf> {
        self.interface
            .examples
            .iter()
            .flat_map(|example| &example.files)
            .find(|path| path.file_name().is_some_and(|name| name == file))
            .cloned()
    }
}

#[derive(Deserialize)]
struct ChatRequest {
    message: ChatMessage,
    #[serde(default)]
    history: History,
}

fn router(bot: ChatBot, examples: Vec<ExamplePrompt>) -> Router {
    let interface = Arc::new(bot.interface().with_examples(examples));
    Router::new()
        .route("/api/info", get(info))
        .route("/api/chat", post(chat))
        .route("/assets/:file", get(asset))
        .with_state(AppState { bot, interface })
}

/// Serve the chat until the process is stopped.
pub(crate) async fn serve(
    addr: SocketAddr,
    bot: ChatBot,
    examples: Vec<ExamplePrompt>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Serving the chat on http://{}", listener.local_addr()?);
    axum::serve(listener, router(bot, examples)).await?;
    Ok(())
}

async fn info(State(state): State<AppState>) -> Json<ChatInterface> {
    Json(state.interface.as_ref().clone())
}

/// Streams the growing answer as json encoded strings, followed by a `done` event. Closing the
/// connection stops generation.
async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let response = match state.bot.respond(&request.message, &request.history) {
        Ok(response) => response,
        Err(err) if err.is_user_facing() => {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
        Err(err) => {
            tracing::error!("Failed to start a response: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let events = response.map(|buffer| {
        let event = match buffer {
            Ok(buffer) => Event::default()
                .json_data(buffer)
                .unwrap_or_else(|err| Event::default().event("error").data(err.to_string())),
            Err(err) => Event::default().event("error").data(err.to_string()),
        };
        Ok::<_, Infallible>(event)
    });
    let done = stream::once(async { Ok(Event::default().event("done").data("[DONE]")) });
    Sse::new(events.chain(done))
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn asset(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    let Some(path) = state.asset(&file) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&file))], bytes).into_response(),
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}", path.display());
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

fn content_type(file: &str) -> &'static str {
    let extension = file
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use crate::testing::{greeter_bot, test_dir};
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        router(greeter_bot(), vision_chat::default_examples(dir))
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::post("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn info_describes_the_chat() {
        let dir = test_dir("info");
        let response = app(&dir)
            .oneshot(Request::get("/api/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let info: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(info["title"], "glm-edge-v-2b");
        assert_eq!(info["stop_button"], "Stop Generation");
        assert_eq!(info["examples"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn chat_without_an_image_is_rejected() {
        let dir = test_dir("missing");
        let response = app(&dir)
            .oneshot(chat_request(serde_json::json!({
                "message": {"text": "What is the text saying?"},
                "history": []
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "You need to upload an image for glm-edge-v-2b to work. Close the error and try again with an Image."
        );
    }

    #[tokio::test]
    async fn chat_streams_the_growing_answer() {
        let dir = test_dir("stream");
        let image = dir.join("small.png");
        let response = app(&dir)
            .oneshot(chat_request(serde_json::json!({
                "message": {"text": "What is the text saying?", "files": [image]},
                "history": []
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let body = body_text(response).await;
        assert!(body.contains(r#"data: "Hello there\n""#), "{body}");
        assert!(body.ends_with("event: done\ndata: [DONE]\n\n"), "{body}");
    }

    #[tokio::test]
    async fn only_example_assets_are_served() {
        let dir = test_dir("assets");
        let response = app(&dir)
            .oneshot(Request::get("/assets/small.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let response = app(&dir)
            .oneshot(Request::get("/assets/Cargo.toml").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type("chart.PNG"), "image/png");
        assert_eq!(content_type("photo.jpeg"), "image/jpeg");
        assert_eq!(content_type("notes"), "application/octet-stream");
    }
}
