use crate::api::{ApiResponse, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
};
use chatdigest_core::{
    ConversationEvent, DailyDigestRecord, EventKind, PreferenceUpdate, SessionPhase,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct EventRequest {
    pub author: String,
    /// `text|image|audio|video|document`, or a delivery media field such as
    /// `photo`, `voice` or `video_note`
    pub kind: String,
    pub payload: String,
    /// Seconds since the epoch
    pub timestamp: i64,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

#[derive(Debug, Serialize)]
pub struct EventAccepted {
    pub conversation_id: String,
    pub kind: EventKind,
    pub buffered: usize,
    pub phase: SessionPhase,
}

#[derive(Debug, Serialize)]
pub struct DigestView {
    pub conversation_id: String,
    pub digest: String,
}

#[derive(Debug, Serialize)]
pub struct PreferenceEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreferenceRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingFilterRequest {
    pub author: String,
}

fn parse_kind(request: &EventRequest) -> Option<EventKind> {
    request.kind.parse().ok().or_else(|| {
        EventKind::from_media_field(
            request.kind.trim(),
            request.mime_type.as_deref(),
            request.animated,
        )
    })
}

// GET /api/conversations
pub async fn list_conversations(State(state): State<AppState>) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(state.core.registry.conversation_ids()))
}

// POST /api/conversations/{id}/events
pub async fn add_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<EventRequest>,
) -> Json<ApiResponse<EventAccepted>> {
    if request.author.trim().is_empty() {
        return Json(ApiResponse::error("Event author must not be empty"));
    }
    let Some(kind) = parse_kind(&request) else {
        return Json(ApiResponse::error(format!("Unknown event kind: {}", request.kind)));
    };
    let Some(timestamp) = DateTime::from_timestamp(request.timestamp, 0) else {
        return Json(ApiResponse::error(format!(
            "Invalid timestamp: {}",
            request.timestamp
        )));
    };

    let mut event = ConversationEvent::new(request.author, kind, request.payload, timestamp);
    if let Some(caption) = request.caption {
        event = event.with_caption(caption);
    }

    let session = state.core.registry.get(&id).await;
    session.add_event(event).await;

    Json(ApiResponse::ok(EventAccepted {
        conversation_id: id,
        kind,
        buffered: session.buffered_len().await,
        phase: session.phase().await,
    }))
}

// GET /api/conversations/{id}/digest
pub async fn get_digest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ApiResponse<DigestView>> {
    let session = state.core.registry.get(&id).await;
    let digest = session.get_digest().await;
    Json(ApiResponse::ok(DigestView {
        conversation_id: id,
        digest,
    }))
}

// GET /api/conversations/{id}/history
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ApiResponse<Vec<DailyDigestRecord>>> {
    match state.core.store.list_daily_digests(&id) {
        Ok(records) => Json(ApiResponse::ok(records)),
        Err(e) => Json(ApiResponse::error(format!(
            "Failed to list daily digests: {}",
            e
        ))),
    }
}

// GET /api/conversations/{id}/preferences
pub async fn get_preferences(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ApiResponse<Vec<PreferenceEntry>>> {
    let session = state.core.registry.get(&id).await;
    let entries = session
        .preferences()
        .await
        .entries()
        .into_iter()
        .map(|(key, value)| PreferenceEntry {
            key: key.as_str().to_string(),
            value,
        })
        .collect();
    Json(ApiResponse::ok(entries))
}

// PUT /api/conversations/{id}/preferences
pub async fn update_preference(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PreferenceRequest>,
) -> Json<ApiResponse<PreferenceUpdate>> {
    let session = state.core.registry.get(&id).await;
    match session.update_preference(&request.key, &request.value).await {
        update @ PreferenceUpdate::Applied { .. } => {
            Json(ApiResponse::ok_with_message(update, "Preference updated"))
        }
        update @ PreferenceUpdate::Rejected { .. } => {
            let message = format!("Preference {} was not changed", request.key);
            Json(ApiResponse::rejected(update, message))
        }
    }
}

// POST /api/conversations/{id}/pending-filter
pub async fn add_pending_filter(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PendingFilterRequest>,
) -> Json<ApiResponse<()>> {
    if request.author.trim().is_empty() {
        return Json(ApiResponse::error("Author must not be empty"));
    }
    let session = state.core.registry.get(&id).await;
    session.add_pending_filter(&request.author).await;
    Json(ApiResponse::ok_with_message(
        (),
        format!("Next text from {} sets the topic filter", request.author),
    ))
}

// DELETE /api/conversations/{id}/pending-filter/{author}
pub async fn remove_pending_filter(
    State(state): State<AppState>,
    Path((id, author)): Path<(String, String)>,
) -> Json<ApiResponse<()>> {
    match state.core.registry.get_if_present(&id) {
        Some(session) => {
            session.remove_pending_filter(&author).await;
            Json(ApiResponse::ok(()))
        }
        None => Json(ApiResponse::error(format!("Conversation {} not found", id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::create_test_app;
    use chatdigest_core::NOTHING_TO_SUMMARIZE;

    fn text_request(author: &str, payload: &str) -> EventRequest {
        EventRequest {
            author: author.to_string(),
            kind: "text".to_string(),
            payload: payload.to_string(),
            timestamp: 1_792_141_200,
            caption: None,
            mime_type: None,
            animated: false,
        }
    }

    #[tokio::test]
    async fn test_digest_of_new_conversation_is_sentinel() {
        let (app, _notifier, _tmp_dir) = create_test_app("unused");

        let body = get_digest(State(app), Path("chat-1".to_string())).await.0;

        assert!(body.success);
        assert_eq!(body.data.unwrap().digest, NOTHING_TO_SUMMARIZE);
    }

    #[tokio::test]
    async fn test_add_event_buffers_and_digest_drains() {
        let (app, _notifier, _tmp_dir) = create_test_app("Ada greeted everyone.");

        let body = add_event(
            State(app.clone()),
            Path("chat-1".to_string()),
            Json(text_request("ada", "hi all")),
        )
        .await
        .0;
        assert!(body.success);
        let accepted = body.data.unwrap();
        assert_eq!(accepted.buffered, 1);
        assert_eq!(accepted.phase, SessionPhase::Buffering);

        let digest = get_digest(State(app.clone()), Path("chat-1".to_string())).await.0;
        assert_eq!(digest.data.unwrap().digest, "Ada greeted everyone.");

        let ids = list_conversations(State(app)).await.0;
        assert_eq!(ids.data.unwrap(), vec!["chat-1"]);
    }

    #[tokio::test]
    async fn test_media_field_kinds_are_accepted() {
        let (app, _notifier, _tmp_dir) = create_test_app("x");
        let mut request = text_request("bo", "/tmp/voice.ogg");
        request.kind = "voice".to_string();

        let body = add_event(State(app), Path("chat-1".to_string()), Json(request)).await.0;

        assert!(body.success);
        assert_eq!(body.data.unwrap().kind, EventKind::Audio);
    }

    #[tokio::test]
    async fn test_bad_events_are_rejected() {
        let (app, _notifier, _tmp_dir) = create_test_app("x");

        let mut unknown = text_request("ada", "x");
        unknown.kind = "hologram".to_string();
        let body = add_event(State(app.clone()), Path("chat-1".to_string()), Json(unknown)).await.0;
        assert!(!body.success);
        assert!(body.message.unwrap().contains("hologram"));

        let anonymous = text_request("  ", "x");
        let body = add_event(State(app.clone()), Path("chat-1".to_string()), Json(anonymous)).await.0;
        assert!(!body.success);

        let mut out_of_range = text_request("ada", "x");
        out_of_range.timestamp = i64::MAX;
        let body = add_event(State(app), Path("chat-1".to_string()), Json(out_of_range)).await.0;
        assert!(!body.success);
    }

    #[tokio::test]
    async fn test_preference_update_reports_outcome() {
        let (app, _notifier, _tmp_dir) = create_test_app("x");

        let applied = update_preference(
            State(app.clone()),
            Path("chat-1".to_string()),
            Json(PreferenceRequest {
                key: "Lingua".to_string(),
                value: "en".to_string(),
            }),
        )
        .await
        .0;
        assert!(applied.success);

        let rejected = update_preference(
            State(app.clone()),
            Path("chat-1".to_string()),
            Json(PreferenceRequest {
                key: "UnknownKey".to_string(),
                value: "x".to_string(),
            }),
        )
        .await
        .0;
        assert!(!rejected.success);
        assert!(matches!(rejected.data, Some(PreferenceUpdate::Rejected { .. })));

        let entries = get_preferences(State(app), Path("chat-1".to_string()))
            .await
            .0
            .data
            .unwrap();
        assert_eq!(entries.len(), 4);
        let language = entries.iter().find(|e| e.key == "Language").unwrap();
        assert_eq!(language.value, "en");
    }

    #[tokio::test]
    async fn test_pending_filter_roundtrip() {
        let (app, _notifier, _tmp_dir) = create_test_app("x");

        let body = add_pending_filter(
            State(app.clone()),
            Path("chat-1".to_string()),
            Json(PendingFilterRequest {
                author: "ada".to_string(),
            }),
        )
        .await
        .0;
        assert!(body.success);

        add_event(
            State(app.clone()),
            Path("chat-1".to_string()),
            Json(text_request("ada", "release plan")),
        )
        .await;

        let entries = get_preferences(State(app.clone()), Path("chat-1".to_string()))
            .await
            .0
            .data
            .unwrap();
        let topic = entries.iter().find(|e| e.key == "FilterTopic").unwrap();
        assert_eq!(topic.value, "release plan");

        let missing = remove_pending_filter(
            State(app),
            Path(("chat-404".to_string(), "ada".to_string())),
        )
        .await
        .0;
        assert!(!missing.success);
    }
}
