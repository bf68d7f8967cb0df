//! Fakes shared by the unit tests.

use crate::index::{EmbedError, Embedder, IndexEntry};
use crate::model::{Backend, ModelError, ModelReply, ModelRequest};
use crate::tools::{ToolError, ToolSpec, tool_fn, typed_tool};
use crate::{ToolCatalog, conversation::Message};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const AXES: &[&[&str]] = &[
    &["weather", "temperature", "forecast"],
    &["place", "location", "latitude", "longitude", "called", "city"],
    &["booking", "reservation", "restaurant"],
];

/// Embeds text by counting keywords per axis, so similarities are easy to
/// work out by hand.
pub struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0; AXES.len()];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
        {
            for (axis, words) in AXES.iter().enumerate() {
                if words.contains(&token.as_str()) {
                    vector[axis] += 1.0;
                }
            }
        }
        Ok(vector)
    }
}

/// Always fails, like an unreachable embedding service.
pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Network("connection refused".into()))
    }
}

/// A [`KeywordEmbedder`] that can be taken offline after the index is built.
#[derive(Clone, Default)]
pub struct SwitchableEmbedder {
    down: Arc<AtomicBool>,
}

impl SwitchableEmbedder {
    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

impl Embedder for SwitchableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(EmbedError::Network("connection refused".into()));
        }
        KeywordEmbedder.embed(text).await
    }
}

pub fn weather_corpus() -> Vec<IndexEntry> {
    vec![
        IndexEntry::new(
            "get the weather forecast for a city",
            ["get_lat_long", "get_weather"],
        )
        .unwrap(),
        IndexEntry::new("find the location of a place called X", ["get_lat_long"]).unwrap(),
        IndexEntry::new("look up a restaurant booking", ["get_booking_details"]).unwrap(),
    ]
}

#[derive(Deserialize)]
struct Place {
    place: String,
}

#[derive(Deserialize)]
struct Coordinates {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct BookingId {
    booking_id: String,
}

/// Catalog with canned geocoding, weather, and booking tools.
pub fn demo_catalog() -> ToolCatalog {
    let object = json!({"type": "object"});
    ToolCatalog::new()
        .with(
            ToolSpec::new(
                "get_lat_long",
                "Latitude and longitude of a place name.",
                object.clone(),
                typed_tool(|args: Place, _cx| async move {
                    Ok::<_, ToolError>(json!({
                        "place": args.place,
                        "latitude": 47.6062,
                        "longitude": -122.3321,
                    }))
                }),
            )
            .unwrap(),
        )
        .unwrap()
        .with(
            ToolSpec::new(
                "get_weather",
                "Current weather at a coordinate.",
                object.clone(),
                typed_tool(|args: Coordinates, _cx| async move {
                    Ok::<_, ToolError>(json!({
                        "latitude": args.latitude,
                        "longitude": args.longitude,
                        "temperature_c": 12.5,
                    }))
                }),
            )
            .unwrap(),
        )
        .unwrap()
        .with(
            ToolSpec::new(
                "get_booking_details",
                "Details of a restaurant booking.",
                object,
                typed_tool(|args: BookingId, _cx| async move {
                    Err::<Value, _>(ToolError::execution(format!(
                        "No booking found with ID: {}",
                        args.booking_id
                    )))
                }),
            )
            .unwrap(),
        )
        .unwrap()
        .with(
            ToolSpec::new(
                "slow_tool",
                "Never finishes in time.",
                json!({"type": "object"}),
                tool_fn(|_, cx| async move {
                    cx.cancellation.cancelled().await;
                    Ok::<_, ToolError>(Value::Null)
                }),
            )
            .unwrap(),
        )
        .unwrap()
}

/// What the backend was shown on one call.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub tools: Vec<String>,
    pub messages: Vec<Message>,
    pub system: Option<String>,
}

/// Replays canned replies in order and records each request.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<ModelReply>>,
    repeat: Option<ModelReply>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = ModelReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Returns the same reply forever.
    pub fn repeating(reply: ModelReply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Backend for ScriptedBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelReply, ModelError> {
        self.seen.lock().unwrap().push(SeenRequest {
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            messages: request.messages.to_vec(),
            system: request.system.map(str::to_string),
        });
        if let Some(reply) = &self.repeat {
            return Ok(reply.clone());
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::InvalidResponse("script exhausted".into()))
    }
}
