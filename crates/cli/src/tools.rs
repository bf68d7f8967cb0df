//! Demo tool set: geocoding, current weather, restaurant bookings.

use runtime::{Artifact, ArtifactSink, ToolCatalog, ToolContext, ToolError, ToolSpec, typed_tool};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Register every demo tool.
pub fn catalog() -> runtime::Result<ToolCatalog> {
    let http = reqwest::Client::new();
    let bookings = Bookings::default();

    ToolCatalog::new()
        .with(get_lat_long(http.clone())?)?
        .with(get_weather(http)?)?
        .with(get_booking_details(bookings.clone())?)?
        .with(create_booking(bookings.clone())?)?
        .with(delete_booking(bookings)?)
}

fn http_error(err: reqwest::Error) -> ToolError {
    ToolError::execution(err.to_string())
}

fn url_with(base: &str, params: &[(&str, String)]) -> Result<reqwest::Url, ToolError> {
    reqwest::Url::parse_with_params(base, params)
        .map_err(|e| ToolError::execution(format!("bad url: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Geocoding and weather
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PlaceArgs {
    place: String,
}

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Deserialize)]
struct GeocodingResult {
    name: String,
    latitude: f64,
    longitude: f64,
    country: Option<String>,
}

fn get_lat_long(http: reqwest::Client) -> runtime::Result<ToolSpec> {
    ToolSpec::new(
        "get_lat_long",
        "Get the latitude and longitude of a place name.",
        json!({
            "type": "object",
            "properties": {
                "place": {"type": "string", "description": "Name of a city or place"}
            },
            "required": ["place"]
        }),
        typed_tool(move |args: PlaceArgs, _cx| {
            let http = http.clone();
            async move {
                let url = url_with(
                    GEOCODING_URL,
                    &[("name", args.place.clone()), ("count", "1".into())],
                )?;
                let response: GeocodingResponse = http
                    .get(url)
                    .send()
                    .await
                    .map_err(http_error)?
                    .error_for_status()
                    .map_err(http_error)?
                    .json()
                    .await
                    .map_err(http_error)?;

                let place = response.results.into_iter().next().ok_or_else(|| {
                    ToolError::execution(format!("Could not find location {}", args.place))
                })?;
                Ok::<_, ToolError>(json!({
                    "place": place.name,
                    "country": place.country,
                    "latitude": place.latitude,
                    "longitude": place.longitude,
                }))
            }
        }),
    )
    .map(|spec| spec.with_timeout(HTTP_TIMEOUT))
}

#[derive(Deserialize)]
struct CoordinateArgs {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct ForecastResponse {
    current_weather: CurrentWeather,
}

#[derive(Deserialize)]
struct CurrentWeather {
    temperature: f64,
    windspeed: f64,
    weathercode: u32,
}

fn get_weather(http: reqwest::Client) -> runtime::Result<ToolSpec> {
    ToolSpec::new(
        "get_weather",
        "Get the current weather at a latitude and longitude.",
        json!({
            "type": "object",
            "properties": {
                "latitude": {"type": "number"},
                "longitude": {"type": "number"}
            },
            "required": ["latitude", "longitude"]
        }),
        typed_tool(move |args: CoordinateArgs, cx: ToolContext| {
            let http = http.clone();
            async move {
                let url = url_with(
                    FORECAST_URL,
                    &[
                        ("latitude", args.latitude.to_string()),
                        ("longitude", args.longitude.to_string()),
                        ("current_weather", "true".into()),
                    ],
                )?;
                let body = http
                    .get(url)
                    .send()
                    .await
                    .map_err(http_error)?
                    .error_for_status()
                    .map_err(http_error)?
                    .bytes()
                    .await
                    .map_err(http_error)?;
                let forecast: ForecastResponse = serde_json::from_slice(&body)
                    .map_err(|e| ToolError::execution(format!("bad forecast: {e}")))?;

                // Raw forecast is kept for later inspection.
                let name = format!("forecast-{:.3}-{:.3}.json", args.latitude, args.longitude);
                let location = cx
                    .artifacts
                    .store(Artifact::new(name, "application/json", body.to_vec()))
                    .await?;
                debug!(%location, "stored forecast");

                let current = forecast.current_weather;
                Ok::<_, ToolError>(json!({
                    "temperature_c": current.temperature,
                    "windspeed_kmh": current.windspeed,
                    "description": weather_description(current.weathercode),
                    "raw_forecast": location,
                }))
            }
        }),
    )
    .map(|spec| spec.with_timeout(HTTP_TIMEOUT))
}

/// WMO weather interpretation codes.
fn weather_description(code: u32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Drizzle: Light intensity",
        53 => "Drizzle: Moderate intensity",
        55 => "Drizzle: Dense intensity",
        56 => "Freezing Drizzle: Light intensity",
        57 => "Freezing Drizzle: Dense intensity",
        61 => "Rain: Slight intensity",
        63 => "Rain: Moderate intensity",
        65 => "Rain: Heavy intensity",
        66 => "Freezing Rain: Light intensity",
        67 => "Freezing Rain: Heavy intensity",
        71 => "Snow fall: Slight intensity",
        73 => "Snow fall: Moderate intensity",
        75 => "Snow fall: Heavy intensity",
        77 => "Snow grains",
        80 => "Rain showers: Slight intensity",
        81 => "Rain showers: Moderate intensity",
        82 => "Rain showers: Violent intensity",
        85 => "Snow showers: Slight intensity",
        86 => "Snow showers: Heavy intensity",
        95 => "Thunderstorm: Slight or moderate",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bookings
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Booking {
    booking_id: String,
    date: String,
    name: String,
    hour: String,
    num_guests: u32,
}

/// In-memory booking table shared by the booking tools.
#[derive(Clone, Default)]
struct Bookings(Arc<Mutex<HashMap<String, Booking>>>);

fn not_found(booking_id: &str) -> ToolError {
    ToolError::execution(format!("No booking found with ID: {booking_id}"))
}

#[derive(Deserialize)]
struct BookingIdArgs {
    booking_id: String,
}

#[derive(Deserialize)]
struct CreateBookingArgs {
    date: String,
    name: String,
    hour: String,
    num_guests: u32,
}

fn booking_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "booking_id": {"type": "string", "description": "Booking identifier"}
        },
        "required": ["booking_id"]
    })
}

fn get_booking_details(bookings: Bookings) -> runtime::Result<ToolSpec> {
    ToolSpec::new(
        "get_booking_details",
        "Get the details of an existing restaurant booking.",
        booking_id_schema(),
        typed_tool(move |args: BookingIdArgs, _cx| {
            let bookings = bookings.clone();
            async move {
                bookings
                    .0
                    .lock()
                    .await
                    .get(&args.booking_id)
                    .cloned()
                    .ok_or_else(|| not_found(&args.booking_id))
            }
        }),
    )
}

fn create_booking(bookings: Bookings) -> runtime::Result<ToolSpec> {
    ToolSpec::new(
        "create_booking",
        "Create a restaurant booking.",
        json!({
            "type": "object",
            "properties": {
                "date": {"type": "string", "description": "Date in YYYY-MM-DD format"},
                "name": {"type": "string", "description": "Name to hold the booking under"},
                "hour": {"type": "string", "description": "Time in HH:MM format"},
                "num_guests": {"type": "integer", "minimum": 1}
            },
            "required": ["date", "name", "hour", "num_guests"]
        }),
        typed_tool(move |args: CreateBookingArgs, _cx| {
            let bookings = bookings.clone();
            async move {
                if args.num_guests == 0 {
                    return Err(ToolError::InvalidInput(
                        "num_guests must be at least 1".into(),
                    ));
                }
                let booking_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
                let booking = Booking {
                    booking_id: booking_id.clone(),
                    date: args.date,
                    name: args.name,
                    hour: args.hour,
                    num_guests: args.num_guests,
                };
                bookings.0.lock().await.insert(booking_id.clone(), booking);
                Ok(json!({ "booking_id": booking_id }))
            }
        }),
    )
}

fn delete_booking(bookings: Bookings) -> runtime::Result<ToolSpec> {
    ToolSpec::new(
        "delete_booking",
        "Delete an existing restaurant booking.",
        booking_id_schema(),
        typed_tool(move |args: BookingIdArgs, _cx| {
            let bookings = bookings.clone();
            async move {
                bookings
                    .0
                    .lock()
                    .await
                    .remove(&args.booking_id)
                    .map(|_| json!({ "deleted": args.booking_id }))
                    .ok_or_else(|| not_found(&args.booking_id))
            }
        }),
    )
}
