use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{ApiResponse, Color, PortInfo, PresetId, WledCommand};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use wled_bridge::prelude::*;

#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<dyn Transport>,
    pub scheduler: RevertScheduler,
}

impl AppState {
    pub fn new(transport: Arc<dyn Transport>, policy: RevertPolicy) -> Self {
        Self {
            scheduler: RevertScheduler::new(transport.clone(), policy),
            transport,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/list-ports", get(list_ports))
        .route("/send-color", post(send_color))
        .route("/color", get(color_from_query))
        .route("/color/:colorname", get(color_by_name))
        .route("/preset", get(missing_preset))
        .route("/preset/:number", get(set_preset))
        .route("/send-json", post(send_json))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// A [`BridgeError`] on its way back to the HTTP caller
pub struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(error: BridgeError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BridgeError::MissingParameters(_) | BridgeError::InvalidParameters(_) => {
                StatusCode::BAD_REQUEST
            }
            // Listing failures are reported in the body, not the status
            BridgeError::PortEnumeration(_) => StatusCode::OK,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if self.0.is_client_error() {
            warn!("Rejected request: {}", self.0);
        } else {
            error!("Request failed: {}", self.0);
        }

        (status, Json(ApiResponse::fail(self.0.to_string()))).into_response()
    }
}

type ApiResult<T = String> = Result<Json<ApiResponse<T>>, ApiError>;

fn for_how_long(duration: Option<RevertDuration>) -> String {
    match duration {
        Some(duration) => format!("for {} seconds", duration),
        None => "indefinitely".to_string(),
    }
}

/// Write `command` in the background. The caller has usually been answered
/// by the time the port is open, so failures only end up in the log.
fn dispatch(state: &AppState, command: WledCommand) {
    let transport = state.transport.clone();
    tokio::spawn(async move {
        if let Err(e) = transport.send(&command).await {
            error!("Failed to send command to {}: {}", transport.device(), e);
        }
    });
}

/// List the serial ports on this machine
async fn list_ports(State(state): State<AppState>) -> ApiResult<Vec<PortInfo>> {
    let transport = state.transport.clone();
    let ports = tokio::task::spawn_blocking(move || transport.list_ports())
        .await
        .map_err(|e| BridgeError::PortEnumeration(e.to_string()))??;

    Ok(Json(ApiResponse::ok(ports)))
}

#[derive(Debug, Deserialize)]
struct SendColorBody {
    #[serde(rename = "portPath")]
    port_path: Option<String>,
    color: Option<Color>,
}

/// Open the given port and keep it open for the red then blue sequence
async fn send_color(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let missing = || BridgeError::MissingParameters(MISSING_PORT_OR_COLOR);

    let body: SendColorBody = serde_json::from_slice(&body).map_err(|_| missing())?;
    let port_path = body
        .port_path
        .filter(|path| !path.trim().is_empty())
        .ok_or_else(missing)?;
    let color = body.color.ok_or_else(missing)?;

    info!("🔌 Starting color session on {} with {}", port_path, color);

    let transport = state.transport.clone();
    tokio::spawn(async move {
        if let Err(e) = transport.run_session(&port_path, red_then_blue(color)).await {
            error!("Color session on {} failed: {}", port_path, e);
        }
    });

    Ok(Json(ApiResponse::ok("Color command sent".to_string())))
}

#[derive(Debug, Default, Deserialize)]
struct ColorQuery {
    r: Option<String>,
    g: Option<String>,
    b: Option<String>,
    color: Option<String>,
    duration: Option<String>,
}

/// `/color/:colorname`, RGB query values are still honoured when the name is
/// unknown
async fn color_by_name(
    State(state): State<AppState>,
    Path(colorname): Path<String>,
    Query(query): Query<ColorQuery>,
) -> ApiResult {
    set_color(&state, Some(colorname), query)
}

/// `/color?r=&g=&b=` or `/color?color=`
async fn color_from_query(
    State(state): State<AppState>,
    Query(mut query): Query<ColorQuery>,
) -> ApiResult {
    let name = query.color.take();
    set_color(&state, name, query)
}

fn set_color(state: &AppState, name: Option<String>, query: ColorQuery) -> ApiResult {
    let color = ColorRequest {
        name,
        r: query.r,
        g: query.g,
        b: query.b,
    }
    .resolve()?;
    let duration = parse_duration(query.duration.as_deref())?;

    state.scheduler.supersede();

    // The revert is armed only once the color has actually been written
    let command = color_command(color);
    let transport = state.transport.clone();
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = transport.send(&command).await {
            error!("Failed to send color to {}: {}", transport.device(), e);
        }
        if let Some(duration) = duration {
            scheduler.arm(duration.delay);
        }
    });

    info!("🎨 Color set to {} {}", color, for_how_long(duration));

    Ok(Json(ApiResponse::ok(format!(
        "Color set to {} {}",
        color,
        for_how_long(duration)
    ))))
}

#[derive(Debug, Default, Deserialize)]
struct PresetQuery {
    duration: Option<String>,
}

async fn missing_preset() -> ApiResult {
    Err(BridgeError::MissingParameters(MISSING_PRESET).into())
}

/// Switch to a preset. With a duration the request is held open until the
/// default preset has been restored.
async fn set_preset(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Query(query): Query<PresetQuery>,
) -> ApiResult {
    if number.trim().is_empty() {
        return Err(BridgeError::MissingParameters(MISSING_PRESET).into());
    }

    let preset = PresetId::from(number.as_str());
    let duration = parse_duration(query.duration.as_deref())?;
    let command = preset_command(preset.clone());

    state.scheduler.supersede();

    match duration {
        Some(duration) => {
            if let Err(e) = state.transport.send(&command).await {
                error!("Failed to send preset {}: {}", preset, e);
            }

            info!("⏳ Holding preset {} for {} seconds", preset, duration);

            // A newer command may cancel the revert, the preset still ran
            match state.scheduler.hold(duration.delay).await {
                Ok(true) => {}
                Ok(false) => info!("Preset {} was replaced before it ran out", preset),
                Err(e) => error!("Failed to revert after preset {}: {}", preset, e),
            }
        }
        None => dispatch(&state, command),
    }

    Ok(Json(ApiResponse::ok(format!(
        "Preset {} set {}",
        preset,
        for_how_long(duration)
    ))))
}

/// Forward the body to the controller exactly as received
async fn send_json(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let command = raw_command(&body)?;

    state.scheduler.supersede();
    dispatch(&state, command);

    Ok(Json(ApiResponse::ok("JSON command sent".to_string())))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{header::CONTENT_TYPE, Request},
    };
    use serde_json::{json, Value};
    use tokio::time::Instant;
    use tower::ServiceExt;
    use wled_bridge::uart::testing::RecordingTransport;

    use super::*;

    const DEVICE: &str = "/dev/ttyWLED0";

    fn app(policy: RevertPolicy) -> (RecordingTransport, Router) {
        let transport = RecordingTransport::new(DEVICE);
        let state = AppState::new(Arc::new(transport.clone()), policy);
        (transport, router(state))
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Let the spawned writes run
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_named_color() {
        for (name, color) in COLOR_TABLE {
            let (transport, app) = app(RevertPolicy::AllFire);

            let (status, body) = call(&app, get(&format!("/color/{}", name.to_uppercase()))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(
                body,
                json!({ "status": "ok", "data": format!("Color set to {} indefinitely", color) })
            );

            settle().await;
            let sent = transport.sent();
            assert_eq!(sent.len(), 1, "{name}");
            assert_eq!(sent[0].command, color_command(*color));
            assert_eq!(sent[0].path, DEVICE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_color_from_query() {
        let (transport, app) = app(RevertPolicy::AllFire);

        let (status, body) = call(&app, get("/color?r=300&g=0&b=-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "Color set to RGB(300,0,-1) indefinitely");

        let (status, _) = call(&app, get("/color?color=Cyan")).await;
        assert_eq!(status, StatusCode::OK);

        settle().await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            serde_json::to_value(&sent[0].command).unwrap()["seg"][0]["col"][0],
            json!([300, 0, -1])
        );
        assert_eq!(sent[1].command, color_command(Color::new(0, 255, 255)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_name_uses_rgb() {
        let (transport, app) = app(RevertPolicy::AllFire);

        let (status, _) = call(&app, get("/color/chartreuse?r=1&g=2&b=3")).await;
        assert_eq!(status, StatusCode::OK);

        settle().await;
        assert_eq!(transport.sent()[0].command, color_command(Color::new(1, 2, 3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_color_parameters() {
        let (transport, app) = app(RevertPolicy::AllFire);

        for uri in [
            "/color",
            "/color?r=1&g=2",
            "/color?color=chartreuse",
            "/color/chartreuse",
            "/color/chartreuse?r=1&b=3&duration=5",
        ] {
            let (status, body) = call(&app, get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(
                body,
                json!({ "status": "fail", "data": "Missing color parameters" })
            );
        }

        settle().await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_color_reverts_after_response() {
        let (transport, app) = app(RevertPolicy::AllFire);

        let (status, body) = call(&app, get("/color/red?duration=2")).await;
        let responded = Instant::now();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "Color set to RGB(255,0,0) for 2 seconds");

        settle().await;
        assert_eq!(transport.sent().len(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].command, color_command(Color::new(255, 0, 0)));
        assert!(sent[1].command.is_revert());
        assert!(sent[1].at - sent[0].at >= Duration::from_millis(2_250));
        assert!(responded < sent[1].at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_fire_overlapping_reverts() {
        let (transport, app) = app(RevertPolicy::AllFire);

        call(&app, get("/color/red?duration=2")).await;
        call(&app, get("/color/blue?duration=1")).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let reverts = transport
            .sent()
            .iter()
            .filter(|sent| sent.command.is_revert())
            .count();
        assert_eq!(reverts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_wins_overlapping_reverts() {
        let (transport, app) = app(RevertPolicy::LastWins);

        call(&app, get("/color/red?duration=2")).await;
        settle().await;
        call(&app, get("/color/blue?duration=4")).await;
        let second = Instant::now();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let reverts: Vec<_> = transport
            .sent()
            .into_iter()
            .filter(|sent| sent.command.is_revert())
            .collect();
        assert_eq!(reverts.len(), 1);
        assert!(reverts[0].at - second >= Duration::from_millis(4_250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preset_blocks_until_reverted() {
        let (transport, app) = app(RevertPolicy::AllFire);
        let start = Instant::now();

        let (status, body) = call(&app, get("/preset/3?duration=1")).await;
        assert!(start.elapsed() >= Duration::from_millis(1_250));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "status": "ok", "data": "Preset 3 set for 1 seconds" })
        );

        // Both writes are done by the time the caller hears back
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].command, preset_command(PresetId::Number(3)));
        assert!(sent[1].command.is_revert());
        assert!(sent[1].at - sent[0].at >= Duration::from_millis(1_250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_duration_is_rejected() {
        let (transport, app) = app(RevertPolicy::AllFire);

        for uri in ["/preset/3?duration=1e20", "/color/red?duration=1e20"] {
            let (status, body) = call(&app, get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body, json!({ "status": "fail", "data": "Invalid duration" }));
        }

        settle().await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_wins_color_cancels_preset_hold() {
        let (transport, app) = app(RevertPolicy::LastWins);
        let start = Instant::now();

        let preset_app = app.clone();
        let preset = tokio::spawn(async move {
            call(&preset_app, get("/preset/3?duration=2")).await
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        let (status, _) = call(&app, get("/color/blue")).await;
        assert_eq!(status, StatusCode::OK);

        // The held preset request still answers, just early
        let (status, body) = preset.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "Preset 3 set for 2 seconds");
        assert!(start.elapsed() < Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].command, preset_command(PresetId::Number(3)));
        assert_eq!(sent[1].command, color_command(Color::new(0, 0, 255)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preset_indefinitely() {
        let (transport, app) = app(RevertPolicy::AllFire);
        let start = Instant::now();

        let (status, body) = call(&app, get("/preset/7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "Preset 7 set indefinitely");
        assert!(start.elapsed() < Duration::from_millis(250));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command, preset_command(PresetId::Number(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_preset() {
        let (transport, app) = app(RevertPolicy::AllFire);

        let (status, body) = call(&app, get("/preset")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "status": "fail", "data": "Missing preset number" }));

        settle().await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_json_forwards_body() {
        let (transport, app) = app(RevertPolicy::AllFire);
        let payload = "{\n  \"on\": true,\n  \"ps\": 4,\n  \"bri\": 10,\n  \"n\": 1e2,\n  \"seg\": [{ \"n\": \"Desk lamp\" }]\n}";

        let (status, body) = call(&app, post("/send-json", payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "data": "JSON command sent" }));

        settle().await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);

        // Key order and number text reach the device as the caller wrote them
        assert_eq!(
            sent[0].command.to_line().unwrap(),
            "{\"on\":true,\"ps\":4,\"bri\":10,\"n\":1e2,\"seg\":[{\"n\":\"Desk lamp\"}]}\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_json_rejects_empty_body() {
        let (transport, app) = app(RevertPolicy::AllFire);

        for body in ["", "{}", "not json"] {
            let (status, response) = call(&app, post("/send-json", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body:?}");
            assert_eq!(response["status"], "fail");
        }

        settle().await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_color_session() {
        let (transport, app) = app(RevertPolicy::AllFire);
        let body = json!({ "portPath": "/dev/ttyUSB1", "color": { "r": 255, "g": 0, "b": 0 } });

        let (status, response) = call(&app, post("/send-color", &body.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response, json!({ "status": "ok", "data": "Color command sent" }));

        tokio::time::sleep(Duration::from_secs(4)).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|sent| sent.path == "/dev/ttyUSB1"));
        assert_eq!(sent[0].command, color_command(Color::new(255, 0, 0)));
        assert_eq!(sent[1].command, color_command(Color::new(0, 0, 255)));
        assert!(sent[1].at - sent[0].at >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_color_missing_fields() {
        let (transport, app) = app(RevertPolicy::AllFire);

        for body in [
            json!({ "color": { "r": 1, "g": 2, "b": 3 } }),
            json!({ "portPath": "", "color": { "r": 1, "g": 2, "b": 3 } }),
            json!({ "portPath": "/dev/ttyUSB1" }),
            json!({}),
        ] {
            let (status, response) = call(&app, post("/send-color", &body.to_string())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(
                response,
                json!({ "status": "fail", "data": "Missing portPath or color" })
            );
        }

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_list_ports() {
        let mut transport = RecordingTransport::new(DEVICE);
        transport.ports = vec![PortInfo {
            path: "/dev/ttyUSB0".to_string(),
            port_type: "usb".to_string(),
            manufacturer: Some("Silicon Labs".to_string()),
            serial_number: None,
            product: None,
            vendor_id: Some("10c4".to_string()),
            product_id: Some("ea60".to_string()),
        }];
        let app = router(AppState::new(Arc::new(transport), RevertPolicy::AllFire));

        let (status, body) = call(&app, get("/list-ports")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "status": "ok",
                "data": [{
                    "path": "/dev/ttyUSB0",
                    "portType": "usb",
                    "manufacturer": "Silicon Labs",
                    "vendorId": "10c4",
                    "productId": "ea60"
                }]
            })
        );
    }

    #[tokio::test]
    async fn test_list_ports_failure() {
        let mut transport = RecordingTransport::new(DEVICE);
        transport.fail_listing = true;
        let app = router(AppState::new(Arc::new(transport), RevertPolicy::AllFire));

        let (status, body) = call(&app, get("/list-ports")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "fail", "data": "no serial backend" }));
    }
}
