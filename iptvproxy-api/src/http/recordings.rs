// Recordings JSON API
//
// - GET    /recordings[?status=]  - list
// - GET    /recordings/{id}       - one recording
// - POST   /recordings            - schedule (201, 409 on duplicates)
// - DELETE /recordings/{id}       - cancel, stop or delete depending on status

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use iptvproxy_core::models::{Recording, RecordingStatus};
use iptvproxy_core::provider::ClientIdentity;
use iptvproxy_core::service::{NewRecording, Removal};
use iptvproxy_manifest::QueryParams;

use crate::http::{
    json_api_meta, json_api_response, parse_document, AppError, AppState, AuthorizedClient, JsonApiResult,
};

const RESOURCE_TYPE: &str = "recordings";

/// Query parameters every gated request may carry
const CLIENT_PARAMS: [&str; 2] = ["client_uuid", "http_token"];

pub fn create_recordings_router() -> Router<AppState> {
    Router::new()
        .route("/recordings", get(list_recordings).post(create_recording))
        .route("/recordings/{id}", get(get_recording).delete(delete_recording))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordingDocument {
    data: RecordingData,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordingData {
    #[serde(rename = "type")]
    kind: String,
    attributes: RecordingAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordingAttributes {
    provider: String,
    channel_number: String,
    program_title: String,
    start_date_time_in_utc: String,
    end_date_time_in_utc: String,
}

/// RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC
fn parse_date_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|naive| naive.and_utc()))
        .ok()
}

fn parse_id(raw: &str) -> JsonApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::not_found(format!("Recording {raw} not found")).into())
}

fn playlist_url(recording: &Recording, base_url: &str, client: &ClientIdentity) -> Value {
    if recording.status != RecordingStatus::Persisted {
        return Value::Null;
    }
    let query = QueryParams::new()
        .with("recording_id", recording.id.to_string())
        .with("client_uuid", client.client_uuid.as_str())
        .with_opt("http_token", client.http_token.as_deref());
    Value::String(format!("{base_url}/vod/playlist.m3u8?{}", query.encode()))
}

fn resource(recording: &Recording, base_url: &str, client: &ClientIdentity) -> Value {
    json!({
        "type": RESOURCE_TYPE,
        "id": recording.id,
        "attributes": {
            "channel_name": recording.channel_name,
            "channel_number": format!("{:02}", recording.channel_number),
            "end_date_time_in_utc": recording.stop_utc.to_rfc3339(),
            "playlist_url": playlist_url(recording, base_url, client),
            "program_title": recording.program_title,
            "provider": recording.provider,
            "start_date_time_in_utc": recording.start_utc.to_rfc3339(),
            "status": recording.status,
        },
    })
}

fn status_filter(client: &AuthorizedClient) -> JsonApiResult<Option<RecordingStatus>> {
    let mut unsupported: Vec<String> = client
        .query()
        .keys()
        .filter(|name| name.as_str() != "status" && !CLIENT_PARAMS.contains(&name.as_str()))
        .cloned()
        .collect();
    if !unsupported.is_empty() {
        unsupported.sort();
        let mut err = AppError::bad_request(format!(
            "GET recordings does not support {:?} query parameters",
            unsupported
        ));
        err.field = Some(unsupported);
        return Err(err.into());
    }

    client
        .param("status")
        .map(|raw| {
            raw.parse::<RecordingStatus>().map_err(|_| {
                AppError::unprocessable(format!("Recording status {raw:?} is not supported"))
                    .with_field("status")
                    .into()
            })
        })
        .transpose()
}

async fn list_recordings(State(state): State<AppState>, client: AuthorizedClient) -> JsonApiResult<Response> {
    let status = status_filter(&client)?;
    let base_url = client.base_url(&state);
    let identity = client.identity();

    let recordings = state.services.recorder.list(status).await?;
    let data: Vec<Value> = recordings
        .iter()
        .map(|recording| resource(recording, &base_url, &identity))
        .collect();

    Ok(json_api_response(
        StatusCode::OK,
        &json!({ "meta": json_api_meta(), "data": data }),
    ))
}

async fn get_recording(
    Path(id): Path<String>,
    State(state): State<AppState>,
    client: AuthorizedClient,
) -> JsonApiResult<Response> {
    let recording = state.services.recorder.get(parse_id(&id)?).await?;
    Ok(json_api_response(
        StatusCode::OK,
        &json!({
            "meta": json_api_meta(),
            "data": resource(&recording, &client.base_url(&state), &client.identity()),
        }),
    ))
}

async fn create_recording(
    State(state): State<AppState>,
    client: AuthorizedClient,
    body: Bytes,
) -> JsonApiResult<Response> {
    let document: RecordingDocument = parse_document(&body)?;
    let data = document.data;
    if data.kind != RESOURCE_TYPE {
        return Err(AppError::unprocessable(format!("Resource type must be {RESOURCE_TYPE:?}"))
            .with_field("type")
            .into());
    }

    let attributes = data.attributes;
    let channel_number = attributes.channel_number.trim().parse::<u32>().map_err(|_| {
        AppError::unprocessable(format!("Invalid channel number: {}", attributes.channel_number))
            .with_field("channel_number")
    })?;
    let start_utc = parse_date_time(&attributes.start_date_time_in_utc).ok_or_else(|| {
        AppError::unprocessable("Invalid start date time").with_field("start_date_time_in_utc")
    })?;
    let stop_utc = parse_date_time(&attributes.end_date_time_in_utc)
        .ok_or_else(|| AppError::unprocessable("Invalid end date time").with_field("end_date_time_in_utc"))?;

    let recording = state
        .services
        .recorder
        .create(NewRecording {
            provider: attributes.provider,
            channel_number,
            program_title: attributes.program_title,
            start_utc,
            stop_utc,
        })
        .await?;

    let mut response = json_api_response(
        StatusCode::CREATED,
        &json!({
            "meta": json_api_meta(),
            "data": resource(&recording, &client.base_url(&state), &client.identity()),
        }),
    );
    if let Ok(location) = HeaderValue::from_str(&format!("/recordings/{}", recording.id)) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

async fn delete_recording(
    Path(id): Path<String>,
    State(state): State<AppState>,
    _client: AuthorizedClient,
) -> JsonApiResult<Response> {
    let id = parse_id(&id)?;
    let removal = state.services.recorder.delete(id).await?;
    info!(
        "Recording {} {}",
        id,
        match removal {
            Removal::Deleted => "deleted",
            Removal::Persisted => "stopped and persisted",
        }
    );

    Ok(json_api_response(StatusCode::OK, &json!({ "meta": json_api_meta() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_date_time() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_date_time("2024-01-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_date_time("2024-01-01T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_date_time("2024-01-01 10:00:00"), Some(expected));
        assert_eq!(parse_date_time("tomorrow"), None);
    }

    #[test]
    fn test_resource_links_persisted_recordings_only() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut recording = Recording::new("smoothstreams", 1, "ESPN", "News", start, start + chrono::Duration::hours(1));
        let client = ClientIdentity {
            client_uuid: "C".to_string(),
            http_token: None,
        };

        let scheduled = resource(&recording, "http://localhost:8080", &client);
        assert_eq!(scheduled["attributes"]["playlist_url"], Value::Null);
        assert_eq!(scheduled["attributes"]["channel_number"], "01");
        assert_eq!(scheduled["attributes"]["status"], "scheduled");

        recording.status = RecordingStatus::Persisted;
        let persisted = resource(&recording, "http://localhost:8080", &client);
        assert_eq!(
            persisted["attributes"]["playlist_url"],
            format!(
                "http://localhost:8080/vod/playlist.m3u8?recording_id={}&client_uuid=C&http_token=",
                recording.id
            )
        );
    }
}
