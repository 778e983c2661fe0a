// Configuration JSON API
//
// GET returns the non-secret configuration; PATCH applies the toggles that
// can change at runtime.

use axum::{extract::State, http::StatusCode, response::Response, routing::get, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::http::{
    json_api_meta, json_api_response, parse_document, AppError, AppState, AuthorizedClient, JsonApiResult,
};

const RESOURCE_TYPE: &str = "configuration";

pub fn create_configuration_router() -> Router<AppState> {
    Router::new().route("/configuration", get(get_configuration).patch(update_configuration))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigurationDocument {
    data: ConfigurationData,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigurationData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<Value>,
    attributes: ConfigurationUpdate,
}

/// Runtime-mutable settings; absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigurationUpdate {
    cache_enabled: Option<bool>,
    allow_insecure_lan_connections: Option<bool>,
    allow_insecure_wan_connections: Option<bool>,
    lan_connections_require_credentials: Option<bool>,
    wan_connections_require_credentials: Option<bool>,
}

fn document(state: &AppState) -> Value {
    let policy = state.services.auth.policy();
    let hostnames = &state.hostnames;

    json!({
        "meta": json_api_meta(),
        "data": {
            "type": RESOURCE_TYPE,
            "id": null,
            "attributes": {
                "server_hostname_loopback": hostnames.loopback,
                "server_hostname_private": hostnames.private,
                "server_hostname_public": hostnames.public,
                "server_port": hostnames.port,
                "server_https_port": hostnames.https_port,
                "cache_enabled": state.services.cache().is_enabled(),
                "allow_insecure_lan_connections": policy.allow_insecure_lan_connections,
                "allow_insecure_wan_connections": policy.allow_insecure_wan_connections,
                "lan_connections_require_credentials": policy.lan_connections_require_credentials,
                "wan_connections_require_credentials": policy.wan_connections_require_credentials,
                "providers": state.services.providers().names(),
            },
        },
    })
}

async fn get_configuration(State(state): State<AppState>, _client: AuthorizedClient) -> Response {
    json_api_response(StatusCode::OK, &document(&state))
}

async fn update_configuration(
    State(state): State<AppState>,
    _client: AuthorizedClient,
    body: Bytes,
) -> JsonApiResult<Response> {
    let update: ConfigurationDocument = parse_document(&body)?;
    let data = update.data;
    if data.kind != RESOURCE_TYPE {
        return Err(AppError::unprocessable(format!("Resource type must be {RESOURCE_TYPE:?}"))
            .with_field("type")
            .into());
    }
    if data.id.as_ref().is_some_and(|id| !id.is_null()) {
        return Err(AppError::unprocessable("The configuration resource has no id")
            .with_field("id")
            .into());
    }

    let attributes = data.attributes;
    if let Some(enabled) = attributes.cache_enabled {
        state.services.cache().set_enabled(enabled);
    }

    let mut policy = state.services.auth.policy();
    let before = policy;
    if let Some(value) = attributes.allow_insecure_lan_connections {
        policy.allow_insecure_lan_connections = value;
    }
    if let Some(value) = attributes.allow_insecure_wan_connections {
        policy.allow_insecure_wan_connections = value;
    }
    if let Some(value) = attributes.lan_connections_require_credentials {
        policy.lan_connections_require_credentials = value;
    }
    if let Some(value) = attributes.wan_connections_require_credentials {
        policy.wan_connections_require_credentials = value;
    }
    if policy != before {
        state.services.auth.set_policy(policy);
    }

    info!("Configuration updated");
    Ok(json_api_response(StatusCode::OK, &document(&state)))
}
