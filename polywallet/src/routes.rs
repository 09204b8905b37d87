//! HTTP route handlers for the wallet API.
//!
//! Every user-scoped endpoint acts on the user's current session chain.
//! Payloads are JSON; failures are rendered by [`WalletError`]'s
//! `IntoResponse` impl. Malformed bodies answer 400 with
//! `{"error": "invalid request body"}`.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::TxHash;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::chain::ChainId;
use crate::conversation::PromptKind;
use crate::error::WalletError;
use crate::service::WalletService;

/// Shared service state used by the route handlers.
pub type ServiceState = Arc<WalletService>;

/// Creates the Axum router with every wallet endpoint.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/health", get(get_health))
        .route("/chains", get(get_chains))
        .route("/users/{user_id}/wallet", post(post_wallet).get(get_wallet))
        .route("/users/{user_id}/balance", get(get_balance))
        .route("/users/{user_id}/chain", put(put_chain))
        .route("/users/{user_id}/tokens", get(get_tokens).post(post_token))
        .route("/users/{user_id}/transfers", post(post_transfer))
        .route(
            "/users/{user_id}/prompts",
            post(post_prompt).delete(delete_prompt),
        )
        .route("/users/{user_id}/input", post(post_input))
        .route("/transfers/{tx_hash}", get(get_transfer))
}

#[derive(Debug, Deserialize)]
struct SwitchChainBody {
    chain_id: ChainId,
}

#[derive(Debug, Deserialize)]
struct RegisterTokenBody {
    contract_address: String,
}

#[derive(Debug, Deserialize)]
struct SendBody {
    recipient: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct PromptBody {
    kind: PromptKind,
}

#[derive(Debug, Deserialize)]
struct InputBody {
    text: String,
}

fn invalid_body() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid request body" })),
    )
        .into_response()
}

/// `GET /health`: lightweight liveness check.
#[instrument(skip_all)]
async fn get_health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /chains`: every configured chain.
#[instrument(skip_all)]
async fn get_chains(State(service): State<ServiceState>) -> impl IntoResponse {
    Json(service.chains())
}

/// `POST /users/{user_id}/wallet`: create a wallet; the recovery phrase is
/// only ever returned here.
#[instrument(skip(service))]
async fn post_wallet(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
) -> Result<Response, WalletError> {
    let created = service.create_wallet(&user_id).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

/// `GET /users/{user_id}/wallet`: address and current chain.
#[instrument(skip(service))]
async fn get_wallet(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
) -> Result<Response, WalletError> {
    Ok(Json(service.wallet_info(&user_id)?).into_response())
}

/// `GET /users/{user_id}/balance`
#[instrument(skip(service))]
async fn get_balance(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
) -> Result<Response, WalletError> {
    Ok(Json(service.get_report(&user_id).await?).into_response())
}

/// `PUT /users/{user_id}/chain`
#[instrument(skip(service, body))]
async fn put_chain(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
    body: Result<Json<SwitchChainBody>, JsonRejection>,
) -> Result<Response, WalletError> {
    let Ok(Json(body)) = body else {
        return Ok(invalid_body());
    };
    Ok(Json(service.switch_chain(&user_id, body.chain_id).await?).into_response())
}

/// `GET /users/{user_id}/tokens`
#[instrument(skip(service))]
async fn get_tokens(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    Json(service.list_tokens(&user_id))
}

/// `POST /users/{user_id}/tokens`
#[instrument(skip(service, body))]
async fn post_token(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
    body: Result<Json<RegisterTokenBody>, JsonRejection>,
) -> Result<Response, WalletError> {
    let Ok(Json(body)) = body else {
        return Ok(invalid_body());
    };
    let token = service
        .register_token(&user_id, &body.contract_address)
        .await?;
    Ok((StatusCode::CREATED, Json(token)).into_response())
}

/// `POST /users/{user_id}/transfers`: answers once the transfer is pending
/// or aborted.
#[instrument(skip(service, body))]
async fn post_transfer(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Result<Response, WalletError> {
    let Ok(Json(body)) = body else {
        return Ok(invalid_body());
    };
    let transfer = service
        .send_transfer(&user_id, &body.recipient, &body.amount)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(transfer)).into_response())
}

/// `GET /transfers/{tx_hash}`
#[instrument(skip(service))]
async fn get_transfer(
    State(service): State<ServiceState>,
    Path(tx_hash): Path<String>,
) -> Result<Response, WalletError> {
    let tx_hash = TxHash::from_str(&tx_hash)
        .map_err(|_| WalletError::invalid(format!("'{tx_hash}' is not a transaction hash")))?;
    Ok(Json(service.transfer_status(tx_hash)?).into_response())
}

/// `POST /users/{user_id}/prompts`
#[instrument(skip(service, body))]
async fn post_prompt(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
    body: Result<Json<PromptBody>, JsonRejection>,
) -> Result<Response, WalletError> {
    let Ok(Json(body)) = body else {
        return Ok(invalid_body());
    };
    Ok(Json(service.open_prompt(&user_id, body.kind)?).into_response())
}

/// `DELETE /users/{user_id}/prompts`: withdraw the pending prompt.
#[instrument(skip(service))]
async fn delete_prompt(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    Json(json!({ "cancelled": service.cancel_prompt(&user_id) }))
}

/// `POST /users/{user_id}/input`
#[instrument(skip(service, body))]
async fn post_input(
    State(service): State<ServiceState>,
    Path(user_id): Path<String>,
    body: Result<Json<InputBody>, JsonRejection>,
) -> Result<Response, WalletError> {
    let Ok(Json(body)) = body else {
        return Ok(invalid_body());
    };
    Ok(Json(service.submit_input(&user_id, &body.text).await?).into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt as _;

    use super::*;
    use crate::testing::Harness;

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn app() -> Router {
        let harness = Harness::new().await;
        routes().with_state(Arc::new(harness.service))
    }

    #[tokio::test]
    async fn wallet_lifecycle_over_http() {
        let app = app().await;

        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&app, "POST", "/users/alice/wallet", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let phrase = body["recovery_phrase"].as_str().unwrap();
        assert_eq!(phrase.split(' ').count(), 12);
        assert_eq!(body["chain"]["chain_id"], 1);

        let (status, body) = call(&app, "POST", "/users/alice/wallet", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_exists");

        let (status, body) =
            call(&app, "PUT", "/users/alice/chain", Some(json!({"chain_id": 137}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["symbol"], "MATIC");

        let (status, body) = call(&app, "GET", "/users/alice/wallet", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chain"]["chain_id"], 137);
        assert!(body.get("recovery_phrase").is_none());
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let app = app().await;

        let (status, body) = call(&app, "GET", "/users/nobody/balance", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) =
            call(&app, "PUT", "/users/alice/chain", Some(json!({"chain_id": 999}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_chain");

        let (status, body) =
            call(&app, "PUT", "/users/alice/chain", Some(json!({"chain_id": 137}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) =
            call(&app, "PUT", "/users/alice/chain", Some(json!({"chain": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid request body");

        let (status, body) = call(&app, "GET", "/transfers/0x1234", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn prompt_can_be_withdrawn() {
        let app = app().await;
        call(&app, "POST", "/users/alice/wallet", None).await;

        let (status, body) =
            call(&app, "POST", "/users/alice/prompts", Some(json!({"kind": "send"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "awaiting_send_details");

        let (status, body) = call(&app, "DELETE", "/users/alice/prompts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], true);

        let (status, body) = call(
            &app,
            "POST",
            "/users/alice/input",
            Some(json!({"text": "0x00000000000000000000000000000000000000b0 1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (_, body) = call(&app, "DELETE", "/users/alice/prompts", None).await;
        assert_eq!(body["cancelled"], false);
    }

    #[tokio::test]
    async fn chains_are_listed_in_order() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/chains", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<u64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["chain_id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, [1, 137]);
    }
}
