use super::{
    CreateCloseForm, CreateOpenForm, DeleteForm, KeyQuery, TrackerState, response_error,
};
use axum::{
    Json,
    extract::{Form, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use efes_core::{
    CreateCloseOperationRequest, CreateOpenOperationRequest, CreateOpenResponse,
    DeleteKeyOperationRequest, EfesError, GetDevicesResponse, GetHostsResponse,
    GetPathsOperationRequest, GetPathsResponse,
};
use std::sync::Arc;

pub(crate) async fn get_devices(State(state): State<Arc<TrackerState>>) -> impl IntoResponse {
    match state.inventory_operation.run().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(GetDevicesResponse {
                devices: snapshot.devices,
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn get_hosts(State(state): State<Arc<TrackerState>>) -> impl IntoResponse {
    match state.inventory_operation.run().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(GetHostsResponse {
                hosts: snapshot.hosts,
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn get_paths(
    State(state): State<Arc<TrackerState>>,
    Query(query): Query<KeyQuery>,
) -> impl IntoResponse {
    let result = state
        .get_paths_operation
        .run(GetPathsOperationRequest { key: query.key })
        .await;

    match result {
        Ok(result) => (StatusCode::OK, Json(GetPathsResponse { paths: result.paths }))
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_open(
    State(state): State<Arc<TrackerState>>,
    Form(form): Form<CreateOpenForm>,
) -> impl IntoResponse {
    let result = state
        .create_open_operation
        .run(CreateOpenOperationRequest { size: form.size })
        .await;

    match result {
        Ok(result) => (
            StatusCode::OK,
            Json(CreateOpenResponse {
                path: result.path,
                fid: result.fid,
                devid: result.devid,
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_close(
    State(state): State<Arc<TrackerState>>,
    Form(form): Form<CreateCloseForm>,
) -> impl IntoResponse {
    let result = state
        .create_close_operation
        .run(CreateCloseOperationRequest {
            key: form.key,
            size: form.size,
            fid: form.fid,
            devid: form.devid,
        })
        .await;

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn delete_key(
    State(state): State<Arc<TrackerState>>,
    Form(form): Form<DeleteForm>,
) -> impl IntoResponse {
    let result = state
        .delete_key_operation
        .run(DeleteKeyOperationRequest { key: form.key })
        .await;

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: EfesError) -> Response {
    let status = match &error {
        EfesError::NotFound(_) => StatusCode::NOT_FOUND,
        EfesError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EfesError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    response_error(status, error.to_string())
}
