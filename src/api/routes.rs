use std::convert::Infallible;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

use super::websocket;
use crate::classroom::ClassroomServer;
use crate::config::ConnectionConfig;
use crate::error::{ClassroomError, ErrorKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub material_id: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub material_id: String,
    pub total_pages: u32,
}

/// Every route the server exposes.
pub fn routes(
    server: Arc<ClassroomServer>,
    connection: ConnectionConfig,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    websocket_route(server.clone(), connection)
        .or(health_check(server.clone()))
        .or(create_room(server.clone()))
        .or(list_rooms(server.clone()))
        .or(get_room(server.clone()))
        .or(list_materials(server.clone()))
        .or(get_material(server))
        .with(warp::trace::request())
}

pub fn websocket_route(
    server: Arc<ClassroomServer>,
    connection: ConnectionConfig,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_server(server))
        .map(move |ws: warp::ws::Ws, server: Arc<ClassroomServer>| {
            ws.on_upgrade(move |websocket| websocket::handle_websocket(websocket, server, connection))
        })
}

pub fn health_check(server: Arc<ClassroomServer>) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_server(server))
        .map(|server: Arc<ClassroomServer>| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "classroom-sync",
                "version": env!("CARGO_PKG_VERSION"),
                "rooms": server.room_count()
            }))
        })
}

pub fn create_room(server: Arc<ClassroomServer>) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "rooms")
        .and(warp::post())
        .and(warp::body::content_length_limit(16 * 1024))
        .and(warp::body::json())
        .and(with_server(server))
        .and_then(handle_create_room)
}

pub fn list_rooms(server: Arc<ClassroomServer>) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "rooms")
        .and(warp::get())
        .and(with_server(server))
        .and_then(handle_list_rooms)
}

pub fn get_room(server: Arc<ClassroomServer>) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "rooms" / String)
        .and(warp::get())
        .and(with_server(server))
        .and_then(handle_get_room)
}

pub fn list_materials(server: Arc<ClassroomServer>) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "materials")
        .and(warp::get())
        .and(with_server(server))
        .map(|server: Arc<ClassroomServer>| {
            warp::reply::json(&serde_json::json!({ "materials": server.materials() }))
        })
}

pub fn get_material(server: Arc<ClassroomServer>) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "materials" / String)
        .and(warp::get())
        .and(with_server(server))
        .map(|material_id: String, server: Arc<ClassroomServer>| match server.material(&material_id) {
            Ok(material) => warp::reply::json(&material).into_response(),
            Err(e) => error_reply(&e),
        })
}

async fn handle_create_room(request: CreateRoomRequest, server: Arc<ClassroomServer>) -> Result<Response, Infallible> {
    let reply = match server.create_room(request.room_id.as_deref(), &request.material_id) {
        Ok(handle) => warp::reply::with_status(
            warp::reply::json(&CreateRoomResponse {
                room_id: handle.room_id().to_string(),
                material_id: handle.material_id().to_string(),
                total_pages: handle.total_pages(),
            }),
            StatusCode::CREATED,
        )
        .into_response(),
        Err(e) => error_reply(&e),
    };
    Ok(reply)
}

async fn handle_list_rooms(server: Arc<ClassroomServer>) -> Result<Response, Infallible> {
    let rooms = server.list_rooms().await;
    Ok(warp::reply::json(&serde_json::json!({ "rooms": rooms })).into_response())
}

async fn handle_get_room(room_id: String, server: Arc<ClassroomServer>) -> Result<Response, Infallible> {
    let reply = match server.room_snapshot(&room_id).await {
        Ok(snapshot) => warp::reply::json(&snapshot).into_response(),
        Err(e) => error_reply(&e),
    };
    Ok(reply)
}

fn error_reply(error: &ClassroomError) -> Response {
    let status = match error.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Authority => StatusCode::FORBIDDEN,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %error, "Request failed");
    }
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": error.to_string() })),
        status,
    )
    .into_response()
}

fn with_server(server: Arc<ClassroomServer>) -> impl Filter<Extract = (Arc<ClassroomServer>,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}
