use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};

// Models that match the published OpenAPI description
#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
    age: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct UserCreate {
    name: String,
    age: i64,
}

// In-memory database
type Database = Arc<Mutex<BTreeMap<i64, User>>>;

// Global counter for ID generation
static NEXT_ID: Lazy<Mutex<i64>> = Lazy::new(|| Mutex::new(1));

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Parse command-line arguments for port
    let args: Vec<String> = env::args().collect();
    let mut port = 8000; // Default port

    for i in 1..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(p) = args[i + 1].parse::<u16>() {
                port = p;
            }
        }
    }

    let db: Database = Arc::new(Mutex::new(BTreeMap::new()));

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/openapi.json", get(openapi))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", get(get_user_by_id))
        .with_state(db)
        .layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Starting server at {}", addr);
    if let Err(err) = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
    {
        tracing::error!("server error: {}", err);
    }
}

async fn openapi() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.2",
        "info": {"title": "Sample Users API", "version": "1.0.0"},
        "paths": {
            "/users": {
                "get": {
                    "summary": "List users",
                    "responses": {"200": {"description": "All users"}}
                },
                "post": {
                    "summary": "Create a user",
                    "requestBody": {
                        "required": true,
                        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/User"}}}
                    },
                    "responses": {
                        "200": {"description": "Created user"},
                        "422": {"description": "Validation error"}
                    }
                }
            },
            "/users/{id}": {
                "get": {
                    "summary": "Get a user by id",
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}
                    ],
                    "responses": {
                        "200": {"description": "The user"},
                        "404": {"description": "User not found"}
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "User": {
                    "type": "object",
                    "required": ["name", "age"],
                    "properties": {
                        "name": {"type": "string", "example": "John Doe"},
                        "age": {"type": "integer", "example": 30}
                    }
                }
            }
        }
    }))
}

async fn list_users(State(db): State<Database>) -> impl IntoResponse {
    match db.lock() {
        Ok(db_lock) => (StatusCode::OK, Json(json!(db_lock.values().cloned().collect::<Vec<_>>()))),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"detail": "database unavailable"}))),
    }
}

// Missing or mistyped fields are rejected by the Json extractor with 422
async fn create_user(
    State(db): State<Database>,
    Json(user_create): Json<UserCreate>,
) -> impl IntoResponse {
    let (Ok(mut db_lock), Ok(mut next_id_lock)) = (db.lock(), NEXT_ID.lock()) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"detail": "database unavailable"})));
    };

    let id = *next_id_lock;
    *next_id_lock += 1;

    let user = User {
        id,
        name: user_create.name,
        age: user_create.age,
    };
    db_lock.insert(id, user.clone());

    (StatusCode::OK, Json(json!(user)))
}

async fn get_user_by_id(
    State(db): State<Database>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let Ok(db_lock) = db.lock() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"detail": "database unavailable"})));
    };

    match db_lock.get(&id) {
        Some(user) => (StatusCode::OK, Json(json!(user))),
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "User not found"}))),
    }
}
