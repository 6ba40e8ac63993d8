//! Minimal restline app: JSON CRUD endpoints behind an auth handler.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -H 'authorization: token' http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'authorization: token' \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X DELETE -H 'authorization: token' http://localhost:3000/users/42
//!   curl http://localhost:3000/healthz

use restline::{App, Config, Fault, Flow, Input, Next, Server, SetCookie, StatusCode, handlers, sync};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), restline::Error> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(std::path::Path::new(&path))?,
        None => Config::default(),
    };
    restline::logging::init(&config.log)?;

    let server = Server::from_config(&config);
    let mut app = App::new(config)?;
    app.expose("service", json!("users"));

    let authenticate = || {
        sync(|input: &Input| {
            if input.header("authorization").is_none() {
                input.res().error(StatusCode::UNAUTHORIZED, "missing authorization header");
                return Flow::Done;
            }
            input.flash().set("caller", json!("token"));
            Flow::Next
        })
    };

    app.get("/healthz", handlers![healthz])?;
    app.get("/users/:id", handlers![authenticate(), get_user])?;
    app.post("/users", handlers![authenticate(), create_user])?;
    app.delete("/users/:id", handlers![authenticate(), delete_user])?;

    server.serve(app).await
}

// GET /healthz
async fn healthz(input: Input, _next: Next) -> Result<(), Fault> {
    input.res().json(&json!({ "status": "ok", "service": input.value("service") }))
}

// GET /users/:id
async fn get_user(input: Input, _next: Next) -> Result<(), Fault> {
    let id = input.param("id").unwrap_or("unknown");
    info!(id, caller = ?input.flash().get("caller"), "loading user");
    input.res().json(&json!({ "id": id, "name": "alice" }))
}

#[derive(Deserialize)]
struct CreateUser {
    name: String,
}

// POST /users
async fn create_user(input: Input, _next: Next) -> Result<(), Fault> {
    let user: CreateUser = input.body().deserialize().map_err(|e| Fault::from_error(StatusCode::BAD_REQUEST, e))?;
    input.res().set_cookie(&SetCookie::new("last_created", "99").path("/").http_only(true))?;
    input.res()
        .status(StatusCode::CREATED)
        .set_header("location", "/users/99")
        .json(&json!({ "id": "99", "name": user.name }))
}

// DELETE /users/:id → 204 No Content
async fn delete_user(input: Input, _next: Next) {
    input.res().status(StatusCode::NO_CONTENT).end();
}
