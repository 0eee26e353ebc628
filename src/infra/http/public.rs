use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum::extract::State;
use minijinja::{context, value::Value};

use crate::presentation::TemplateEngine;

use super::{
    error::{ErrorReport, HttpError},
    headers::{HeaderPolicy, apply_response_headers},
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct HttpState {
    pub templates: Arc<TemplateEngine>,
    pub policy: Arc<HeaderPolicy>,
}

pub fn build_router(state: HttpState) -> Router {
    let policy = state.policy.clone();

    Router::new()
        .route("/", get(index))
        .route("/start", get(start))
        .route("/_health", get(health))
        .route("/static/{*path}", get(crate::infra::assets::serve_static))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn_with_state(
            policy,
            apply_response_headers,
        ))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn index(State(state): State<HttpState>) -> Response {
    let ctx = context! {
        title => "Apply online",
        journeys => vec!["start"],
    };
    render_page(&state, "index.html", ctx, StatusCode::OK)
}

async fn start(State(state): State<HttpState>) -> Response {
    let ctx = context! {
        title => "Before you start",
        opened => context! { dd => 6, mm => 4, yyyy => 2024 },
        continue_attrs => context! {
            class => "button button--primary",
            href => "/",
            data_module => "journey-continue",
        },
    };
    render_page(&state, "start.html", ctx, StatusCode::OK)
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn not_found(State(state): State<HttpState>) -> Response {
    let ctx = context! {
        title => "Page not found",
    };
    let mut response = render_page(&state, "error.html", ctx, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "infra::http::public::not_found",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

fn render_page(state: &HttpState, name: &str, ctx: Value, status: StatusCode) -> Response {
    match state.templates.render(name, ctx) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(error) => HttpError::from(error).into_response(),
    }
}
