use std::{process, sync::Arc, time::Duration};

use formwork::{
    config,
    error::AppError,
    infra::{
        error::InfraError,
        http::{self, HeaderPolicy, HttpState},
        telemetry,
    },
    presentation::TemplateEngine,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::ShowHeaders => run_show_headers(settings),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let policy = Arc::new(HeaderPolicy::from_settings(&settings.security)?);
    let templates = Arc::new(TemplateEngine::new()?);
    let router = http::build_router(HttpState { templates, policy });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "formwork::server",
        addr = %settings.server.addr,
        "listening",
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

fn run_show_headers(settings: config::Settings) -> Result<(), AppError> {
    let policy = HeaderPolicy::from_settings(&settings.security)?;
    for (name, value) in policy.baseline() {
        println!("{name}: {}", value.to_str().unwrap_or("<non-ascii value>"));
    }
    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!(
        target = "formwork::server",
        grace_seconds = grace.as_secs(),
        "shutdown signal received, draining connections",
    );
}
