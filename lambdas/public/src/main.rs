//! Koekalenteri Public Lambda
//!
//! Handles the unauthenticated API:
//! - GET /event - List published events
//! - GET /event/{eventType}/{id} - Get event
//! - GET /eventType, /judge, /official, /organizer - Lookup tables
//! - GET /registration/{eventId}/{id} - Get registration
//! - PUT|POST /registration - Create or update registration

use koekalenteri_core::handlers::{event, read_all_handler, registration};
use koekalenteri_core::{init_metrics, init_tracing, ApiRequest, ApiResponse, Config, Error, Services};
use koekalenteri_core::metrics::{flush_metrics, Collector};
use lambda_http::{run, service_fn, Body, Error as LambdaError, Request, Response};
use tracing::info;

async fn route(services: &Services, request: ApiRequest) -> ApiResponse {
    let path = request.path.clone();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["event"]) => event::get_events(services, &request).await,
        ("GET", ["event", event_type, id]) => {
            let request = request
                .with_path_parameter("eventType", event_type)
                .with_path_parameter("id", id);
            event::get_event(services, &request).await
        }
        ("GET", ["eventType"]) => {
            read_all_handler(services.event_types.clone(), "getEventTypes")
                .handle(&request)
                .await
        }
        ("GET", ["judge"]) => {
            read_all_handler(services.judges.clone(), "getJudges")
                .handle(&request)
                .await
        }
        ("GET", ["official"]) => {
            read_all_handler(services.officials.clone(), "getOfficials")
                .handle(&request)
                .await
        }
        ("GET", ["organizer"]) => {
            read_all_handler(services.organizers.clone(), "getOrganizers")
                .handle(&request)
                .await
        }
        ("GET", ["registration", event_id, id]) => {
            let request = request
                .with_path_parameter("eventId", event_id)
                .with_path_parameter("id", id);
            registration::get_registration(services, &request).await
        }
        ("PUT" | "POST", ["registration"]) => registration::put_registration(services, &request).await,
        _ => ApiResponse::error(&Error::NotFound("Endpoint not found".to_string())),
    }
}

async fn handler(services: &Services, metrics: &Collector, event: Request) -> Result<Response<Body>, LambdaError> {
    let request = ApiRequest::from_lambda(&event);
    let request_id = request.request_id.clone();
    info!(method = %request.method, path = %request.path, "Processing public request");

    let response = route(services, request).await;
    flush_metrics(metrics, request_id.as_deref());

    Ok(response.into_lambda()?)
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    init_tracing();
    let metrics = init_metrics()?;

    let services = Services::connect(Config::from_env()).await;
    let services = &services;

    run(service_fn(move |event: Request| async move { handler(services, metrics, event).await })).await
}
