//! Koekalenteri Admin Lambda
//!
//! Handles the authorized API:
//! - GET|POST /admin/event - List or save events
//! - POST /admin/{organizer,judge,official} - Save lookup records
//! - POST /admin/eventType - Save event type
//! - GET /admin/registration/{eventId} - List registrations of an event
//! - DELETE /admin/registration/{eventId}/{id} - Soft delete registration
//! - GET /admin/registration/{eventId}/{id}/transactions - Payment transactions
//! - GET /admin/registration/audit/{eventId}/{id} - Audit trail of a registration
//! - POST /admin/reg-groups/{eventId} - Move registrations between start list groups
//! - POST /admin/email-send - Message selected registrations of an event
//! - GET /admin/user, POST /admin/user/admin, POST /admin/user/role - Users
//! - GET|POST /admin/emailTemplate - Email templates

use koekalenteri_core::handlers::{
    admin_user, email_template, event, event_type, instrumented, registration, registration_groups,
    registration_messages, transaction, user, write_handler, CrudHandler,
};
use koekalenteri_core::{
    init_metrics, init_tracing, ApiRequest, ApiResponse, Config, Error, Judge, Official, Organizer, Services,
};
use koekalenteri_core::metrics::{flush_metrics, Collector};
use lambda_http::{run, service_fn, Body, Error as LambdaError, Request, Response};
use tracing::info;

/// Lookup writes are reserved for admins
async fn admin_write(
    services: &Services,
    request: &ApiRequest,
    function: &'static str,
    handler: CrudHandler,
) -> ApiResponse {
    if let Err(err) = admin_user(services, request).await {
        return instrumented(function, request, async move { Err(err) }).await;
    }
    handler.handle(request).await
}

async fn route(services: &Services, request: ApiRequest) -> ApiResponse {
    let path = request.path.clone();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["admin", "event"]) => event::get_admin_events(services, &request).await,
        ("POST" | "PUT", ["admin", "event"]) => event::put_event(services, &request).await,
        ("POST", ["admin", "organizer"]) => {
            let handler = write_handler(services.organizers.clone(), "putOrganizer").validated::<Organizer>();
            admin_write(services, &request, "putOrganizer", handler).await
        }
        ("POST", ["admin", "judge"]) => {
            let handler = write_handler(services.judges.clone(), "putJudge").validated::<Judge>();
            admin_write(services, &request, "putJudge", handler).await
        }
        ("POST", ["admin", "official"]) => {
            let handler = write_handler(services.officials.clone(), "putOfficial").validated::<Official>();
            admin_write(services, &request, "putOfficial", handler).await
        }
        ("POST", ["admin", "eventType"]) => event_type::put_event_type(services, &request).await,
        ("GET", ["admin", "registration", event_id]) => {
            let request = request.with_path_parameter("eventId", event_id);
            registration::get_registrations(services, &request).await
        }
        ("DELETE", ["admin", "registration", event_id, id]) => {
            let request = request
                .with_path_parameter("eventId", event_id)
                .with_path_parameter("id", id);
            registration::delete_registration(services, &request).await
        }
        ("GET", ["admin", "registration", "audit", event_id, id]) => {
            let request = request
                .with_path_parameter("eventId", event_id)
                .with_path_parameter("id", id);
            registration::get_audit_trail(services, &request).await
        }
        ("POST", ["admin", "reg-groups", event_id]) => {
            let request = request.with_path_parameter("eventId", event_id);
            registration_groups::put_registration_groups(services, &request).await
        }
        ("POST", ["admin", "email-send"]) => registration_messages::send_messages(services, &request).await,
        ("GET", ["admin", "registration", event_id, id, "transactions"]) => {
            let request = request
                .with_path_parameter("eventId", event_id)
                .with_path_parameter("id", id);
            transaction::get_registration_transactions(services, &request).await
        }
        ("GET", ["admin", "user"]) => user::get_users(services, &request).await,
        ("POST", ["admin", "user", "admin"]) => user::set_admin(services, &request).await,
        ("POST", ["admin", "user", "role"]) => user::set_role(services, &request).await,
        ("GET", ["admin", "emailTemplate"]) => email_template::get_email_templates(services, &request).await,
        ("POST", ["admin", "emailTemplate"]) => email_template::put_email_template(services, &request).await,
        _ => ApiResponse::error(&Error::NotFound("Endpoint not found".to_string())),
    }
}

async fn handler(services: &Services, metrics: &Collector, event: Request) -> Result<Response<Body>, LambdaError> {
    let request = ApiRequest::from_lambda(&event);
    let request_id = request.request_id.clone();
    info!(method = %request.method, path = %request.path, "Processing admin request");

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
