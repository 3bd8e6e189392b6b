//! Clients shared by all invocations of a function container

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::dynamo::{dynamodb_client, load_sdk_config, DynamoClient};
use crate::email::{Mailer, SesMailer};
use crate::store::Store;

/// Everything a handler may talk to, built once in `main`
#[derive(Clone)]
pub struct Services {
    pub config: Config,
    pub events: Arc<dyn Store>,
    pub registrations: Arc<dyn Store>,
    pub event_types: Arc<dyn Store>,
    pub judges: Arc<dyn Store>,
    pub officials: Arc<dyn Store>,
    pub organizers: Arc<dyn Store>,
    pub users: Arc<dyn Store>,
    pub email_templates: Arc<dyn Store>,
    pub transactions: Arc<dyn Store>,
    pub audit: Arc<dyn Store>,
    pub mailer: Arc<dyn Mailer>,
}

impl Services {
    /// Build the AWS clients for the given configuration
    pub async fn connect(config: Config) -> Self {
        let sdk_config = load_sdk_config().await;
        let client = dynamodb_client(&sdk_config, &config);
        let table = |name: &str| -> Arc<dyn Store> { Arc::new(DynamoClient::new(client.clone(), name)) };

        let services = Self {
            events: table(&config.tables.event),
            registrations: table(&config.tables.registration),
            event_types: table(&config.tables.event_type),
            judges: table(&config.tables.judge),
            officials: table(&config.tables.official),
            organizers: table(&config.tables.organizer),
            users: table(&config.tables.user),
            email_templates: table(&config.tables.email_template),
            transactions: table(&config.tables.transaction),
            audit: table(&config.tables.audit),
            mailer: Arc::new(SesMailer::new(&sdk_config)),
            config,
        };
        info!(local = services.config.is_local(), "Services initialized");
        services
    }
}
