//! Payment transactions of a registration

use super::{authorized_user, instrumented, required_parameter};
use crate::errors::Result;
use crate::models::Transaction;
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::services::Services;
use crate::store::{from_item, Store};

/// Transactions referencing `reference`, oldest first
pub async fn transactions_by_reference(store: &dyn Store, reference: &str) -> Result<Vec<Transaction>> {
    let mut transactions = Vec::new();
    for item in store.read_all().await? {
        if item.get("reference").and_then(|r| r.as_str()) == Some(reference) {
            transactions.push(from_item::<Transaction>(item)?);
        }
    }
    transactions.sort_by_key(|t| t.created_at);
    Ok(transactions)
}

/// `GET /admin/registration/{eventId}/{id}/transactions`
pub async fn get_registration_transactions(
    services: &Services,
    request: &ApiRequest,
) -> ApiResponse {
    instrumented("getRegistrationTransactions", request, async {
        authorized_user(services, request).await?;
        let event_id = required_parameter(request, "eventId")?;
        let id = required_parameter(request, "id")?;

        let reference = Transaction::reference_for(event_id, id);
        let transactions = transactions_by_reference(services.transactions.as_ref(), &reference).await?;
        Ok(ApiResponse::ok(&transactions))
    })
    .await
}
