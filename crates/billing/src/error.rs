//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Missing or malformed input
    #[error("{0}")]
    InvalidInput(String),

    /// Caller does not own the referenced resource
    #[error("{0}")]
    Forbidden(String),

    #[error("No Stripe customer found for this user")]
    NoCustomer,

    #[error("Payment method not found: {0}")]
    PaymentMethodNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Stripe call failed or returned an unexpected shape
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Stripe not configured: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// True for errors caused by the caller rather than by an upstream system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidInput(_)
                | BillingError::Forbidden(_)
                | BillingError::NoCustomer
                | BillingError::PaymentMethodNotFound(_)
                | BillingError::SubscriptionNotFound(_)
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(request_error) => BillingError::StripeApi(
                request_error
                    .message
                    .unwrap_or_else(|| format!("request failed ({})", request_error.http_status)),
            ),
            other => BillingError::StripeApi(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}
