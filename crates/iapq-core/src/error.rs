//! Error taxonomy for the reconciliation engine.
//!
//! - [`ValidationError`]: rejected before the queue is touched.
//! - [`TransactionError`]: a backend failure delivered to the caller's
//!   callback. User cancellation is kept as its own variant.
//! - [`Rejection`]: silent admission refusals (`restore` while a session is
//!   active, `subscribe_completions` while subscribed). Never raised as errors.
//! - [`ResidueReason`]: why a transaction was left unclaimed. Logged only.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error domain used by the store backend for its own error codes.
pub const STORE_ERROR_DOMAIN: &str = "store";

// ---------------------------------------------------------------------------
// StoreErrorCode
// ---------------------------------------------------------------------------

/// Closed set of the backend's numeric codes within [`STORE_ERROR_DOMAIN`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreErrorCode {
    Unknown,
    ClientInvalid,
    PaymentCancelled,
    PaymentInvalid,
    PaymentNotAllowed,
    ProductNotAvailable,
    CloudServicePermissionDenied,
    CloudServiceNetworkConnectionFailed,
    CloudServiceRevoked,
    PrivacyAcknowledgementRequired,
    UnauthorizedRequestData,
    InvalidOfferIdentifier,
    InvalidSignature,
    MissingOfferParams,
    InvalidOfferPrice,
    OverlayCancelled,
}

impl StoreErrorCode {
    pub fn from_code(code: i64) -> Option<Self> {
        use StoreErrorCode::*;
        let c = match code {
            0 => Unknown,
            1 => ClientInvalid,
            2 => PaymentCancelled,
            3 => PaymentInvalid,
            4 => PaymentNotAllowed,
            5 => ProductNotAvailable,
            6 => CloudServicePermissionDenied,
            7 => CloudServiceNetworkConnectionFailed,
            8 => CloudServiceRevoked,
            9 => PrivacyAcknowledgementRequired,
            10 => UnauthorizedRequestData,
            11 => InvalidOfferIdentifier,
            12 => InvalidSignature,
            13 => MissingOfferParams,
            14 => InvalidOfferPrice,
            15 => OverlayCancelled,
            _ => return None,
        };
        Some(c)
    }

    pub fn code(&self) -> i64 {
        use StoreErrorCode::*;
        match self {
            Unknown => 0,
            ClientInvalid => 1,
            PaymentCancelled => 2,
            PaymentInvalid => 3,
            PaymentNotAllowed => 4,
            ProductNotAvailable => 5,
            CloudServicePermissionDenied => 6,
            CloudServiceNetworkConnectionFailed => 7,
            CloudServiceRevoked => 8,
            PrivacyAcknowledgementRequired => 9,
            UnauthorizedRequestData => 10,
            InvalidOfferIdentifier => 11,
            InvalidSignature => 12,
            MissingOfferParams => 13,
            InvalidOfferPrice => 14,
            OverlayCancelled => 15,
        }
    }

    /// Codes that mean "the user backed out", not "the store failed".
    pub fn is_user_cancellation(&self) -> bool {
        matches!(self, Self::PaymentCancelled | Self::OverlayCancelled)
    }
}

// ---------------------------------------------------------------------------
// StoreError (raw backend error)
// ---------------------------------------------------------------------------

/// Error exactly as the backend reported it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreError {
    #[serde(default = "default_domain")]
    pub domain: String,
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

fn default_domain() -> String {
    STORE_ERROR_DOMAIN.to_string()
}

impl StoreError {
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    /// An error in the store's own domain.
    pub fn store(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self::new(STORE_ERROR_DOMAIN, code.code(), message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::store(StoreErrorCode::Unknown, message)
    }

    pub fn cancelled() -> Self {
        Self::store(StoreErrorCode::PaymentCancelled, "payment cancelled")
    }

    /// Known store code, or `None` for foreign domains / unknown numbers.
    pub fn kind(&self) -> Option<StoreErrorCode> {
        if self.domain != STORE_ERROR_DOMAIN {
            return None;
        }
        StoreErrorCode::from_code(self.code)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}#{}", self.domain, self.code)
        } else {
            write!(f, "{}#{}: {}", self.domain, self.code, self.message)
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// TransactionError
// ---------------------------------------------------------------------------

/// Failure delivered to a caller for a failed transaction or restore.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("payment cancelled by user ({0})")]
    Cancelled(StoreError),
    #[error("store transaction failed: {0}")]
    Store(StoreError),
}

impl TransactionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn store_error(&self) -> &StoreError {
        match self {
            Self::Cancelled(e) | Self::Store(e) => e,
        }
    }

    /// Map the error attached to a failed transaction. A failed transaction
    /// without an error still maps to a failure, with code `Unknown`.
    pub fn from_failed(error: Option<&StoreError>) -> Self {
        match error {
            Some(e) => Self::from(e.clone()),
            None => Self::Store(StoreError::unknown("transaction failed without an error")),
        }
    }
}

impl From<StoreError> for TransactionError {
    fn from(e: StoreError) -> Self {
        match e.kind() {
            Some(code) if code.is_user_cancellation() => Self::Cancelled(e),
            _ => Self::Store(e),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Raised by `start_payment` before any registry or queue interaction.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("quantity must be > 0 (got {quantity})")]
    NonPositiveQuantity { quantity: i64 },
    #[error("catalog item id must not be empty")]
    EmptyCatalogItemId,
}

// ---------------------------------------------------------------------------
// Rejection / Admission
// ---------------------------------------------------------------------------

/// Why a singleton slot refused a new occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    SessionAlreadyActive,
    SubscriptionAlreadySet,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::SessionAlreadyActive => write!(f, "a restore session is already active"),
            Rejection::SubscriptionAlreadySet => {
                write!(f, "a completion subscription is already set")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ResidueReason
// ---------------------------------------------------------------------------

/// Why a transaction is still sitting in the engine. Diagnostic only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidueReason {
    /// `Purchasing`: held until a later state arrives.
    InFlight,
    /// No payment, restore session or subscription claimed it.
    NoMatchingRequest,
}

impl fmt::Display for ResidueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResidueReason::InFlight => write!(f, "in_flight"),
            ResidueReason::NoMatchingRequest => write!(f, "no_matching_request"),
        }
    }
}

/// Result of offering a restore session or subscription to its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(Rejection),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}
