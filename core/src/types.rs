//! Value objects shared by both machines.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a show
    ShowId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for a host, agent or operator account
    UserId
);

macro_rules! external_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Wraps an external reference as a `", stringify!($name), "`")]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw reference
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

external_ref!(
    /// Payment gateway invoice id, correlated 1:1 with a ticket
    InvoiceId
);
external_ref!(
    /// External hash/reference of a settled payment or refund
    TransactionId
);
external_ref!(
    /// Payment gateway id of a refund payout
    PayoutId
);

// ============================================================================
// Money
// ============================================================================

/// Amount in minor currency units (cents, satoshis, ...)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from major units, saturating on overflow
    #[must_use]
    pub const fn from_dollars(dollars: u64) -> Self {
        Self(dollars.saturating_mul(100))
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Adds two amounts, clamping at `u64::MAX`
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtracts two amounts, clamping at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Cancellation vocabulary
// ============================================================================

/// Who triggered a transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    /// The show host
    Host,
    /// The ticket holder
    Customer,
    /// A platform operator resolving a dispute or incident
    Operator,
    /// A scheduled job or gateway expiry
    Timer,
}

impl Actor {
    /// Wire name of the actor
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "HOST",
            Self::Customer => "CUSTOMER",
            Self::Operator => "OPERATOR",
            Self::Timer => "TIMER",
        }
    }
}

/// Why a show or ticket was cancelled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationReason {
    /// The invoice expired or the reservation timer fired before payment
    PaymentTimeout,
    /// The host called the show off
    HostCancelled,
    /// The customer asked for their money back
    CustomerRequested,
    /// The ticket was cancelled because its show was
    ShowCancelled,
    /// Cancellation decided while resolving a dispute
    DisputeResolution,
    /// Free-form reason supplied by an operator
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_display_uses_two_minor_digits() {
        assert_eq!(Money::from_cents(1005).to_string(), "10.05");
        assert_eq!(Money::from_dollars(3).to_string(), "3.00");
    }

    #[test]
    fn money_saturates_instead_of_wrapping() {
        assert_eq!(Money::from_cents(5).saturating_sub(Money::from_cents(9)), Money::ZERO);
        assert_eq!(Money::from_cents(u64::MAX).checked_add(Money::from_cents(1)), None);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = TicketId::new();
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{id}\""));
        let reason = serde_json::to_string(&CancellationReason::PaymentTimeout).unwrap_or_default();
        assert_eq!(reason, "\"PAYMENT_TIMEOUT\"");
    }
}
