use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order status, mirroring the shop platform's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    /// Awaiting payment
    Pending,
    /// Authorized or asynchronous payment awaiting clearing/capture
    OnHold,
    /// Paid, awaiting fulfilment
    Processing,
    /// Fulfilled
    Completed,
    /// Payment failed
    Failed,
    /// Cancelled
    Cancelled,
    /// Fully refunded
    Refunded,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::OnHold => write!(f, "on-hold"),
            OrderStatus::Processing => write!(f, "processing"),
            OrderStatus::Completed => write!(f, "completed"),
            OrderStatus::Failed => write!(f, "failed"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl OrderStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "on-hold" => Some(OrderStatus::OnHold),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Completed),
            "failed" => Some(OrderStatus::Failed),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

/// Currencies whose smallest Stripe unit equals one whole unit.
/// https://stripe.com/docs/currencies#zero-decimal
const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "bif", // Burundian Franc
    "clp", // Chilean Peso
    "djf", // Djiboutian Franc
    "gnf", // Guinean Franc
    "jpy", // Japanese Yen
    "kmf", // Comorian Franc
    "krw", // South Korean Won
    "mga", // Malagasy Ariary
    "pyg", // Paraguayan Guarani
    "rwf", // Rwandan Franc
    "ugx", // Ugandan Shilling
    "vnd", // Vietnamese Dong
    "vuv", // Vanuatu Vatu
    "xaf", // Central African Cfa Franc
    "xof", // West African Cfa Franc
    "xpf", // Cfp Franc
];

pub fn is_zero_decimal_currency(currency: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES.contains(&currency.to_lowercase().as_str())
}

/// Converts a decimal shop amount into Stripe's minor-unit integer
/// representation. Zero-decimal currencies pass through rounded; every
/// other currency is multiplied by 100 after rounding to two decimals.
pub fn to_minor_units(amount: Decimal, currency: &str) -> i64 {
    let minor = if is_zero_decimal_currency(currency) {
        amount.round()
    } else {
        (amount.round_dp(2) * Decimal::from(100)).round()
    };
    minor.abs().to_i64().unwrap_or(0)
}

/// Inverse of [`to_minor_units`], for formatting amounts Stripe returns.
pub fn from_minor_units(amount: i64, currency: &str) -> Decimal {
    if is_zero_decimal_currency(currency) {
        Decimal::from(amount)
    } else {
        Decimal::new(amount, 2)
    }
}

/// Stripe minimum charge per currency, in minor units.
pub fn minimum_amount(currency: &str) -> i64 {
    match currency.to_uppercase().as_str() {
        "USD" | "CAD" | "EUR" | "CHF" | "AUD" | "SGD" => 50,
        "GBP" => 30,
        "DKK" => 250,
        "NOK" | "SEK" => 300,
        "JPY" => 5000,
        "MXN" => 1000,
        "HKD" => 400,
        _ => 50,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_decimal_round_trip() {
        assert_eq!(to_minor_units(dec!(1500), "JPY"), 1500);
        assert_eq!(to_minor_units(dec!(19.99), "USD"), 1999);
        assert_eq!(from_minor_units(1500, "jpy"), dec!(1500));
        assert_eq!(from_minor_units(1999, "usd"), dec!(19.99));
    }

    #[test]
    fn test_to_minor_units_rounds_to_currency_precision() {
        assert_eq!(to_minor_units(dec!(10.005), "USD"), 1000);
        assert_eq!(to_minor_units(dec!(10.015), "USD"), 1002);
        assert_eq!(to_minor_units(dec!(1500.4), "KRW"), 1500);
    }

    #[test]
    fn test_unknown_currency_defaults_to_two_decimals() {
        assert_eq!(to_minor_units(dec!(12.34), "XYZ"), 1234);
        assert_eq!(from_minor_units(1234, "XYZ"), dec!(12.34));
    }

    #[test]
    fn test_minimum_amount_table() {
        assert_eq!(minimum_amount("usd"), 50);
        assert_eq!(minimum_amount("GBP"), 30);
        assert_eq!(minimum_amount("JPY"), 5000);
        assert_eq!(minimum_amount("BRL"), 50);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::OnHold,
            OrderStatus::Processing,
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(OrderStatus::parse("draft"), None);
    }
}
