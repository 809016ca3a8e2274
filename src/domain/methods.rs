//! Static payment-method lookup tables.
//!
//! The per-currency method lists and the bank-transfer variants are data,
//! not control flow, so handlers and builders consult them through pure
//! functions.

/// Method codes always offered regardless of currency.
const DEFAULT_METHODS: [&str; 2] = ["automatic", "card"];

const CHINA_METHODS: [&str; 4] = ["automatic", "card", "alipay", "wechat_pay"];

const USD_METHODS: [&str; 10] = [
    "automatic",
    "card",
    "alipay",
    "wechat_pay",
    "affirm",
    "afterpay_clearpay",
    "customer_balance",
    "klarna",
    "us_bank_account",
    "paypal",
];

const AUD_METHODS: [&str; 8] = [
    "automatic",
    "card",
    "alipay",
    "au_becs_debit",
    "afterpay_clearpay",
    "klarna",
    "paypal",
    "wechat_pay",
];

const GBP_METHODS: [&str; 4] = ["automatic", "card", "bacs_debit", "paypal"];

const SGD_METHODS: [&str; 6] = [
    "automatic",
    "card",
    "alipay",
    "grabpay",
    "paynow",
    "wechat_pay",
];

const JPY_METHODS: [&str; 5] = ["automatic", "card", "alipay", "konbini", "wechat_pay"];

const EUR_METHODS: [&str; 14] = [
    "automatic",
    "card",
    "alipay",
    "bancontact",
    "customer_balance",
    "eps",
    "ideal",
    "giropay",
    "klarna",
    "p24",
    "paypal",
    "sepa_debit",
    "sofort",
    "wechat_pay",
];

const MYR_METHODS: [&str; 4] = ["automatic", "card", "fpx", "grabpay"];

/// Method codes Stripe can collect for a presentment currency.
pub fn supported_methods(currency: &str) -> &'static [&'static str] {
    match currency.to_uppercase().as_str() {
        "USD" | "CAD" => &USD_METHODS,
        "AUD" => &AUD_METHODS,
        "CNY" | "HKD" => &CHINA_METHODS,
        "SGD" => &SGD_METHODS,
        "JPY" => &JPY_METHODS,
        "GBP" => &GBP_METHODS,
        "EUR" => &EUR_METHODS,
        "MYR" => &MYR_METHODS,
        _ => &DEFAULT_METHODS,
    }
}

/// Merchant countries allowed to offer `customer_balance` bank transfers.
pub const BANK_TRANSFER_COUNTRIES: [&str; 9] =
    ["BE", "DE", "ES", "FR", "IE", "NL", "GB", "JP", "US"];

/// The bank-transfer network for a merchant base country, if the country
/// may offer bank transfers at all.
pub fn bank_transfer_type(country: &str) -> Option<&'static str> {
    if !BANK_TRANSFER_COUNTRIES.contains(&country) {
        return None;
    }
    Some(match country {
        "GB" => "gb_bank_transfer",
        "JP" => "jp_bank_transfer",
        "US" => "us_bank_transfer",
        _ => "eu_bank_transfer",
    })
}

/// Shopper-facing message for a Stripe error code. Unknown codes fall back
/// to the raw processor message at the call site.
pub fn localized_message(code: &str) -> Option<&'static str> {
    let message = match code {
        "amount_too_large" => {
            "The specified amount is greater than the maximum amount allowed. Use a lower amount and try again."
        }
        "amount_too_small" => {
            "The specified amount is less than the minimum amount allowed. Use a higher amount and try again."
        }
        "authentication_required" => {
            "The payment requires authentication to proceed. Please return to checkout and complete the payment."
        }
        "balance_insufficient" => {
            "The transfer or payout could not be completed because the associated account does not have a sufficient balance available."
        }
        "bank_account_declined" => {
            "The bank account provided can not be used either because it is not verified yet or it is not supported."
        }
        "bank_account_unusable" => {
            "The bank account provided cannot be used. Please try a different bank account."
        }
        "payment_intent_authentication_failure" => {
            "The provided payment method failed authentication. Provide a new payment method to attempt this payment again."
        }
        "payment_intent_payment_attempt_expired" => {
            "The latest attempt for this Payment has expired. Provide a new payment method to attempt this Payment again."
        }
        "payment_intent_unexpected_state" => {
            "The PaymentIntent's state was incompatible with the operation you were trying to perform."
        }
        "processing_error" => {
            "An error occurred while processing the card. Use a different payment method or try again later."
        }
        "invalid_number" => "The card number is invalid. Check the card details or use a different card.",
        "invalid_cvc" => "The card's security code is invalid. Check the card's security code or use a different card.",
        "invalid_expiry_year" => {
            "The card's expiration year is incorrect. Check the expiration date or use a different card."
        }
        "incorrect_address" => {
            "The address entered for the card is invalid. Please check the address or try a different card."
        }
        "incorrect_cvc" => "The security code entered is invalid. Please try again.",
        "incorrect_number" => {
            "The card number entered is invalid. Please try again with a valid card number or use a different card."
        }
        "incorrect_zip" => "The postal code entered for the card is invalid. Please try again.",
        "email_invalid" => {
            "The email address is invalid. Check that the email address is properly formatted and only includes allowed characters."
        }
        "card_declined" => "The card has been declined.",
        "insufficient_funds" => "The card has insufficient funds to complete the purchase.",
        "generic_decline" => "The card has been declined. Please try again with another card.",
        "lost_card" => "The card has been declined (Lost card). Please try again with another card.",
        "stolen_card" => "The card has been declined (Stolen card). Please try again with another card.",
        "expired_card" => "The card has expired. Please try again with another card.",
        "incomplete_number" => "Your card number is incomplete.",
        "incomplete_expiry" => "Your card's expiration date is incomplete.",
        "incomplete_cvc" => "Your card's security code is incomplete.",
        "invalid_expiry_year_past" => "Your card's expiration year is in the past.",
        "charge_already_captured" => {
            "The charge you're attempting to capture has already been captured."
        }
        "charge_already_refunded" => {
            "The charge you're attempting to refund has already been refunded."
        }
        "charge_expired_for_capture" => {
            "The charge cannot be captured as the authorization has expired. Auth and capture charges must be captured within seven days."
        }
        _ => return None,
    };
    Some(message)
}

/// Resolves the shopper-facing text for a processor error: the localized
/// mapping when one exists, otherwise the raw message untouched.
pub fn localize_error(code: Option<&str>, message: &str) -> String {
    code.and_then(localized_message)
        .map(str::to_string)
        .unwrap_or_else(|| message.to_string())
}
