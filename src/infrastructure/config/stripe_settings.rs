use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stripe gateway configuration.
///
/// Built once at startup and passed into the API client and the request
/// builders, so tests can construct their own values and nothing reads
/// mutable process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeSettings {
    /// Whether the test keys are in effect
    pub test_mode: bool,

    pub live_secret_key: String,

    pub test_secret_key: String,

    pub live_publishable_key: String,

    pub test_publishable_key: String,

    /// Shared secret for webhook signature verification; verification is
    /// skipped when unset
    pub webhook_secret: Option<String>,

    /// Merchant-configured payment method codes ("automatic" delegates
    /// collection to Stripe)
    pub payment_methods: Vec<String>,

    /// Whether shoppers may save cards for future purchases
    pub saved_cards: bool,

    /// Whether Stripe automatic tax is enabled in the gateway settings
    pub enable_auto_tax: bool,

    /// Whether the shop platform's own tax engine is on
    pub platform_tax_enabled: bool,

    /// Merchant base country (ISO 3166-1 alpha-2)
    pub base_country: String,

    pub site_name: String,

    pub site_url: String,

    /// Checkout page shoppers are sent back to on failure or cancel
    pub checkout_url: String,

    /// Order-received page template, completed per order
    pub return_url_base: String,

    /// Stripe API base URL
    pub api_base: String,
}

impl StripeSettings {
    pub fn from_env() -> Arc<Self> {
        let payment_methods = std::env::var("STRIPE_PAYMENT_METHODS")
            .unwrap_or_else(|_| "automatic".to_string())
            .split(',')
            .map(|method| method.trim().to_string())
            .filter(|method| !method.is_empty())
            .collect();

        Arc::new(Self {
            test_mode: std::env::var("STRIPE_TEST_MODE")
                .map(|value| value == "true")
                .unwrap_or(true),
            live_secret_key: std::env::var("STRIPE_LIVE_SECRET_KEY").unwrap_or_default(),
            test_secret_key: std::env::var("STRIPE_TEST_SECRET_KEY").unwrap_or_default(),
            live_publishable_key: std::env::var("STRIPE_LIVE_PUBLISHABLE_KEY").unwrap_or_default(),
            test_publishable_key: std::env::var("STRIPE_TEST_PUBLISHABLE_KEY").unwrap_or_default(),
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            payment_methods,
            saved_cards: std::env::var("STRIPE_SAVED_CARDS")
                .map(|value| value == "true")
                .unwrap_or(false),
            enable_auto_tax: std::env::var("STRIPE_AUTO_TAX")
                .map(|value| value == "true")
                .unwrap_or(false),
            platform_tax_enabled: std::env::var("PLATFORM_TAX_ENABLED")
                .map(|value| value == "true")
                .unwrap_or(false),
            base_country: std::env::var("SHOP_BASE_COUNTRY").unwrap_or_else(|_| "US".to_string()),
            site_name: std::env::var("SHOP_SITE_NAME").unwrap_or_else(|_| "Shop".to_string()),
            site_url: std::env::var("SHOP_SITE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            checkout_url: std::env::var("SHOP_CHECKOUT_URL")
                .unwrap_or_else(|_| "http://localhost:3000/checkout".to_string()),
            return_url_base: std::env::var("SHOP_RETURN_URL_BASE")
                .unwrap_or_else(|_| "http://localhost:3000/order-received".to_string()),
            api_base: std::env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
        })
    }

    /// The secret key for the active mode.
    pub fn secret_key(&self) -> &str {
        if self.test_mode {
            &self.test_secret_key
        } else {
            &self.live_secret_key
        }
    }

    pub fn publishable_key(&self) -> &str {
        if self.test_mode {
            &self.test_publishable_key
        } else {
            &self.live_publishable_key
        }
    }

    /// Explicitly configured method codes; "automatic" is a placeholder,
    /// not a method, so it is filtered out here.
    pub fn enabled_payment_methods(&self) -> Vec<String> {
        self.payment_methods
            .iter()
            .filter(|method| method.as_str() != "automatic")
            .cloned()
            .collect()
    }

    /// Automatic tax applies when the merchant turned it on and the shop
    /// platform is not already computing tax itself.
    pub fn auto_tax_active(&self) -> bool {
        self.enable_auto_tax && !self.platform_tax_enabled
    }
}

#[cfg(test)]
impl StripeSettings {
    /// Fixed settings for unit tests.
    pub fn for_tests() -> Self {
        Self {
            test_mode: true,
            live_secret_key: "sk_live_x".to_string(),
            test_secret_key: "sk_test_x".to_string(),
            live_publishable_key: "pk_live_x".to_string(),
            test_publishable_key: "pk_test_x".to_string(),
            webhook_secret: Some("whsec_x".to_string()),
            payment_methods: vec!["automatic".to_string()],
            saved_cards: false,
            enable_auto_tax: false,
            platform_tax_enabled: false,
            base_country: "US".to_string(),
            site_name: "Shop".to_string(),
            site_url: "https://shop.example".to_string(),
            checkout_url: "https://shop.example/checkout".to_string(),
            return_url_base: "https://shop.example/order-received".to_string(),
            api_base: "https://api.stripe.com/v1".to_string(),
        }
    }
}
