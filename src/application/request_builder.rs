//! Builders for payment-intent and checkout-session payloads.
//!
//! Pure functions over the order, the settings and the static method
//! tables; the service layer supplies the resolved customer and decides
//! the tax question before dispatch.

use crate::domain::entities::Order;
use crate::domain::methods::bank_transfer_type;
use crate::domain::value_objects::to_minor_units;
use crate::infrastructure::config::stripe_settings::StripeSettings;
use crate::ports::extension_port::RequestExtension;
use crate::ports::stripe_gateway_port::{
    AddressParams, AutomaticPaymentMethods, AutomaticTaxParams, CheckoutSessionRequest,
    CustomerUpdateParams, PaymentIntentData, PaymentIntentRequest, PaymentIntentUpdate,
    PaymentMethodData, PriceData, ProductData, SessionLineItem, ShippingParams,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Per-checkout flags carried from the checkout form.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckoutOptions {
    pub express_checkout: bool,
    pub save_payment_method: bool,
}

pub fn order_description(settings: &StripeSettings, order: &Order) -> String {
    format!("{} - Order {}", settings.site_name, order.number())
}

/// Base metadata attached to every intent and session, run through the
/// extension hook so installations can enrich it.
pub fn base_metadata(
    settings: &StripeSettings,
    order: &Order,
    extensions: &dyn RequestExtension,
) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("customer_name".to_string(), order.billing.full_name());
    metadata.insert("customer_email".to_string(), order.billing.email.clone());
    metadata.insert("order_id".to_string(), order.number());
    metadata.insert("site_url".to_string(), settings.site_url.clone());
    extensions.filter_metadata(&mut metadata, order);
    metadata
}

/// Region-specific method sub-configuration.
///
/// Bank transfers are only attached when the merchant's base country may
/// offer them; the concrete transfer network is country-dependent.
pub fn payment_method_options(
    methods: &[String],
    base_country: &str,
    include_wechat_client: bool,
) -> Option<Value> {
    let mut options = Map::new();

    if include_wechat_client && methods.iter().any(|m| m == "wechat_pay") {
        options.insert("wechat_pay".to_string(), json!({ "client": "web" }));
    }

    if methods.iter().any(|m| m == "customer_balance") {
        if let Some(transfer) = bank_transfer_type(base_country) {
            options.insert(
                "customer_balance".to_string(),
                json!({
                    "funding_type": "bank_transfer",
                    "bank_transfer": {
                        "type": transfer,
                        transfer: { "country": base_country },
                    },
                }),
            );
        }
    }

    (!options.is_empty()).then_some(Value::Object(options))
}

fn shipping_params(order: &Order) -> Option<ShippingParams> {
    let shipping = order.shipping.as_ref()?;
    if shipping.address.postcode.is_empty() {
        return None;
    }
    Some(ShippingParams {
        name: shipping.full_name(),
        address: AddressParams {
            line1: shipping.address.line1.clone(),
            line2: shipping.address.line2.clone(),
            city: shipping.address.city.clone(),
            state: shipping.address.state.clone(),
            postal_code: shipping.address.postcode.clone(),
            country: shipping.address.country.clone(),
        },
    })
}

/// Builds the payment-intent creation payload.
pub fn build_intent_request(
    settings: &StripeSettings,
    order: &Order,
    customer_id: Option<String>,
    options: CheckoutOptions,
    extensions: &dyn RequestExtension,
) -> PaymentIntentRequest {
    let methods = settings.enabled_payment_methods();

    let mut request = PaymentIntentRequest {
        amount: to_minor_units(order.total, &order.currency),
        currency: order.currency.to_lowercase(),
        description: order_description(settings, order),
        metadata: base_metadata(settings, order, extensions),
        capture_method: "automatic".to_string(),
        customer: customer_id,
        automatic_payment_methods: None,
        payment_method_types: None,
        payment_method_options: payment_method_options(&methods, &settings.base_country, false),
        statement_descriptor: None,
        shipping: None,
        setup_future_usage: None,
    };

    // An empty method list and express checkout both delegate method
    // selection to Stripe; the explicit list is mutually exclusive with
    // that mode.
    if methods.is_empty() || options.express_checkout {
        request.automatic_payment_methods = Some(AutomaticPaymentMethods { enabled: true });
    } else {
        request.payment_method_types = Some(methods);
    }

    // Express flows pass shipping client-side instead.
    if !options.express_checkout {
        request.shipping = shipping_params(order);
    }

    if settings.saved_cards && options.save_payment_method {
        request.setup_future_usage = Some("off_session".to_string());
    }

    extensions.filter_intent_request(&mut request, order);
    request
}

/// The patch for an existing intent that drifted from the order: only the
/// changed attributes are sent, and an empty patch means no call at all.
pub fn build_intent_update(
    settings: &StripeSettings,
    order: &Order,
    current_amount: i64,
    current_methods: &[String],
) -> PaymentIntentUpdate {
    let mut update = PaymentIntentUpdate::default();

    let new_amount = to_minor_units(order.total, &order.currency);
    if current_amount != new_amount {
        update.amount = Some(new_amount);
    }

    let methods = settings.enabled_payment_methods();
    if !methods.is_empty() && current_methods != methods.as_slice() {
        update.payment_method_types = Some(methods);
    }

    update
}

/// Hosted-page line items: one entry per order line, plus shipping and
/// platform tax lines when they carry an amount.
pub fn build_line_items(order: &Order) -> Vec<SessionLineItem> {
    let currency = order.currency.to_lowercase();
    let mut lines: Vec<SessionLineItem> = order
        .line_items
        .iter()
        .map(|item| SessionLineItem {
            price_data: PriceData {
                currency: currency.clone(),
                unit_amount: to_minor_units(item.unit_amount, &order.currency),
                product_data: ProductData {
                    name: item.name.clone(),
                    tax_code: item.tax_code.clone(),
                    images: item.image_url.clone().map(|url| vec![url]),
                },
            },
            quantity: item.quantity,
        })
        .collect();

    if order.shipping.is_some() && order.shipping_total > rust_decimal::Decimal::ZERO {
        lines.push(SessionLineItem {
            price_data: PriceData {
                currency: currency.clone(),
                unit_amount: to_minor_units(order.shipping_total, &order.currency),
                product_data: ProductData {
                    name: "Shipping".to_string(),
                    tax_code: None,
                    images: None,
                },
            },
            quantity: 1,
        });
    }

    if order.tax_total > rust_decimal::Decimal::ZERO {
        lines.push(SessionLineItem {
            price_data: PriceData {
                currency,
                unit_amount: to_minor_units(order.tax_total, &order.currency),
                product_data: ProductData {
                    name: "Tax".to_string(),
                    tax_code: None,
                    images: None,
                },
            },
            quantity: 1,
        });
    }

    lines
}

/// Whether this checkout wants Stripe automatic tax: the merchant enabled
/// it (with the platform tax engine off), or a line carries a tax
/// classification code.
pub fn session_wants_auto_tax(settings: &StripeSettings, order: &Order) -> bool {
    settings.auto_tax_active() || order.line_items.iter().any(|item| item.tax_code.is_some())
}

/// Builds the hosted checkout-session payload.
pub fn build_session_request(
    settings: &StripeSettings,
    order: &Order,
    customer_id: Option<String>,
    options: CheckoutOptions,
    success_url: String,
    cancel_url: String,
    extensions: &dyn RequestExtension,
) -> CheckoutSessionRequest {
    let methods = settings.enabled_payment_methods();
    let has_customer = customer_id.is_some();

    let mut request = CheckoutSessionRequest {
        mode: "payment".to_string(),
        line_items: build_line_items(order),
        metadata: base_metadata(settings, order, extensions),
        customer: customer_id,
        customer_update: has_customer.then(|| CustomerUpdateParams {
            name: "auto".to_string(),
            address: "auto".to_string(),
            shipping: "auto".to_string(),
        }),
        billing_address_collection: Some("auto".to_string()),
        automatic_tax: None,
        payment_method_types: None,
        payment_method_options: payment_method_options(&methods, &settings.base_country, true),
        payment_method_data: None,
        customer_email: None,
        payment_intent_data: PaymentIntentData {
            description: order_description(settings, order),
            setup_future_usage: None,
        },
        customer_creation: (!has_customer).then(|| "if_required".to_string()),
        success_url,
        cancel_url,
    };

    if !methods.is_empty() {
        request.payment_method_types = Some(methods);
    }

    if settings.saved_cards && options.save_payment_method {
        request.payment_method_data = Some(PaymentMethodData {
            allow_redisplay: "always".to_string(),
        });
        request.payment_intent_data.setup_future_usage = Some("off_session".to_string());
    }

    if session_wants_auto_tax(settings, order) {
        request.automatic_tax = Some(AutomaticTaxParams { enabled: true });
    }

    extensions.filter_session_request(&mut request, order);
    request
}

/// Drops the customer binding from a session request; used when the
/// resolved customer cannot participate in automatic tax and checkout
/// falls back to guest-style collection.
pub fn strip_customer_binding(request: &mut CheckoutSessionRequest) {
    request.customer = None;
    request.customer_update = None;
    request.customer_creation = Some("if_required".to_string());
}
