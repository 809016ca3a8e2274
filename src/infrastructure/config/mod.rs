pub mod stripe_settings;

pub use stripe_settings::StripeSettings;
