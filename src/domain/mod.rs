pub mod entities;
pub mod errors;
pub mod events;
pub mod methods;
pub mod value_objects;

pub use entities::Order;
pub use errors::{DomainError, DomainResult};
pub use events::{EventType, WebhookEvent};
pub use value_objects::OrderStatus;
