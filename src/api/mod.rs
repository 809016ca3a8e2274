pub mod handlers;
pub mod routes;
pub mod signature;

pub use handlers::AppState;
pub use routes::create_router;
