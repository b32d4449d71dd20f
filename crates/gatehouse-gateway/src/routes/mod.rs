mod docs;
mod health;

pub use docs::docs_routes;
pub use health::{admin_routes, health_routes};
