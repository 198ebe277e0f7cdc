//! HTTP API handlers for stockwell-import
//!
//! Microservices integration via HTTP REST + SSE.

pub mod health;
pub mod import_session;
pub mod settings;
pub mod sse;

pub use health::health_routes;
pub use import_session::import_routes;
pub use settings::settings_routes;
pub use sse::import_event_stream;
