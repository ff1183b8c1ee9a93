//! HTTP request multiplexer library

pub mod config;
pub mod http;
pub mod routing;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::MuxConfig;
pub use http::{HttpServer, Mux, MuxOptions};
pub use lifecycle::Shutdown;
pub use routing::{EndpointSpecification, RouteTable};
