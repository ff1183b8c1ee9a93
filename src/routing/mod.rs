//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, method)
//!     → table.rs (exact path, then method)
//!     → Return: endpoint, synthesised OPTIONS answer, 404 or 405
//!
//! Registration (before serving):
//!     EndpointSpecification[]
//!     → RouteTable::add / delete
//!     → Freeze behind Arc in the dispatcher
//! ```
//!
//! # Design Decisions
//! - Routes registered up front, immutable at runtime
//! - No patterns in the hot path (exact path lookup only)
//! - Deterministic: same input always resolves the same way
//! - Explicit 404/405 errors rather than silent defaults

pub mod endpoint;
pub mod table;

pub use endpoint::{handler_fn, Action, EndpointSpecification, Handler, HandlerFuture};
pub use table::{Resolution, RouteTable, RoutingError};
