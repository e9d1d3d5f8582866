//! CQRS datasource routing for Waybill
//!
//! Every repository call declares a [`Role`]. The [`DataSourceRouter`] maps
//! that role onto the physical connection the deployment's [`CqrsMode`]
//! provisions: a primary for writes, a replica for reads, or a single
//! connection serving both.
//!
//! ## Quick Start
//!
//! ```rust
//! use waybill_cqrs::*;
//!
//! let router = DataSourceRouter::new(
//!     CqrsMode::Both,
//!     Some("postgres://primary/tms"),
//!     Some("postgres://replica/tms"),
//! )
//! .unwrap();
//!
//! assert_eq!(*router.resolve(Role::Read), "postgres://replica/tms");
//! assert_eq!(*router.resolve(Role::Write), "postgres://primary/tms");
//! ```

pub mod error;
pub mod role;
pub mod router;

pub use error::{RoutingError, RoutingResult};
pub use role::{CqrsMode, Role};
pub use router::DataSourceRouter;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::error::{RoutingError, RoutingResult};
    pub use crate::role::{CqrsMode, Role};
    pub use crate::router::DataSourceRouter;
}
