//! Application services: token issuance, permission routing, and the
//! session lifecycle surface.

pub mod router;
pub mod sessions;
pub mod token;

pub use router::{PermissionRouter, SessionContext};
pub use sessions::SessionService;
pub use token::{TokenClaims, TokenService};
