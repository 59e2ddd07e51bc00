//! Security service models

pub mod activity;
pub mod session;
pub mod user;

// Re-export for convenience
pub use activity::{AuthMethod, LoginActivityRecord, LoginStatus, NewLoginActivity};
pub use session::{Device, Session, SessionMetadata};
pub use user::User;
