//! Domain services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the sign-in state machine, the provider client, and
//! session bookkeeping so route handlers stay focused on HTTP translation.

pub mod auth;
pub mod google;
pub mod session;
