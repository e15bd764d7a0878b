//! HTTP handlers for both planes.

pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod capabilities;
pub mod features;
pub mod health;
pub mod impersonation;
pub mod mfa;
pub mod permissions;
pub mod roles;
pub mod system_users;
pub mod tenants;
pub mod users;
pub mod webhooks;
