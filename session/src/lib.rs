//! # session
//!
//! Client-side session layer for the campusmart storefront.
//!
//! The [`manager::SessionManager`] owns "who is signed in": it hydrates the
//! user from the persisted token, reacts when another context signs in or out,
//! and funnels every `401` from the backend into one logout. Around it sit the
//! token store, the identity-provider client, the REST client, the login /
//! register / profile forms, and the route policy shared with the server-side
//! guard.

pub mod api;
pub mod config;
pub mod forms;
pub mod gateway;
pub mod manager;
pub mod routes;
pub mod token_store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
