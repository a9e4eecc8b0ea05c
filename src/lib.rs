//! factus-bridge: electronic-invoice lifecycle core.
//!
//! Owns the per-invoice FACTUS sub-state, the state machine that advances it
//! (create → validate → accept/reject → cancel), and all HTTP interaction
//! with the FACTUS/DIAN intermediary. The surrounding ERP talks to this crate
//! through the [`lifecycle::InvoiceLifecycle`] orchestrator and the REST
//! surface in [`rest`]; it never touches the authority client directly.
//!
//! ## Architecture
//! ```text
//! [ERP / REST caller] -> [rest] -> [lifecycle] -> [authority] -> FACTUS
//!                                       |
//!                                       v
//!                                    [store]
//! ```
//!
//! Sandbox vs production is decided once, at construction
//! ([`authority::build_authority_client`]); everything downstream is
//! branch-free with respect to the environment.

pub mod authority;
pub mod bootstrap;
pub mod config;
pub mod invoice;
pub mod lifecycle;
pub mod rest;
pub mod store;
