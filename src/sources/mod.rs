//! Backend adapters for the tier and admin lookup seams.
//!
//! | Feature | Adapters                                  |
//! |---------|-------------------------------------------|
//! | `http`  | [`HttpTierSource`], [`HttpAdminLookup`]   |

pub mod http;

pub use http::{HttpAdminLookup, HttpTierSource};
