//! HTTP layer: webhook channels served by `parley serve`.
//!
//! Each `[[channels]]` entry of type `webhook` is reachable at
//! `POST /channels/{name}`.

pub mod error;
pub mod handlers;
pub mod router;
