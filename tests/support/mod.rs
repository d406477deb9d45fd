#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

pub mod hub;
pub mod socket_guard;
