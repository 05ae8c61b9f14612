//! Client for the hub's aggregated object model.

pub mod client;
pub mod model;
pub mod notify;

pub use client::{
    PrimeClient, PrimeClientConfig, PrimeRequest, PrimeResponse, CMD_PRIME_REQUEST,
    EVT_PRIME_RESPONSE,
};
pub use model::*;
pub use notify::{PrimeComponent, PrimeNotify, EVT_PRIME_NOTIFY};
