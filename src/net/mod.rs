//! HTTP access with bounded timeout retry.
//!
//! Every network call in the crate goes through [`ResilientFetcher`], which
//! turns the raw `reqwest` result into a [`FetchOutcome`]. Outcomes are plain
//! values: a missing page or an exhausted retry budget is something the caller
//! inspects, not a panic or an early return.

mod fetcher;

pub use fetcher::{
    ClientErrorKind, DEFAULT_BACKOFF, DEFAULT_TIMEOUT, FetchBody, FetchOutcome, FetchRequest,
    FetchResponse, FetcherConfig, MAX_TRIES_TO_FETCH, ResilientFetcher,
};
