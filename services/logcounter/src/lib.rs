//! Log counter service: subscribes to the firehose, tallies tagged test
//! messages per `(app, run)` and reports delivered versus expected counts
//! when the operator stops it.
pub mod config;
pub mod firehose;
pub mod names;
pub mod observability;
pub mod runner;
pub mod uaa;

#[cfg(test)]
mod test_support;
