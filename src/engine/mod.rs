pub mod attribution;
pub mod cochange;
pub mod diff;
pub mod extractor;
pub mod git;
pub mod history;
pub mod lazy;
pub mod metrics;
pub mod parser;
pub mod symbols;
#[cfg(test)]
pub(crate) mod testing;
pub mod transcript;
