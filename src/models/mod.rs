pub mod cochange;
pub mod commit;
pub mod metrics;
pub mod quality;
pub mod report;
pub mod session;
pub mod symbol;
pub mod window;
