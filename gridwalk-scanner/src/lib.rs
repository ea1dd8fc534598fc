pub mod analyze;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod pacer;
pub mod probe;
pub mod result;

pub use crawler::{Crawler, RedirectScope, StopSignal};
pub use error::{ScanError, TransportError};
pub use fetch::{Fetch, FetchOutcome, HttpFetcher};
pub use frontier::Frontier;
pub use result::{PageRecord, ScanResult, Target};
