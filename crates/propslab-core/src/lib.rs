pub mod attempt;
pub mod collector;
pub mod dataset;
pub mod error;
pub mod record;
pub mod schema;
pub mod target;
pub mod testutil;
pub mod throttle;
pub mod traits;
pub mod util;

pub use collector::{Collector, RunOutcome, TargetFailure};
pub use dataset::{Dataset, DatasetSink};
pub use error::CollectError;
pub use record::{FieldValue, Record};
pub use schema::{ExtractionSchema, FieldRule, SchemaResolver, Transform};
pub use target::{FetchResult, RunConfig, Strategy, Target};
pub use traits::{Extractor, Fetcher, NullFetcher};
