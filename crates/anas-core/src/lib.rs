pub mod benchmark;
pub mod error;
pub mod grader;
pub mod run;
pub mod schema;
pub mod store;

pub use benchmark::{BenchmarkResult, BenchmarkStatus, BenchmarkTicket, Evaluation, QualityRating};
pub use error::{AnasError, AnasResult, GradingError};
pub use grader::{GradeRequest, Grader};
pub use run::{EntrySummary, GeneratedItem, Persona, RunMetadata, RunReceipt, RunRecord};
pub use schema::OutputSchema;
pub use store::{ttl_from_hours, Clock, KvStore, ManualClock, SystemClock};
