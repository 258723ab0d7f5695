pub mod benchmarks;
pub mod runs;
pub mod schema;
pub mod store;

pub use benchmarks::{BenchmarkRepository, FailOutcome};
pub use runs::RunRepository;
pub use store::SqliteStore;
