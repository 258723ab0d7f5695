pub mod aggregate;
pub mod jobs;
pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod reconcile;
pub mod verdict;

#[cfg(test)]
mod testing;

pub use jobs::{BenchmarkService, CancellationToken};
pub use openai::OpenAiGrader;
pub use pipeline::BenchmarkPipeline;
pub use prompt::PromptTemplate;
