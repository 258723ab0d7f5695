use crate::error::GradingError;
use crate::schema::OutputSchema;

/// One structured-output request to an LLM grader.
#[derive(Debug, Clone)]
pub struct GradeRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompts: &'a [String],
    pub image_urls: &'a [String],
    pub schema: &'a OutputSchema,
    pub temperature: f32,
    /// `None` leaves the output length uncapped.
    pub max_tokens: Option<u32>,
}

/// External grading capability: submit prompts under an output schema and
/// get back the raw model text.
pub trait Grader: Send + Sync {
    fn grade(&self, request: &GradeRequest<'_>) -> Result<String, GradingError>;
    fn name(&self) -> &str;
}
