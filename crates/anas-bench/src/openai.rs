use std::time::Duration;

use serde_json::{json, Value};

use anas_core::{GradeRequest, Grader, GradingError};

/// Grader backed by an OpenAI-compatible chat completions endpoint with
/// structured (JSON schema) output.
pub struct OpenAiGrader {
    base_url: String,
    api_key: String,
    model: String,
    agent: ureq::Agent,
}

impl OpenAiGrader {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub fn request_body(&self, request: &GradeRequest<'_>) -> Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        for prompt in request.user_prompts {
            if request.image_urls.is_empty() {
                messages.push(json!({ "role": "user", "content": prompt }));
            } else {
                let mut parts = vec![json!({ "type": "text", "text": prompt })];
                parts.extend(request.image_urls.iter().map(|url| {
                    json!({ "type": "image_url", "image_url": { "url": url } })
                }));
                messages.push(json!({ "role": "user", "content": parts }));
            }
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema.name,
                    "description": request.schema.description,
                    "schema": request.schema.to_json_schema(),
                    "strict": true,
                },
            },
        });
        if let Some(max) = request.max_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }
}

/// `choices[0].message.content` of a chat completion.
pub fn completion_text(response: &Value) -> Result<String, GradingError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GradingError::Parse("completion has no message content".into()))
}

impl Grader for OpenAiGrader {
    fn grade(&self, request: &GradeRequest<'_>) -> Result<String, GradingError> {
        let body = self.request_body(request);
        let mut call = self.agent.post(&self.endpoint());
        if !self.api_key.is_empty() {
            call = call.set("Authorization", &format!("Bearer {}", self.api_key));
        }
        let response = match call.send_json(body) {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                return Err(GradingError::Call(format!("HTTP {code}: {text}")));
            }
            Err(e) => return Err(GradingError::Call(e.to_string())),
        };
        let json: Value = response
            .into_json()
            .map_err(|e| GradingError::Call(format!("reading completion: {e}")))?;
        completion_text(&json)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anas_core::OutputSchema;

    fn grader() -> OpenAiGrader {
        OpenAiGrader::new("https://llm.local/v1/", "k", "gpt-4", Duration::from_secs(5))
    }

    #[test]
    fn test_endpoint_trims_slash() {
        assert_eq!(grader().endpoint(), "https://llm.local/v1/chat/completions");
    }

    #[test]
    fn test_request_body_shape() {
        let schema = OutputSchema::evaluation();
        let prompts = vec!["user text".to_string()];
        let request = GradeRequest {
            system_prompt: "sys",
            user_prompts: &prompts,
            image_urls: &[],
            schema: &schema,
            temperature: 0.0,
            max_tokens: None,
        };
        let body = grader().request_body(&request);
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user text");
        assert_eq!(body["temperature"], 0.0);
        assert!(body.get("max_tokens").is_none());
        let format = &body["response_format"]["json_schema"];
        assert_eq!(format["name"], "benchmark_evaluation");
        assert_eq!(format["strict"], true);
        assert_eq!(format["schema"]["additionalProperties"], false);
    }

    #[test]
    fn test_request_body_with_images_and_cap() {
        let schema = OutputSchema::evaluation();
        let prompts = vec!["look".to_string()];
        let images = vec!["https://img/1.png".to_string()];
        let request = GradeRequest {
            system_prompt: "sys",
            user_prompts: &prompts,
            image_urls: &images,
            schema: &schema,
            temperature: 0.2,
            max_tokens: Some(256),
        };
        let body = grader().request_body(&request);
        assert_eq!(body["max_tokens"], 256);
        let parts = &body["messages"][1]["content"];
        assert_eq!(parts[0]["text"], "look");
        assert_eq!(parts[1]["image_url"]["url"], "https://img/1.png");
    }

    #[test]
    fn test_completion_text() {
        let resp = json!({"choices": [{"message": {"content": "{\"a\":1}"}}]});
        assert_eq!(completion_text(&resp).unwrap(), "{\"a\":1}");
        assert!(completion_text(&json!({"choices": []})).is_err());
    }
}
