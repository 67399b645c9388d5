//! A stand-in text generator that cycles through canned lines.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use colloquy::prelude::*;

const LINES: &[&str] = &[
    "Let me start with the strongest version of my position.",
    "I see the appeal, but that argument skips a step.",
    "Here is a concrete example that cuts the other way.",
    "Fair point. Let me narrow what I am claiming.",
    "We agree on the goal; we disagree on the cost.",
];

#[derive(Debug, Default)]
pub(crate) struct ScriptedGenerator {
    next: AtomicUsize,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let line = LINES[n % LINES.len()];
        let input_tokens = request
            .history
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum::<u64>()
            + request.system_instructions.split_whitespace().count() as u64;

        Ok(Generation {
            text: format!("[{}] {line}", request.speaker),
            usage: TokenUsage {
                input_tokens,
                output_tokens: line.split_whitespace().count() as u64,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(speaker: &str) -> GenerationRequest {
        GenerationRequest {
            pin: SessionPin::new("AB12-CD34"),
            speaker: speaker.into(),
            provider: "script".into(),
            model_id: "canned".into(),
            system_instructions: "Be brief.".into(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_generate_cycles_through_lines() {
        let generator = ScriptedGenerator::default();
        let first = generator.generate(request("model-a")).await.unwrap();
        let second = generator.generate(request("model-b")).await.unwrap();

        assert!(first.text.starts_with("[model-a] "));
        assert!(second.text.ends_with(LINES[1]));
        assert_eq!(first.usage.input_tokens, 2);
    }
}
