//! Builds the composition request and folds facts into a new digest.

use chatdigest_ai::{CompletionRequest, LlmClient, Message, RetryPolicy};
use std::sync::Arc;

use crate::analyzer::FactBlock;
use crate::error::{DigestError, Result};
use crate::preferences::PreferenceSet;

fn language_name(code: &str) -> &str {
    match code.to_ascii_lowercase().as_str() {
        "it" => "Italian",
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        _ => code,
    }
}

pub struct DigestComposer {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
}

impl DigestComposer {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    pub fn build_request(
        prior_digest: &str,
        facts: &FactBlock,
        preferences: &PreferenceSet,
    ) -> CompletionRequest {
        let length = preferences.digest_length;
        let mut system = vec![
            "You maintain the running digest of a group conversation.".to_string(),
            format!("Write the digest in {}.", language_name(&preferences.language)),
            format!(
                "Keep it {} (at most about {} tokens).",
                length.as_str(),
                length.max_tokens()
            ),
            "Each new message line starts with its timestamp: keep the digest in chronological order."
                .to_string(),
            "Attribute contributions to their authors by name.".to_string(),
            "Point out decisions, agreements and emotional turns.".to_string(),
        ];
        if preferences.has_filter() {
            system.push(format!(
                "Only cover content related to \"{}\" and leave out everything else.",
                preferences.filter_topic
            ));
        }
        system.push(
            "Fold the previous digest and the new messages into one updated digest and reply with the digest only."
                .to_string(),
        );

        let prior = if prior_digest.trim().is_empty() {
            "(none)"
        } else {
            prior_digest
        };
        let user = format!(
            "Previous digest:\n{}\n\nNew messages:\n{}",
            prior,
            facts.render()
        );

        CompletionRequest::new(vec![Message::system(system.join("\n")), Message::user(user)])
            .with_max_tokens(length.max_tokens())
            .with_temperature(0.3)
    }

    /// Compose the next digest. Errors leave the caller's digest untouched.
    pub async fn compose(
        &self,
        prior_digest: &str,
        facts: &FactBlock,
        preferences: &PreferenceSet,
    ) -> Result<String> {
        let request = Self::build_request(prior_digest, facts, preferences);
        let response = self
            .retry
            .run("digest composition", || {
                let request = request.clone();
                let llm = &self.llm;
                async move { llm.complete(request).await }
            })
            .await?;

        let digest = response.text();
        if digest.is_empty() {
            return Err(DigestError::EmptyDigest);
        }
        Ok(digest)
    }
}
