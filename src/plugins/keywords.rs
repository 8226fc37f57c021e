// ABOUTME: Canned replies triggered by words in ordinary messages
// ABOUTME: Rules come from [[plugins.keywords.rules]]; matching ignores case, punctuation and stretched letters

use anyhow::Result;
use async_trait::async_trait;
use noko_core::{OutgoingEvent, Plugin, PluginContext};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

const PLUGIN: &str = "keywords";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeywordSettings {
    pub rules: Vec<KeywordRule>,
    /// Named prompt applied to the chosen response
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordRule {
    /// Substrings to look for; `user:<nick>` matches the sender instead
    pub triggers: Vec<String>,
    pub responses: Vec<String>,
    #[serde(default = "default_chance")]
    pub chance: f64,
    /// Trigger must equal the whole message rather than appear in it
    #[serde(default)]
    pub strict: bool,
}

fn default_chance() -> f64 {
    1.0
}

impl KeywordRule {
    fn matches(&self, normalized: &str, actor: &str) -> bool {
        self.triggers.iter().any(|trigger| {
            if let Some(nick) = trigger.strip_prefix("user:") {
                return nick.eq_ignore_ascii_case(actor);
            }
            let trigger = normalize(trigger);
            if trigger.is_empty() {
                false
            } else if self.strict {
                normalized == trigger
            } else {
                normalized.contains(&trigger)
            }
        })
    }
}

/// Lowercase, drop punctuation, and squeeze runs of the same character
/// so "Hiiii!!" and "hi" compare equal.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = None;
    for c in text.to_lowercase().chars() {
        if !(c.is_alphanumeric() || c == '_' || c.is_whitespace()) {
            continue;
        }
        if last == Some(c) {
            continue;
        }
        last = Some(c);
        out.push(c);
    }
    out.trim().to_string()
}

/// Pick a response for `text`, rolling each matching rule's chance
pub fn choose_response<R: Rng>(
    rules: &[KeywordRule],
    text: &str,
    actor: &str,
    rng: &mut R,
) -> Option<String> {
    let normalized = normalize(text);
    let mut candidates: Vec<&String> = Vec::new();
    for rule in rules.iter().filter(|rule| rule.matches(&normalized, actor)) {
        if rng.gen::<f64>() < rule.chance {
            candidates.extend(rule.responses.choose(rng));
        }
    }
    candidates.choose(rng).map(|s| s.replace("\\n", "\n"))
}

pub struct KeywordsPlugin;

#[async_trait]
impl Plugin for KeywordsPlugin {
    fn name(&self) -> &str {
        PLUGIN
    }

    async fn on_message(&self, ctx: &PluginContext<'_>, text: &str) -> Result<Vec<OutgoingEvent>> {
        let settings: KeywordSettings = ctx.settings(PLUGIN)?;
        if settings.rules.is_empty() {
            return Ok(Vec::new());
        }

        let chosen = {
            let mut rng = rand::thread_rng();
            choose_response(&settings.rules, text, ctx.actor_id, &mut rng)
        };
        let Some(mut response) = chosen else {
            return Ok(Vec::new());
        };

        if let Some(prompt) = settings.filter.as_deref().filter(|_| ctx.policy.llm_enabled) {
            match ctx
                .llm
                .run_prompt(prompt, &[("text", &response)], ctx.policy.completion_params())
                .await
            {
                Ok(rewritten) => response = rewritten,
                Err(e) => tracing::warn!(prompt = %prompt, error = %e, "Keyword filter failed, sending original"),
            }
        }

        tracing::debug!(room_id = %ctx.room_id, actor = %ctx.actor_id, "Keyword rule matched");
        Ok(vec![ctx.say(response)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rule(triggers: &[&str], response: &str) -> KeywordRule {
        KeywordRule {
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            responses: vec![response.to_string()],
            chance: 1.0,
            strict: false,
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Hiiii!!  there"), "hi there");
        assert_eq!(normalize("  Good, MORNING. "), "god morning");
    }

    #[test]
    fn test_substring_rule_matches_stretched_words() {
        let rules = vec![rule(&["coffee"], "☕")];
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            choose_response(&rules, "I need COFFEEEE!", "bob", &mut rng).as_deref(),
            Some("☕")
        );
        assert!(choose_response(&rules, "tea please", "bob", &mut rng).is_none());
    }

    #[test]
    fn test_strict_rule_needs_whole_message() {
        let mut strict = rule(&["ping"], "pong");
        strict.strict = true;
        let rules = vec![strict];
        let mut rng = StdRng::seed_from_u64(7);
        assert!(choose_response(&rules, "Ping!", "bob", &mut rng).is_some());
        assert!(choose_response(&rules, "ping me later", "bob", &mut rng).is_none());
    }

    #[test]
    fn test_user_trigger_matches_sender() {
        let rules = vec![rule(&["user:carol"], "hi carol")];
        let mut rng = StdRng::seed_from_u64(7);
        assert!(choose_response(&rules, "anything", "Carol", &mut rng).is_some());
        assert!(choose_response(&rules, "anything", "bob", &mut rng).is_none());
    }

    #[test]
    fn test_zero_chance_never_fires() {
        let mut never = rule(&["coffee"], "☕");
        never.chance = 0.0;
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            assert!(choose_response(&[never.clone()], "coffee", "bob", &mut rng).is_none());
        }
    }

    #[test]
    fn test_escaped_newlines_in_responses() {
        let rules = vec![rule(&["poem"], "roses\\nviolets")];
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            choose_response(&rules, "poem please", "bob", &mut rng).as_deref(),
            Some("roses\nviolets")
        );
    }
}
