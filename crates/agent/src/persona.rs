//! The persona: who is speaking, and how it is addressed.

use cadence_config::PersonaConfig;
use cadence_core::error::Error;
use cadence_core::thread::ChatScope;

#[derive(Debug, Clone)]
pub struct Persona {
    name: String,
    wake_words: Vec<String>,
    base_prompt: String,
}

fn default_prompt(name: &str) -> String {
    format!(
        "You are {name}. You speak in your own voice: attentive, warm and curious. \
         Keep replies short unless the conversation asks for depth, and answer in \
         the language you are addressed in."
    )
}

impl Persona {
    pub fn new(name: impl Into<String>, wake_words: &[String], base_prompt: Option<String>) -> Self {
        let name = name.into();
        Self {
            base_prompt: base_prompt.unwrap_or_else(|| default_prompt(&name)),
            wake_words: wake_words.iter().map(|w| w.to_lowercase()).collect(),
            name,
        }
    }

    /// Build from config. `prompt_file` wins over an inline `system_prompt`.
    pub async fn from_config(config: &PersonaConfig) -> Result<Self, Error> {
        let prompt = match &config.prompt_file {
            Some(path) => Some(tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::Config {
                    message: format!("persona prompt {}: {e}", path.display()),
                }
            })?),
            None => config.system_prompt.clone(),
        };
        Ok(Self::new(&config.name, &config.wake_words, prompt))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if `text` mentions a wake word (case-insensitive).
    pub fn is_addressed(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.wake_words.iter().any(|w| lowered.contains(w.as_str()))
    }

    /// The full system prompt for one exchange.
    pub fn system_prompt(&self, scope: &ChatScope, actor_name: &str, privileged: bool) -> String {
        let mut prompt = self.base_prompt.trim_end().to_string();
        prompt.push_str("\n\n");
        if scope.is_group() {
            prompt.push_str(&format!(
                "You are in a group chat. You are replying to {actor_name}; address them by name."
            ));
        } else {
            prompt.push_str(&format!("You are in a private conversation with {actor_name}."));
        }
        if privileged {
            prompt.push_str(&format!(" {actor_name} is a close, trusted companion."));
        }
        prompt
    }
}
