//! System instruction assembly
//!
//! The instruction sent with every generation request is the persona/rules
//! document, followed by the feature/price dataset and the localization
//! block.

pub mod persona_prompt;

use serde_json::{json, Value};

use crate::config::{LocalizationConfig, PromptConfig};
use crate::error::{EstimateError, Result};

/// Dataset used when no dataset file is configured. Prices are in USD.
fn default_dataset() -> Value {
    json!([
        {"category": "Design", "feature": "UI/UX design", "unitPrice": 300, "unit": "page", "weeks": 0.5},
        {"category": "Frontend", "feature": "Responsive web page", "unitPrice": 250, "unit": "page", "weeks": 0.5},
        {"category": "Frontend", "feature": "Mobile app screen", "unitPrice": 400, "unit": "screen", "weeks": 0.5},
        {"category": "Backend", "feature": "User accounts and login", "unitPrice": 1200, "unit": "feature", "weeks": 1.5},
        {"category": "Backend", "feature": "Payments integration", "unitPrice": 1500, "unit": "feature", "weeks": 2},
        {"category": "Backend", "feature": "Admin dashboard", "unitPrice": 2000, "unit": "feature", "weeks": 3},
        {"category": "Infrastructure", "feature": "Deployment and hosting setup", "unitPrice": 800, "unit": "project", "weeks": 1}
    ])
}

/// Builds the system instruction for generation requests
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    persona: String,
    dataset: Value,
    localization: LocalizationConfig,
}

impl PromptBuilder {
    /// Create a builder from explicit parts
    pub fn new(
        persona: impl Into<String>,
        dataset: Value,
        localization: LocalizationConfig,
    ) -> Self {
        Self {
            persona: persona.into(),
            dataset,
            localization,
        }
    }

    /// Create a builder from configuration, reading the persona and
    /// dataset files when they are configured
    ///
    /// # Errors
    ///
    /// Returns `EstimateError::Config` if a configured file cannot be read,
    /// or the dataset is not JSON
    pub fn from_config(prompt: &PromptConfig, localization: &LocalizationConfig) -> Result<Self> {
        let persona = match &prompt.persona_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                EstimateError::Config(format!(
                    "Failed to read persona document {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => persona_prompt::generate_persona_prompt(),
        };

        let dataset = match &prompt.dataset_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    EstimateError::Config(format!(
                        "Failed to read feature dataset {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    EstimateError::Config(format!(
                        "Feature dataset {} is not JSON: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            None => default_dataset(),
        };

        Ok(Self::new(persona, dataset, localization.clone()))
    }

    /// Localization block as the model sees it
    pub fn localization_block(&self) -> Value {
        json!({
            "primary_language_code": self.localization.primary_language_code,
            "primary_currency_code": self.localization.primary_currency_code,
            "user_country_name": self.localization.user_country_name,
            "exchange_rates": self.localization.exchange_rates,
        })
    }

    /// Assemble the full system instruction
    ///
    /// # Examples
    ///
    /// ```
    /// use estimate_chat::config::{LocalizationConfig, PromptConfig};
    /// use estimate_chat::prompts::PromptBuilder;
    ///
    /// let builder =
    ///     PromptBuilder::from_config(&PromptConfig::default(), &LocalizationConfig::default())
    ///         .unwrap();
    /// let instruction = builder.system_instruction();
    /// assert!(instruction.contains("FEATURE DATASET"));
    /// assert!(instruction.contains("\"primary_currency_code\":\"USD\""));
    /// ```
    pub fn system_instruction(&self) -> String {
        format!(
            "{}\n\nFEATURE DATASET:\n{}\n\nLOCALIZATION:\n{}\n",
            self.persona.trim_end(),
            self.dataset,
            self.localization_block()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_system_instruction_sections_in_order() {
        let builder = PromptBuilder::new(
            "PERSONA",
            json!([{"feature": "x"}]),
            LocalizationConfig::default(),
        );
        let instruction = builder.system_instruction();
        let persona = instruction.find("PERSONA").unwrap();
        let dataset = instruction.find("FEATURE DATASET").unwrap();
        let localization = instruction.find("LOCALIZATION:").unwrap();
        assert!(persona < dataset && dataset < localization);
        assert!(instruction.contains(r#"[{"feature":"x"}]"#));
    }

    #[test]
    fn test_localization_block_fields() {
        let localization = LocalizationConfig {
            primary_language_code: "ko".into(),
            primary_currency_code: "KRW".into(),
            user_country_name: "South Korea".into(),
            exchange_rates: HashMap::from([("KRW".to_string(), 1380.0)]),
        };
        let builder = PromptBuilder::new("p", json!([]), localization);
        let block = builder.localization_block();
        assert_eq!(block["primary_language_code"], "ko");
        assert_eq!(block["exchange_rates"]["KRW"], 1380.0);
    }

    #[test]
    fn test_from_config_reads_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let persona = dir.path().join("persona.md");
        let dataset = dir.path().join("dataset.json");
        std::fs::write(&persona, "Custom persona").unwrap();
        std::fs::write(&dataset, r#"[{"feature": "Chat widget", "unitPrice": 90}]"#).unwrap();

        let config = PromptConfig {
            persona_path: Some(persona),
            dataset_path: Some(dataset),
        };
        let builder = PromptBuilder::from_config(&config, &LocalizationConfig::default()).unwrap();
        let instruction = builder.system_instruction();
        assert!(instruction.starts_with("Custom persona"));
        assert!(instruction.contains("Chat widget"));
    }

    #[test]
    fn test_from_config_rejects_bad_dataset() {
        let dir = tempfile::TempDir::new().unwrap();
        let dataset = dir.path().join("dataset.json");
        std::fs::write(&dataset, "not json").unwrap();
        let config = PromptConfig {
            persona_path: None,
            dataset_path: Some(dataset),
        };
        assert!(PromptBuilder::from_config(&config, &LocalizationConfig::default()).is_err());
    }
}
