use crate::composer::{
    OfferTexts, PromptLanguage, DEFAULT_ASSISTANT_BRAND, DEFAULT_INSURANCE_PRODUCT,
    DEFAULT_LOYALTY_DISCOUNT,
};
use crate::llm_client::GenerationOptions;
use crate::persistence::PersistenceMode;
use crate::resilience::RetryPolicy;
use crate::signals::{SignalPolicy, INSURANCE_OFFER_THRESHOLD, LOYALTY_DISCOUNT_THRESHOLD};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub generation_timeout: Duration,
    pub generation_max_attempts: u32,
    pub generation_backoff: Duration,
    pub generation_max_backoff: Duration,
    pub persistence_mode: PersistenceMode,
    pub mail_folder: PathBuf,
    pub spreadsheet_output_dir: PathBuf,
    pub prompt_language: PromptLanguage,
    pub assistant_brand: String,
    pub loyalty_discount_text: String,
    pub insurance_offer_text: String,
    pub loyalty_score_threshold: f64,
    pub profit_score_threshold: f64,
    pub max_upload_bytes: usize,
}

/// Reads an optional variable, parsing it when present and non-blank.
fn env_parse<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        _ => Ok(default),
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("OPENAI_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            openai_base_url: {
                let url = env_string("OPENAI_BASE_URL", "https://api.openai.com/v1");
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    anyhow::bail!("OPENAI_BASE_URL must start with http:// or https://");
                }
                url
            },
            openai_model: env_string("OPENAI_MODEL", "gpt-4o-mini"),
            max_tokens: env_parse("OPENAI_MAX_TOKENS", 500)?,
            temperature: env_parse("OPENAI_TEMPERATURE", 0.5)?,
            generation_timeout: Duration::from_secs(env_parse("GENERATION_TIMEOUT_SECS", 30)?),
            generation_max_attempts: env_parse("GENERATION_MAX_ATTEMPTS", 1)?,
            generation_backoff: Duration::from_millis(env_parse("GENERATION_BACKOFF_MS", 500)?),
            generation_max_backoff: Duration::from_millis(env_parse(
                "GENERATION_MAX_BACKOFF_MS",
                5000,
            )?),
            persistence_mode: {
                let raw = env_string("PERSISTENCE_MODE", "file");
                PersistenceMode::parse(&raw).ok_or_else(|| {
                    anyhow::anyhow!("PERSISTENCE_MODE must be 'file' or 'spreadsheet', got '{}'", raw)
                })?
            },
            mail_folder: PathBuf::from(env_string("MAIL_FOLDER", "mails")),
            spreadsheet_output_dir: PathBuf::from(env_string("SPREADSHEET_OUTPUT_DIR", "datasets")),
            prompt_language: {
                let raw = env_string("PROMPT_LANGUAGE", "de");
                PromptLanguage::parse(&raw).ok_or_else(|| {
                    anyhow::anyhow!("PROMPT_LANGUAGE must be 'de' or 'en', got '{}'", raw)
                })?
            },
            assistant_brand: env_string("ASSISTANT_BRAND", DEFAULT_ASSISTANT_BRAND),
            loyalty_discount_text: env_string("LOYALTY_DISCOUNT_TEXT", DEFAULT_LOYALTY_DISCOUNT),
            insurance_offer_text: env_string("INSURANCE_OFFER_TEXT", DEFAULT_INSURANCE_PRODUCT),
            loyalty_score_threshold: env_parse(
                "LOYALTY_SCORE_THRESHOLD",
                LOYALTY_DISCOUNT_THRESHOLD,
            )?,
            profit_score_threshold: env_parse("PROFIT_SCORE_THRESHOLD", INSURANCE_OFFER_THRESHOLD)?,
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
        };

        if !(0.0..=2.0).contains(&config.temperature) {
            anyhow::bail!("OPENAI_TEMPERATURE must be between 0 and 2");
        }
        if config.generation_max_attempts == 0 {
            anyhow::bail!("GENERATION_MAX_ATTEMPTS must be at least 1");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Completion API: {} ({})", config.openai_base_url, config.openai_model);
        tracing::debug!("Persistence mode: {:?}", config.persistence_mode);
        tracing::debug!("Prompt language: {:?}", config.prompt_language);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.openai_model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.generation_max_attempts,
            self.generation_backoff,
            self.generation_max_backoff,
        )
    }

    pub fn signal_policy(&self) -> SignalPolicy {
        SignalPolicy {
            loyalty_threshold: self.loyalty_score_threshold,
            profit_threshold: self.profit_score_threshold,
            ..SignalPolicy::default()
        }
    }

    pub fn offer_texts(&self) -> OfferTexts {
        OfferTexts {
            loyalty_discount: self.loyalty_discount_text.clone(),
            insurance: self.insurance_offer_text.clone(),
        }
    }
}
