//! Prompt construction and message generation.
//!
//! The prompt is a pure function of record, signals and style. Only
//! [`MessageComposer::compose`] talks to the generation backend.

use crate::errors::{AppError, GenerationFailureKind};
use crate::llm_client::{GenerationOptions, TextGenerator};
use crate::models::{CustomerVehicleRecord, Formality, GeneratedMessage, MessageLength, StyleOptions};
use crate::resilience::RetryPolicy;
use crate::signals::DerivedSignals;
use std::sync::Arc;

pub const DEFAULT_LOYALTY_DISCOUNT: &str = "20% off";
pub const DEFAULT_INSURANCE_PRODUCT: &str = "Repair Cost Insurance";
pub const DEFAULT_ASSISTANT_BRAND: &str = "BMW";

/// Language the prompt is written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptLanguage {
    #[default]
    German,
    English,
}

impl PromptLanguage {
    /// Parses `de`/`german` or `en`/`english`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "de" | "german" | "deutsch" => Some(PromptLanguage::German),
            "en" | "english" => Some(PromptLanguage::English),
            _ => None,
        }
    }

    fn formality_word(self, formality: Formality) -> &'static str {
        match (self, formality) {
            (PromptLanguage::German, Formality::Formal) => "formelle",
            (PromptLanguage::German, Formality::Normal) => "normale",
            (PromptLanguage::German, Formality::Informal) => "informelle",
            (PromptLanguage::English, Formality::Formal) => "formal",
            (PromptLanguage::English, Formality::Normal) => "neutral",
            (PromptLanguage::English, Formality::Informal) => "casual",
        }
    }

    fn length_word(self, length: MessageLength) -> &'static str {
        match (self, length) {
            (PromptLanguage::German, MessageLength::Short) => "kurze",
            (PromptLanguage::German, MessageLength::Medium) => "mittellange",
            (PromptLanguage::German, MessageLength::Long) => "lange",
            (PromptLanguage::English, MessageLength::Short) => "short",
            (PromptLanguage::English, MessageLength::Medium) => "medium-length",
            (PromptLanguage::English, MessageLength::Long) => "long",
        }
    }

    fn intro(self, style: StyleOptions) -> String {
        let formality = self.formality_word(style.formality);
        let length = self.length_word(style.length);
        match self {
            PromptLanguage::German => format!(
                "Schreibe eine {} und {} Service-Erinnerungs-Mail für einen Kunden eines Autohauses. \
                 Schreibe sie im Fließtext und nicht in Aufzählungspunkten. \
                 Verwende die folgenden Informationen:",
                formality, length
            ),
            PromptLanguage::English => format!(
                "Write a {} and {} service reminder email for a customer of a car dealership. \
                 Write it as flowing prose, not as bullet points. \
                 Use the following information:",
                formality, length
            ),
        }
    }

    fn labels(self) -> &'static PromptLabels {
        match self {
            PromptLanguage::German => &GERMAN_LABELS,
            PromptLanguage::English => &ENGLISH_LABELS,
        }
    }
}

struct PromptLabels {
    customer_name: &'static str,
    city: &'static str,
    brand: &'static str,
    model: &'static str,
    dealer_assignment: &'static str,
    service_notice: &'static str,
    discount: &'static str,
    insurance: &'static str,
}

const GERMAN_LABELS: PromptLabels = PromptLabels {
    customer_name: "Kundenname",
    city: "Stadt",
    brand: "Marke",
    model: "Modell",
    dealer_assignment: "Händlerzuweisung",
    service_notice: "Servicehinweis",
    discount: "Folgender Rabatt kann dem Kunden angeboten werden",
    insurance: "Folgende Versicherung kann dem Kunden angeboten werden",
};

const ENGLISH_LABELS: PromptLabels = PromptLabels {
    customer_name: "Customer name",
    city: "City",
    brand: "Brand",
    model: "Model",
    dealer_assignment: "Dealer assignment",
    service_notice: "Service notice",
    discount: "The following discount can be offered to the customer",
    insurance: "The following insurance can be offered to the customer",
};

/// Offer wording inserted when a record qualifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferTexts {
    pub loyalty_discount: String,
    pub insurance: String,
}

impl Default for OfferTexts {
    fn default() -> Self {
        Self {
            loyalty_discount: DEFAULT_LOYALTY_DISCOUNT.to_string(),
            insurance: DEFAULT_INSURANCE_PRODUCT.to_string(),
        }
    }
}

/// System instruction giving the model a formal brand-service persona.
pub fn system_instruction(brand: &str) -> String {
    format!(
        "You are a helpful {} Service assistant that always answers in {} formal corporate language.",
        brand, brand
    )
}

/// Builds the user prompt for one reminder.
///
/// Offer lines are appended only when the matching signal is set. Missing
/// record fields render as empty text.
pub fn build_prompt(
    record: &CustomerVehicleRecord,
    signals: &DerivedSignals,
    style: StyleOptions,
    language: PromptLanguage,
    offers: &OfferTexts,
) -> String {
    let labels = language.labels();
    let field = |value: &Option<String>| value.as_deref().unwrap_or_default().to_string();

    let mut lines = vec![
        language.intro(style),
        format!("- {}: {}", labels.customer_name, record.full_name()),
        format!("- {}: {}", labels.city, field(&record.city)),
        format!("- {}: {}", labels.brand, field(&record.brand)),
        format!("- {}: {}", labels.model, field(&record.model)),
        format!(
            "- {}: {}",
            labels.dealer_assignment,
            field(&record.dealer_assignment)
        ),
        format!("- {}: {}", labels.service_notice, signals.service_due_text()),
    ];

    if signals.loyalty_offer {
        lines.push(format!("- {}: {}", labels.discount, offers.loyalty_discount));
    }
    if signals.insurance_offer {
        lines.push(format!("- {}: {}", labels.insurance, offers.insurance));
    }

    lines.join("\n")
}

/// Turns a record into a reminder message through a [`TextGenerator`].
pub struct MessageComposer {
    generator: Arc<dyn TextGenerator>,
    options: GenerationOptions,
    retry: RetryPolicy,
    language: PromptLanguage,
    offers: OfferTexts,
    system_instruction: String,
}

impl MessageComposer {
    pub fn new(generator: Arc<dyn TextGenerator>, options: GenerationOptions) -> Self {
        Self {
            generator,
            options,
            retry: RetryPolicy::none(),
            language: PromptLanguage::default(),
            offers: OfferTexts::default(),
            system_instruction: system_instruction(DEFAULT_ASSISTANT_BRAND),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_language(mut self, language: PromptLanguage) -> Self {
        self.language = language;
        self
    }

    pub fn with_offers(mut self, offers: OfferTexts) -> Self {
        self.offers = offers;
        self
    }

    pub fn with_brand(mut self, brand: &str) -> Self {
        self.system_instruction = system_instruction(brand);
        self
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn prompt(
        &self,
        record: &CustomerVehicleRecord,
        signals: &DerivedSignals,
        style: StyleOptions,
    ) -> String {
        build_prompt(record, signals, style, self.language, &self.offers)
    }

    /// Builds the prompt, asks the backend for a completion and returns the
    /// trimmed text.
    pub async fn compose(
        &self,
        record: &CustomerVehicleRecord,
        signals: &DerivedSignals,
        style: StyleOptions,
    ) -> Result<GeneratedMessage, AppError> {
        let prompt = self.prompt(record, signals, style);
        tracing::debug!("Generation prompt:\n{}", prompt);

        let prompt_ref = prompt.as_str();
        let system = self.system_instruction.as_str();
        let options = &self.options;
        let generator = &self.generator;

        let raw = self
            .retry
            .run(move || generator.generate(prompt_ref, system, options))
            .await?;

        let text = raw.trim();
        if text.is_empty() {
            return Err(AppError::generation(
                GenerationFailureKind::MalformedResponse,
                "Completion was empty",
            ));
        }

        Ok(GeneratedMessage::new(text))
    }
}
