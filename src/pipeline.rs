//! Shared reminder workflow for the HTTP handler and the CLI
//!
//! 1. Locate the record by VIN or customer id
//! 2. Derive due sensors and offer eligibility
//! 3. Compose the reminder through the generation backend
//! 4. Persist the message through the configured sink
//!
//! Nothing is persisted unless generation succeeded.
use crate::composer::MessageComposer;
use crate::config::Config;
use crate::dataset::Dataset;
use crate::errors::AppError;
use crate::llm_client::{OpenAiClient, TextGenerator};
use crate::locator;
use crate::models::{DuplicateKeyWarning, GeneratedMessage, StyleOptions};
use crate::persistence::{sink_for, DatasetSource, MessageSink, PersistOutcome, PersistTarget};
use crate::resilience::{create_generation_circuit_breaker, GuardedGenerator};
use crate::signals::{self, DerivedSignals, SignalPolicy};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Result of one successful reminder run.
#[derive(Debug, Clone)]
pub struct ReminderOutcome {
    pub message: GeneratedMessage,
    pub row_index: usize,
    pub row_data: Map<String, Value>,
    pub signals: DerivedSignals,
    pub duplicate_warning: Option<DuplicateKeyWarning>,
    pub persisted: PersistOutcome,
}

pub struct ReminderPipeline {
    composer: MessageComposer,
    sink: Arc<dyn MessageSink>,
    policy: SignalPolicy,
}

impl ReminderPipeline {
    pub fn new(composer: MessageComposer, sink: Arc<dyn MessageSink>, policy: SignalPolicy) -> Self {
        Self {
            composer,
            sink,
            policy,
        }
    }

    /// Wires the OpenAI client, circuit breaker, composer and configured sink.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let sink = sink_for(
            config.persistence_mode,
            &config.mail_folder,
            &config.spreadsheet_output_dir,
        );
        Self::from_config_with_sink(config, sink)
    }

    /// Like [`ReminderPipeline::from_config`] with an explicit sink.
    pub fn from_config_with_sink(
        config: &Config,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, AppError> {
        let client = OpenAiClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
            config.generation_timeout,
        )?;
        let generator: Arc<dyn TextGenerator> = Arc::new(GuardedGenerator::new(
            Arc::new(client),
            create_generation_circuit_breaker(),
        ));

        let composer = MessageComposer::new(generator, config.generation_options())
            .with_retry_policy(config.retry_policy())
            .with_language(config.prompt_language)
            .with_offers(config.offer_texts())
            .with_brand(&config.assistant_brand);

        Ok(Self::new(composer, sink, config.signal_policy()))
    }

    pub fn composer(&self) -> &MessageComposer {
        &self.composer
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Runs locate, derive, compose and persist for `key`.
    ///
    /// Lookup failures return before any external call. Generation failures
    /// return before anything is written. A persistence failure fails the
    /// whole run; the generated text is logged so it is not lost.
    pub async fn run(
        &self,
        dataset: &Dataset,
        source: &DatasetSource,
        key: &str,
        style: StyleOptions,
    ) -> Result<ReminderOutcome, AppError> {
        let found = locator::find(dataset, key)?;
        tracing::info!("Matched key '{}' to row {}", key, found.row_index);

        let signals = signals::derive(&found.record, &self.policy);
        tracing::debug!(
            "Signals for row {}: due=[{}], loyalty_offer={}, insurance_offer={}",
            found.row_index,
            signals.service_due_text(),
            signals.loyalty_offer,
            signals.insurance_offer
        );

        let message = self.composer.compose(&found.record, &signals, style).await?;

        let target = PersistTarget {
            dataset,
            row_index: found.row_index,
            record: &found.record,
            source,
        };
        let persisted = match self.sink.persist(&target, &message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    "Failed to persist message for key '{}' via {} sink: {}. Message was:\n{}",
                    key,
                    self.sink.name(),
                    e,
                    message.text
                );
                return Err(e);
            }
        };

        Ok(ReminderOutcome {
            message,
            row_index: found.row_index,
            row_data: dataset.projection(found.row_index),
            signals,
            duplicate_warning: found.duplicate_warning,
            persisted,
        })
    }
}
