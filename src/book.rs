use chrono::{DateTime, Utc};
use hourglass_rs::{SafeTimeProvider, TimeSource};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::LoanBookConfig;
use crate::errors::Result;
use crate::events::{dispatch, AuditAction, AuditEvent, AuditSink, NullSink};
use crate::loan_types::LoanTypeService;
use crate::loans::LoanService;
use crate::repayments::RepaymentService;
use crate::store::{MemoryStore, Store};
use crate::types::Actor;

/// entry point to the loan book: a store, an audit sink, a clock and config
pub struct LoanBook {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditSink>,
    time: SafeTimeProvider,
    config: LoanBookConfig,
}

impl LoanBook {
    pub fn builder() -> LoanBookBuilder {
        LoanBookBuilder::new()
    }

    /// loan origination and servicing
    pub fn loans(&self) -> LoanService<'_> {
        LoanService::new(self)
    }

    /// repayment capture and reversal
    pub fn repayments(&self) -> RepaymentService<'_> {
        RepaymentService::new(self)
    }

    /// loan product administration
    pub fn loan_types(&self) -> LoanTypeService<'_> {
        LoanTypeService::new(self)
    }

    pub fn config(&self) -> &LoanBookConfig {
        &self.config
    }

    pub fn time(&self) -> &SafeTimeProvider {
        &self.time
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// publish an audit record for a committed change
    pub(crate) fn audit<B: Serialize, A: Serialize>(
        &self,
        action: AuditAction,
        entity_id: Uuid,
        actor: &Actor,
        before: Option<&B>,
        after: Option<&A>,
    ) {
        let event = AuditEvent::new(action, entity_id, actor.user_id, before, after, self.now());
        dispatch(self.audit.as_ref(), event);
    }
}

/// builder for a loan book
pub struct LoanBookBuilder {
    store: Option<Arc<dyn Store>>,
    audit: Option<Arc<dyn AuditSink>>,
    time_provider: Option<SafeTimeProvider>,
    config: Option<LoanBookConfig>,
}

impl LoanBookBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            audit: None,
            time_provider: None,
            config: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn set_time(mut self, time: &SafeTimeProvider) -> Self {
        self.time_provider = Some(time.clone());
        self
    }

    pub fn config(mut self, config: LoanBookConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// build; unset parts fall back to an empty memory store, no auditing,
    /// system time and default config
    pub fn build(self) -> Result<LoanBook> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(LoanBook {
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            audit: self.audit.unwrap_or_else(|| Arc::new(NullSink)),
            time: self
                .time_provider
                .unwrap_or_else(|| SafeTimeProvider::new(TimeSource::System)),
            config,
        })
    }
}

impl Default for LoanBookBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LoanError;
    use chrono::TimeZone;

    #[test]
    fn test_build_with_test_time() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(start));

        let book = LoanBook::builder().set_time(&time).build().unwrap();
        assert_eq!(book.now(), start);

        time.test_control().unwrap().advance(chrono::Duration::hours(3));
        assert_eq!(book.now(), start + chrono::Duration::hours(3));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LoanBookConfig {
            loan_number_width: 0,
            ..LoanBookConfig::default()
        };
        let err = LoanBook::builder().config(config).build().err().unwrap();
        assert!(matches!(err, LoanError::InvalidConfiguration { .. }));
    }
}
