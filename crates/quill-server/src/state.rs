use std::sync::Arc;

use quill_core::{
    auth::Authenticator,
    journal::{NoteStore, SummaryStore},
    observability::ErrorReporter,
    ratelimit::RateLimitStore,
    summary::Summarizer,
};

use crate::{field::FieldCodec, middleware::TrustedProxies};

/// Shared handles passed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub fields: FieldCodec,
    pub notes: Arc<dyn NoteStore>,
    pub summaries: Arc<dyn SummaryStore>,
    pub summarizer: Arc<dyn Summarizer>,
    pub authenticator: Arc<dyn Authenticator>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    /// Peers whose forwarding headers identify the client for IP quotas.
    pub trusted_proxies: TrustedProxies,
    pub reporter: Arc<dyn ErrorReporter>,
}

#[cfg(test)]
pub mod testing {
    use quill_core::{
        auth::{StaticTokenAuthenticator, UserId},
        journal::InMemoryJournalStore,
        observability::RecordingReporter,
        ratelimit::InMemoryRateLimitStore,
        summary::KeywordSummarizer,
    };
    use quill_crypto::{FieldCipher, FieldKey};

    use super::*;

    pub const ALICE: &str = "token-alice";
    pub const BOB: &str = "token-bob";

    /// Fully in-memory state plus handles to inspect what it stored.
    pub struct Harness {
        pub state: AppState,
        pub journal: InMemoryJournalStore,
        pub reporter: RecordingReporter,
    }

    pub fn harness() -> Harness {
        harness_with(Arc::new(KeywordSummarizer))
    }

    pub fn harness_with(summarizer: Arc<dyn Summarizer>) -> Harness {
        let journal = InMemoryJournalStore::new();
        let reporter = RecordingReporter::new();
        let reporter_handle: Arc<dyn ErrorReporter> = Arc::new(reporter.clone());
        let authenticator = StaticTokenAuthenticator::new()
            .with_token(ALICE, UserId::new("alice"))
            .with_token(BOB, UserId::new("bob"));

        let state = AppState {
            fields: FieldCodec::new(FieldCipher::new(FieldKey::generate()), reporter_handle.clone()),
            notes: Arc::new(journal.clone()),
            summaries: Arc::new(journal.clone()),
            summarizer,
            authenticator: Arc::new(authenticator),
            rate_limits: Arc::new(InMemoryRateLimitStore::new()),
            trusted_proxies: TrustedProxies::default(),
            reporter: reporter_handle,
        };
        Harness {
            state,
            journal,
            reporter,
        }
    }
}
