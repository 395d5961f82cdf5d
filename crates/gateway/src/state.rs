use std::collections::HashMap;
use std::sync::Arc;

use concord_config::ConfigStore;
use concord_council::CouncilEngine;
use concord_domain::secret::SecretCipher;
use concord_domain::{Result, Settings};
use concord_store::{ConversationStore, PackStore, TenantDb, VoteStore, VotingLog};
use concord_upstream::UpstreamClient;

/// Resolves user ids to display names for voting-history views.
///
/// User management belongs to the auth collaborator; the gateway only needs
/// this one read path, so it is a trait with a no-op default.
pub trait UserDirectory: Send + Sync {
    fn usernames(&self, org_id: &str) -> HashMap<String, String>;
}

/// Directory used when no auth collaborator is wired in: every session
/// renders as an unknown user.
pub struct EmptyUserDirectory;

impl UserDirectory for EmptyUserDirectory {
    fn usernames(&self, _org_id: &str) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Shared application state passed to all API handlers.
///
/// Fields group by concern: settings and secret handling, the upstream
/// client and council engine, tenant configuration, and the stores.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub cipher: Arc<SecretCipher>,

    pub upstream: Arc<UpstreamClient>,
    pub engine: Arc<CouncilEngine>,
    pub config: ConfigStore,

    pub conversations: Arc<ConversationStore>,
    pub voting_log: Arc<VotingLog>,
    pub votes: Arc<VoteStore>,
    pub packs: Arc<PackStore>,

    pub users: Arc<dyn UserDirectory>,
}

impl AppState {
    /// Assemble the full state from settings. The upstream semaphore and
    /// catalog cache are created once here and shared by every session.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let cipher = Arc::new(SecretCipher::from_settings(&settings)?);
        let upstream = Arc::new(UpstreamClient::new(&settings));
        let config = ConfigStore::new(&settings);
        let engine = Arc::new(CouncilEngine::new(upstream.clone(), config.clone()));

        let tenant_db = Arc::new(TenantDb::new(&settings));
        let conversations = Arc::new(ConversationStore::new(&settings));
        let voting_log = Arc::new(VotingLog::new(&settings));
        let votes = Arc::new(VoteStore::new(tenant_db.clone()));
        let packs = Arc::new(PackStore::new(tenant_db, config.clone()));

        Ok(Self {
            settings: Arc::new(settings),
            cipher,
            upstream,
            engine,
            config,
            conversations,
            voting_log,
            votes,
            packs,
            users: Arc::new(EmptyUserDirectory),
        })
    }

    /// Resolve the caller's tenant into an upstream-ready context.
    pub fn tenant_context(
        &self,
        org_id: &str,
    ) -> Result<concord_council::TenantContext> {
        let api = self
            .config
            .resolve_api(org_id, &self.cipher, &self.settings)?;
        Ok(concord_council::TenantContext {
            org_id: org_id.to_owned(),
            api_key: api.api_key,
            base_url: api.base_url,
        })
    }
}
