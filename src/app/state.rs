//! Application state shared across routes

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::household::Household;
use crate::store::{DataService, StaticAuth, SupabaseClient};
use crate::util::rate_limit::{create_limiter, Limiter};

/// Where sessions get their data service from
#[derive(Clone)]
pub enum Backend {
    /// One Supabase client per user, carrying that user's token
    Supabase(SupabaseClient),
    /// Every session shares one service (local runs, tests)
    Shared(Arc<dyn DataService>),
}

/// One authenticated user's household and the client bound to their token
pub struct Session {
    pub household: Household,
    client: Option<SupabaseClient>,
    last_seen: Mutex<Instant>,
}

impl Session {
    fn open(backend: &Backend, user_id: Uuid, access_token: &str) -> Self {
        let auth = Arc::new(StaticAuth(Some(user_id)));
        match backend {
            Backend::Supabase(base) => {
                let client = base.for_user(access_token);
                Self {
                    household: Household::new(Arc::new(client.clone()), auth),
                    client: Some(client),
                    last_seen: Mutex::new(Instant::now()),
                }
            }
            Backend::Shared(service) => Self {
                household: Household::new(service.clone(), auth),
                client: None,
                last_seen: Mutex::new(Instant::now()),
            },
        }
    }

    fn rebind(&self, access_token: &str) {
        if let Some(client) = &self.client {
            client.set_access_token(Some(access_token.to_string()));
        }
        self.touch();
    }

    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    fn idle_since(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock())
    }
}

/// Live sessions keyed by user id
pub struct SessionRegistry {
    backend: Backend,
    sessions: DashMap<Uuid, Arc<Session>>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(backend: Backend, idle_ttl: Duration) -> Self {
        Self {
            backend,
            sessions: DashMap::new(),
            idle_ttl,
        }
    }

    /// The user's session, created on first use; later calls refresh its token
    pub fn open(&self, user_id: Uuid, access_token: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.get(&user_id) {
            session.rebind(access_token);
            return session.clone();
        }

        self.sessions
            .entry(user_id)
            .or_insert_with(|| {
                info!(user_id = %user_id, "Session opened");
                Arc::new(Session::open(&self.backend, user_id, access_token))
            })
            .clone()
    }

    /// Drop a session, cancelling its in-flight fetches
    pub fn close(&self, user_id: Uuid) -> bool {
        match self.sessions.remove(&user_id) {
            Some((_, session)) => {
                session.household.reset();
                info!(user_id = %user_id, "Session closed");
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every session unused for longer than the idle limit as of `now`
    pub fn evict_idle(&self, now: Instant) -> usize {
        let stale: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_since(now) > self.idle_ttl)
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = 0;
        for user_id in stale {
            // A request may have touched the session since the scan
            let removed = self
                .sessions
                .remove_if(&user_id, |_, session| session.idle_since(now) > self.idle_ttl);
            if let Some((_, session)) = removed {
                session.household.reset();
                info!(user_id = %user_id, "Idle session evicted");
                evicted += 1;
            }
        }
        evicted
    }

    /// Periodically evict idle sessions until the runtime shuts down
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = registry.evict_idle(Instant::now());
                if evicted > 0 {
                    debug!(evicted, active = registry.active(), "Session sweep");
                }
            }
        })
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let backend = Backend::Supabase(SupabaseClient::new(&config));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: Config, backend: Backend) -> Self {
        let limiter = create_limiter(config.api_rate_limit);
        let idle_ttl = Duration::from_secs(config.session_idle_secs);
        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionRegistry::new(backend, idle_ttl)),
            limiter,
        }
    }
}
