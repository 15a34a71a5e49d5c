use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ConfigError;
use crate::session::{ConnectionListener, Session, SessionId, SessionParts};
use crate::sink::Sink;
use crate::transport::Connector;

/// Maps stable tab identifiers to their sessions.
///
/// A UI surface may unmount and remount any number of times; as long as it
/// re-acquires with the same id it gets the same session back, connection and
/// scrollback intact. Only [`Registry::dispose`] ends a session.
pub struct Registry {
    sessions: Mutex<HashMap<SessionId, Session>>,
    connector: Arc<dyn Connector>,
    config: Arc<Config>,
    listener: Option<ConnectionListener>,
}

impl Registry {
    /// Fails if `config` does not pass [`Config::validate`].
    pub fn new(connector: Arc<dyn Connector>, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            sessions: Mutex::new(HashMap::new()),
            connector,
            config: Arc::new(config),
            listener: None,
        })
    }

    /// Observe connectivity of every session created afterwards.
    pub fn with_listener(mut self, listener: impl Fn(&str, bool) + Send + Sync + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Return the session for `id`, creating it (and connecting to `target`)
    /// if there is none. `make_sink` only runs on creation. Must be called
    /// from within a tokio runtime.
    pub fn acquire_or_create<S, F>(&self, id: &str, target: &str, make_sink: F) -> Session
    where
        S: Sink,
        F: FnOnce() -> S,
    {
        // Held across connect + spawn so racing callers see exactly one session.
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(id) {
            debug!(session = id, "reattached to existing session");
            return existing.clone();
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.connector.connect(target, events_tx);
        let session = Session::spawn(SessionParts {
            id: id.to_string(),
            target: target.to_string(),
            sink: Box::new(make_sink()),
            transport,
            events: events_rx,
            config: Arc::clone(&self.config),
            listener: self.listener.clone(),
        });
        sessions.insert(id.to_string(), session.clone());
        info!(session = id, target, "session created");
        session
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.lock().get(id).cloned()
    }

    /// End the session for `id`. Returns `false` for unknown or already
    /// disposed ids.
    pub fn dispose(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id);
        match removed {
            Some(session) => {
                session.dispose();
                true
            }
            None => {
                debug!(session = id, "dispose of unknown session ignored");
                false
            }
        }
    }

    pub fn dispose_all(&self) {
        let drained: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in drained {
            session.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Ids of live sessions, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
