//! Core client implementation.
//!
//! The [`Client`] is the context object every query runs in. It owns the
//! effective configuration, the shared connection, the initialisation gate
//! and the registry of live queries. Independent clients share nothing.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::QueryId;
use crate::query::task::{QueryContext, QueryTask};
use crate::query::{Callbacks, QueryHandle, QueryState};
use crate::registry::QueryRegistry;
use crate::transport::{ConnectionLifecycle, ConnectionState, Transport};

use super::builder::ClientBuilder;
use super::config::{ConfigOverrides, Configuration};
use super::gate::InitializationGate;

// ============================================================================
// ClientInner
// ============================================================================

/// Shared state behind every clone of a [`Client`].
struct ClientInner {
    /// Effective configuration.
    config: Configuration,
    /// Live queries.
    registry: QueryRegistry,
    /// Shared connection.
    lifecycle: ConnectionLifecycle,
    /// Queues queries until the connection is ready.
    gate: InitializationGate,
    /// Collaborators handed to each query task.
    context: QueryContext,
    /// Runtime query tasks are spawned on.
    runtime: Handle,
}

// ============================================================================
// Client
// ============================================================================

/// Query client multiplexing every query over one shared connection.
///
/// Cloning is cheap; clones share the same connection and registry.
///
/// Dropping the last clone does not stop the connection. Call
/// [`close`](Self::close) to end the session loop.
///
/// # Example
///
/// ```no_run
/// use importio_client::{Client, Hooks};
/// use serde_json::json;
///
/// # async fn example() -> importio_client::Result<()> {
/// let client = Client::builder().build()?;
///
/// let hooks = Hooks::new().on_progress(|p| println!("{}%", p.percent));
/// let handle = client.query(
///     json!({ "connectorGuids": ["..."], "input": { "webpage/url": "http://example.com" } }),
///     hooks,
/// )?;
///
/// for row in handle.wait().await? {
///     println!("{}", row.data);
/// }
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Merges `overrides` over the defaults and builds a client.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::build`].
    pub fn init(overrides: ConfigOverrides) -> Result<Self> {
        ClientBuilder::from(overrides).build()
    }

    /// Returns the default configuration.
    #[inline]
    #[must_use]
    pub fn default_configuration() -> Configuration {
        Configuration::default()
    }

    /// Wires up the client and starts the connection.
    pub(crate) fn new(
        config: Configuration,
        transport: Arc<dyn Transport>,
        http: reqwest::Client,
        runtime: Handle,
    ) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let registry = QueryRegistry::new();

        let lifecycle = ConnectionLifecycle::new(
            Arc::clone(&transport),
            endpoint,
            registry.clone(),
            Arc::clone(&config.connection_callback),
        );
        let gate = InitializationGate::new(lifecycle.clone());

        let context = QueryContext {
            auth: config.auth.clone(),
            http,
            transport,
            registry: registry.clone(),
            timeout: config.timeout,
        };

        info!(configuration = ?config, "Client initialised");

        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                registry,
                lifecycle,
                gate,
                context,
                runtime,
            }),
        };

        client.inner.gate.ensure_ready(None);

        Ok(client)
    }

    /// Submits a query.
    ///
    /// The query is registered immediately and published once the
    /// connection is ready. `callbacks` accepts `()`, a [`Hooks`](crate::Hooks)
    /// set, a [`DoneCallback`](crate::DoneCallback) or a `Vec` of them.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `query` is not a JSON object
    /// - [`Error::DuplicateQuery`] if the generated id is already live
    pub fn query(&self, query: Value, callbacks: impl Into<Callbacks>) -> Result<QueryHandle> {
        if !query.is_object() {
            return Err(Error::invalid_argument("query must be a JSON object"));
        }

        let state = QueryState::new(QueryId::generate());
        let (task, handle, inbox) =
            QueryTask::new(state, query, callbacks.into(), self.inner.context.clone());

        let id = handle.id();
        self.inner.registry.register(id, inbox)?;
        debug!(query_id = %id, "Query submitted");

        // Starting the connection spawns onto the client's runtime.
        let _guard = self.inner.runtime.enter();
        let runtime = self.inner.runtime.clone();
        self.inner.gate.ensure_ready(Some(Box::new(move || {
            runtime.spawn(task.run());
        })));

        Ok(handle)
    }

    /// Disconnects the shared connection.
    ///
    /// Required to shut down: the session loop outlives every `Client`
    /// clone until this is called. Live queries are not failed; they
    /// finish at their deadline.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the disconnect could not be sent.
    pub async fn close(&self) -> Result<()> {
        info!(live = self.inner.registry.len(), "Closing client");
        self.inner.lifecycle.disconnect().await
    }

    /// Returns the effective configuration.
    #[inline]
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.inner.config
    }

    /// Returns the number of live queries.
    #[inline]
    #[must_use]
    pub fn active_queries(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns the state of the shared connection.
    #[inline]
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lifecycle.state()
    }

    /// Returns `true` once queued queries were released.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.gate.is_ready()
    }

    /// Waits until the connection is connected and subscribed.
    pub async fn wait_ready(&self) {
        self.inner.gate.wait_ready().await;
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("lifecycle", &self.inner.lifecycle)
            .field("gate", &self.inner.gate)
            .field("active_queries", &self.inner.registry.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
