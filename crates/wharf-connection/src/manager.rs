//! Registry of named pools and standalone connections

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{join, join_all};
use parking_lot::RwLock;
use wharf_core::{ConnectionFactory, PoolStats, Result, WharfError};

use crate::pool::{ConnectionPool, PoolConfig};
use crate::settings::{PoolDefinition, WharfSettings};
use crate::Connection;

/// Target reported when a standalone connection cannot be created
const STANDALONE_TARGET: &str = "standalone";

enum PoolSlot {
    /// Name reserved while the pool warms up
    Pending(u64),
    Ready(Arc<ConnectionPool>),
}

/// Owns named pools and standalone connections
///
/// Constructed by the application and shared by reference (usually in an
/// `Arc`). Tear down with [`ConnectionManager::close_all`].
pub struct ConnectionManager {
    pools: RwLock<HashMap<String, PoolSlot>>,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    next_reservation: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            next_reservation: AtomicU64::new(0),
        }
    }

    /// Build a manager with one pool per settings entry.
    ///
    /// `resolve` turns a definition into a factory, typically by parsing its
    /// provider name. On any failure the pools created so far are closed.
    #[tracing::instrument(skip_all)]
    pub async fn from_settings<R>(settings: &WharfSettings, resolve: R) -> Result<Self>
    where
        R: Fn(&PoolDefinition) -> Result<Arc<dyn ConnectionFactory>>,
    {
        let manager = Self::new();
        for (name, definition) in settings.pools() {
            let created = match resolve(definition) {
                Ok(factory) => {
                    manager
                        .create_pool(name, definition.pool.clone(), factory)
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = created {
                tracing::error!(pool = %name, error = %e, "failed to create pool from settings");
                if let Err(close_err) = manager.close_all().await {
                    tracing::warn!(error = %close_err, "failed to close pools after settings error");
                }
                return Err(e);
            }
        }
        tracing::info!(pools = manager.pool_names().len(), "manager created from settings");
        Ok(manager)
    }

    /// Create, pre-warm and register a pool under `name`.
    ///
    /// The name is reserved before warm-up, so a concurrent call with the
    /// same name fails with `DuplicatePool` instead of racing.
    #[tracing::instrument(skip(self, config, factory), fields(pool = %name))]
    pub async fn create_pool<F: ConnectionFactory>(
        &self,
        name: &str,
        config: PoolConfig,
        factory: F,
    ) -> Result<Arc<ConnectionPool>> {
        let token = self.next_reservation.fetch_add(1, Ordering::SeqCst);
        {
            let mut pools = self.pools.write();
            if pools.contains_key(name) {
                return Err(WharfError::DuplicatePool(name.to_string()));
            }
            pools.insert(name.to_string(), PoolSlot::Pending(token));
        }
        let reservation = PendingPool {
            manager: self,
            name,
            token,
        };

        let pool = ConnectionPool::new(name, config, factory).await?;

        let registered = {
            let mut pools = self.pools.write();
            match pools.get_mut(name) {
                Some(slot) if matches!(&*slot, PoolSlot::Pending(t) if *t == token) => {
                    *slot = PoolSlot::Ready(Arc::clone(&pool));
                    true
                }
                _ => false,
            }
        };
        drop(reservation);

        if !registered {
            // `close_all` ran while the pool was warming up
            pool.close().await?;
            return Err(WharfError::PoolClosed(name.to_string()));
        }

        tracing::info!("pool registered");
        Ok(pool)
    }

    pub fn get_pool(&self, name: &str) -> Result<Arc<ConnectionPool>> {
        match self.pools.read().get(name) {
            Some(PoolSlot::Ready(pool)) => Ok(Arc::clone(pool)),
            _ => Err(WharfError::NotFound(format!("pool '{name}'"))),
        }
    }

    /// Close a pool and unregister it
    #[tracing::instrument(skip(self), fields(pool = %name))]
    pub async fn remove_pool(&self, name: &str) -> Result<()> {
        let pool = {
            let mut pools = self.pools.write();
            match pools.remove(name) {
                Some(PoolSlot::Ready(pool)) => pool,
                Some(pending) => {
                    pools.insert(name.to_string(), pending);
                    return Err(WharfError::NotFound(format!("pool '{name}'")));
                }
                None => return Err(WharfError::NotFound(format!("pool '{name}'"))),
            }
        };
        tracing::info!("removing pool");
        pool.close().await
    }

    /// Names of all registered pools, sorted
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .pools
            .read()
            .iter()
            .filter(|(_, slot)| matches!(slot, PoolSlot::Ready(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Statistics for every registered pool
    pub fn all_stats(&self) -> HashMap<String, PoolStats> {
        self.pools
            .read()
            .iter()
            .filter_map(|(name, slot)| match slot {
                PoolSlot::Ready(pool) => Some((name.clone(), pool.stats())),
                PoolSlot::Pending(_) => None,
            })
            .collect()
    }

    /// Open a connection outside any pool and register it by id
    #[tracing::instrument(skip(self, factory))]
    pub async fn create_connection<F: ConnectionFactory>(&self, factory: F) -> Result<Arc<Connection>> {
        let backend = factory
            .create()
            .await
            .map_err(|e| WharfError::ConnectionCreate {
                target: STANDALONE_TARGET.to_string(),
                message: e.to_string(),
            })?;
        let conn = Arc::new(Connection::new(backend));
        self.connections
            .write()
            .insert(conn.id().to_string(), Arc::clone(&conn));
        tracing::info!(connection_id = %conn.id(), "standalone connection created");
        Ok(conn)
    }

    pub fn get_connection(&self, id: &str) -> Result<Arc<Connection>> {
        self.connections
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| WharfError::NotFound(format!("connection '{id}'")))
    }

    /// Close a standalone connection and unregister it
    #[tracing::instrument(skip(self), fields(connection_id = %id))]
    pub async fn close_connection(&self, id: &str) -> Result<()> {
        let conn = self
            .connections
            .write()
            .remove(id)
            .ok_or_else(|| WharfError::NotFound(format!("connection '{id}'")))?;
        conn.close().await
    }

    /// Close every pool and standalone connection.
    ///
    /// All closes run concurrently and all of them finish before this
    /// returns. Both registries end up empty; the first failure, if any, is
    /// returned afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn close_all(&self) -> Result<()> {
        let pools: Vec<Arc<ConnectionPool>> = self
            .pools
            .write()
            .drain()
            .filter_map(|(_, slot)| match slot {
                PoolSlot::Ready(pool) => Some(pool),
                PoolSlot::Pending(_) => None,
            })
            .collect();
        let connections: Vec<Arc<Connection>> = self
            .connections
            .write()
            .drain()
            .map(|(_, conn)| conn)
            .collect();

        tracing::info!(
            pools = pools.len(),
            connections = connections.len(),
            "closing all"
        );

        let (pool_results, connection_results) = join(
            join_all(pools.iter().map(|pool| pool.close())),
            join_all(connections.iter().map(|conn| conn.close())),
        )
        .await;

        let mut first_error = None;
        for (pool, result) in pools.iter().zip(pool_results) {
            if let Err(e) = result {
                tracing::warn!(pool = %pool.name(), error = %e, "failed to close pool");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        for (conn, result) in connections.iter().zip(connection_results) {
            if let Err(e) = result {
                tracing::warn!(connection_id = %conn.id(), error = %e, "failed to close connection");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Drops a pending name reservation unless the pool was registered under it
struct PendingPool<'a> {
    manager: &'a ConnectionManager,
    name: &'a str,
    token: u64,
}

impl Drop for PendingPool<'_> {
    fn drop(&mut self) {
        let mut pools = self.manager.pools.write();
        if matches!(pools.get(self.name), Some(PoolSlot::Pending(t)) if *t == self.token) {
            pools.remove(self.name);
        }
    }
}
