//! Connection pool implementation

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::Mutex;
use wharf_core::{ConnectionFactory, PoolStats, Result, WharfError};

use super::config::PoolConfig;
use super::waiter::{Grant, WaitQueue, WaiterReceiver};
use crate::Connection;

/// Bookkeeping guarded by the pool lock. Never held across an await.
#[derive(Default)]
struct PoolState {
    closed: bool,
    /// Available connections; the most recently released is reused first
    idle: Vec<Arc<Connection>>,
    /// Checked-out connections keyed by id
    active: HashMap<String, Arc<Connection>>,
    /// Slots held by in-flight creations and release probes. Counted against
    /// `max_size` but not part of `total`.
    reserved: usize,
    waiters: WaitQueue,
    created: u64,
    destroyed: u64,
    failed: u64,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.active.len()
    }

    fn checkout(&mut self, conn: Arc<Connection>) {
        conn.set_active(true);
        self.active.insert(conn.id().to_string(), conn);
    }

    /// Wake the oldest live waiter with `grant`. Returns the grant when the
    /// queue runs dry.
    fn serve(&mut self, mut grant: Grant) -> Option<Grant> {
        while let Some(waiter) = self.waiters.pop_front() {
            match &grant {
                Grant::Connection(conn) => self.checkout(Arc::clone(conn)),
                Grant::Slot => self.reserved += 1,
            }
            match waiter.send(grant) {
                Ok(()) => return None,
                Err(returned) => {
                    // receiver gave up between its deadline and our lock
                    match &returned {
                        Grant::Connection(conn) => {
                            self.active.remove(conn.id());
                        }
                        Grant::Slot => self.reserved -= 1,
                    }
                    grant = returned;
                }
            }
        }
        Some(grant)
    }

    /// Give a connection to the oldest live waiter, or park it as idle.
    fn hand_off_or_idle(&mut self, conn: Arc<Connection>) {
        if let Some(Grant::Connection(conn)) = self.serve(Grant::Connection(conn)) {
            conn.set_active(false);
            self.idle.push(conn);
        }
    }

    /// A creation slot was freed without producing a connection. Let parked
    /// acquires create into it instead of timing out on a pool with room.
    fn grant_slots(&mut self, max_size: usize) {
        if self.closed {
            return;
        }
        while !self.waiters.is_empty() && self.total() + self.reserved < max_size {
            if self.serve(Grant::Slot).is_some() {
                break;
            }
        }
    }

    #[cfg(test)]
    fn assert_disjoint(&self) {
        for conn in &self.idle {
            assert!(
                !self.active.contains_key(conn.id()),
                "connection {} is both idle and active",
                conn.id()
            );
        }
    }

    /// Put an active connection back without probing it.
    fn reclaim(&mut self, conn: &Connection) {
        if self.closed {
            return;
        }
        if let Some(conn) = self.active.remove(conn.id()) {
            self.hand_off_or_idle(conn);
        }
    }
}

enum Next {
    Create,
    Wait(u64, WaiterReceiver),
}

/// A bounded pool of connections for one backend target
///
/// Idle connections are reused before new ones are created; once `max_size`
/// connections exist, further acquires park in a FIFO queue until a
/// connection is released or `acquire_timeout` elapses.
pub struct ConnectionPool {
    name: String,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    started_at: Instant,
}

impl ConnectionPool {
    /// Create a pool and pre-warm `min_size` idle connections.
    ///
    /// Warm-up is best effort: a failed creation is logged and counted in
    /// `failed`, the pool is still returned.
    #[tracing::instrument(skip_all, fields(pool = %name.as_ref()))]
    pub async fn new<F: ConnectionFactory>(
        name: impl AsRef<str>,
        config: PoolConfig,
        factory: F,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let pool = Arc::new(Self {
            name: name.as_ref().to_string(),
            config,
            factory: Arc::new(factory),
            state: Mutex::new(PoolState::default()),
            started_at: Instant::now(),
        });

        for _ in 0..pool.config.min_size() {
            match pool.open().await {
                Ok(conn) => {
                    let mut state = pool.state.lock();
                    state.created += 1;
                    state.idle.push(conn);
                }
                Err(e) => {
                    pool.state.lock().failed += 1;
                    tracing::warn!(error = %e, "failed to pre-warm connection");
                }
            }
        }

        let stats = pool.stats();
        tracing::info!(
            idle = stats.idle(),
            min = pool.config.min_size(),
            max = pool.config.max_size(),
            "connection pool created"
        );
        Ok(pool)
    }

    /// Get the pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        self.snapshot(&state)
    }

    fn snapshot(&self, state: &PoolState) -> PoolStats {
        PoolStats::new(
            state.total(),
            state.idle.len(),
            state.active.len(),
            state.waiters.len(),
        )
        .with_counters(state.created, state.destroyed, state.failed)
        .with_uptime(self.started_at.elapsed())
    }

    /// Check the bookkeeping invariants under the lock
    #[cfg(test)]
    pub(super) fn assert_invariants(&self) {
        let state = self.state.lock();
        state.assert_disjoint();
        assert!(state.total() + state.reserved <= self.config.max_size());
    }

    fn closed_error(&self) -> WharfError {
        WharfError::PoolClosed(self.name.clone())
    }

    /// Open a backend through the factory, bounded by `create_timeout`.
    async fn open(&self) -> Result<Arc<Connection>> {
        let created = match self.config.create_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.factory.create()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(WharfError::ConnectionCreate {
                        target: self.name.clone(),
                        message: format!("timed out after {}ms", limit.as_millis()),
                    });
                }
            },
            None => self.factory.create().await,
        };

        let backend = created.map_err(|e| WharfError::ConnectionCreate {
            target: self.name.clone(),
            message: e.to_string(),
        })?;
        Ok(Arc::new(Connection::new(backend)))
    }

    /// Check out a connection.
    ///
    /// Reuses an idle connection, creates one while under `max_size`, and
    /// otherwise waits (FIFO) up to `acquire_timeout`. A waiter is woken with
    /// either a released connection or, when an in-flight creation fails, the
    /// freed slot to create into.
    #[tracing::instrument(skip(self), fields(pool = %self.name))]
    pub async fn acquire(&self) -> Result<Arc<Connection>> {
        let next = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(self.closed_error());
            }
            if let Some(conn) = state.idle.pop() {
                state.checkout(Arc::clone(&conn));
                tracing::debug!(connection_id = %conn.id(), "reusing idle connection");
                return Ok(conn);
            }
            if state.total() + state.reserved < self.config.max_size() {
                state.reserved += 1;
                Next::Create
            } else {
                let (id, rx) = state.waiters.push();
                Next::Wait(id, rx)
            }
        };

        match next {
            Next::Create => self.create_active().await,
            Next::Wait(id, rx) => self.wait_for(id, rx).await,
        }
    }

    /// Create a connection into a slot already reserved by `acquire`.
    async fn create_active(&self) -> Result<Arc<Connection>> {
        let reservation = Reservation::new(self);
        let result = self.open().await;

        let pool_closed = {
            let mut state = self.state.lock();
            reservation.settle(&mut state);
            match &result {
                Ok(_) if state.closed => true,
                Ok(conn) => {
                    state.created += 1;
                    state.checkout(Arc::clone(conn));
                    false
                }
                Err(_) => {
                    state.failed += 1;
                    state.grant_slots(self.config.max_size());
                    false
                }
            }
        };

        let conn = result.inspect_err(|e| {
            tracing::warn!(error = %e, "failed to create connection");
        })?;

        if pool_closed {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "failed to close connection created during shutdown");
            }
            return Err(self.closed_error());
        }

        tracing::debug!(connection_id = %conn.id(), "created connection");
        Ok(conn)
    }

    async fn wait_for(&self, id: u64, rx: WaiterReceiver) -> Result<Arc<Connection>> {
        let timeout = self.config.acquire_timeout();
        let mut waiting = Waiting {
            pool: self,
            id,
            rx,
            done: false,
        };
        tracing::debug!("pool saturated, waiting for a connection");

        let outcome = tokio::time::timeout(timeout, &mut waiting.rx).await;
        match outcome {
            Ok(Ok(grant)) => {
                waiting.done = true;
                self.take_grant(grant).await
            }
            // sender dropped by `close`
            Ok(Err(_)) => {
                waiting.done = true;
                Err(self.closed_error())
            }
            Err(_) => {
                let (stats, removed) = {
                    let mut state = self.state.lock();
                    let stats = self.snapshot(&state);
                    let removed = state.waiters.remove(id);
                    (stats, removed)
                };
                waiting.done = true;

                if removed {
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        active = stats.active(),
                        waiting = stats.waiting(),
                        "timed out waiting for a connection"
                    );
                    return Err(WharfError::AcquireTimeout {
                        timeout_ms: timeout.as_millis() as u64,
                        stats,
                    });
                }

                // served or rejected between the deadline and the lock
                match waiting.rx.try_recv() {
                    Ok(grant) => self.take_grant(grant).await,
                    Err(_) => Err(self.closed_error()),
                }
            }
        }
    }

    async fn take_grant(&self, grant: Grant) -> Result<Arc<Connection>> {
        match grant {
            Grant::Connection(conn) => Ok(conn),
            Grant::Slot => {
                tracing::debug!("capacity freed, creating connection for waiter");
                self.create_active().await
            }
        }
    }

    /// Return a checked-out connection.
    ///
    /// The connection leaves the active set before it is probed. Healthy
    /// connections go to the oldest waiter or back to idle; unhealthy ones
    /// are destroyed without waking anyone.
    #[tracing::instrument(skip(self, conn), fields(pool = %self.name, connection_id = %conn.id()))]
    pub async fn release(&self, conn: &Arc<Connection>) -> Result<()> {
        let conn = {
            let mut state = self.state.lock();
            match state.active.remove(conn.id()) {
                Some(conn) => {
                    conn.set_active(false);
                    state.reserved += 1;
                    conn
                }
                None if state.closed => return Err(self.closed_error()),
                None => {
                    return Err(WharfError::InvalidState(format!(
                        "connection {} is not active in pool '{}'",
                        conn.id(),
                        self.name
                    )));
                }
            }
        };

        let probe = Reservation::probing(self, Arc::clone(&conn));
        let healthy = conn.ping().await;

        let destroy = {
            let mut state = self.state.lock();
            probe.settle(&mut state);
            if healthy && !state.closed {
                state.hand_off_or_idle(Arc::clone(&conn));
                false
            } else {
                state.destroyed += 1;
                true
            }
        };

        if destroy {
            if healthy {
                tracing::debug!("pool closed during release, destroying connection");
            } else {
                tracing::warn!("connection failed health check, destroying");
            }
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "failed to close connection");
            }
        }
        Ok(())
    }

    /// Destroy idle connections unused for longer than `idle_timeout`.
    ///
    /// Never shrinks the pool below `min_size`. Returns the number evicted.
    #[tracing::instrument(skip(self), fields(pool = %self.name))]
    pub async fn evict_idle(&self) -> usize {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            let limit = self.config.idle_timeout();
            let mut total = state.total();
            let mut evicted = Vec::new();
            let mut kept = Vec::with_capacity(state.idle.len());
            for conn in std::mem::take(&mut state.idle) {
                if total > self.config.min_size() && conn.idle_for() > limit {
                    total -= 1;
                    evicted.push(conn);
                } else {
                    kept.push(conn);
                }
            }
            state.idle = kept;
            state.destroyed += evicted.len() as u64;
            evicted
        };

        for result in join_all(evicted.iter().map(|conn| conn.close())).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to close evicted connection");
            }
        }
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "evicted idle connections");
        }
        evicted.len()
    }

    /// Shut the pool down.
    ///
    /// Rejects every waiter with `PoolClosed` and destroys every idle and
    /// active connection. A second call is a no-op. Close failures do not
    /// stop the remaining destroys; the first one is returned at the end.
    #[tracing::instrument(skip(self), fields(pool = %self.name))]
    pub async fn close(&self) -> Result<()> {
        let connections: Vec<Arc<Connection>> = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            let rejected = state.waiters.clear();
            let mut connections: Vec<_> = state.idle.drain(..).collect();
            connections.extend(state.active.drain().map(|(_, conn)| conn));
            state.destroyed += connections.len() as u64;
            tracing::info!(
                connections = connections.len(),
                rejected_waiters = rejected,
                "closing connection pool"
            );
            connections
        };

        let results = join_all(connections.iter().map(|conn| conn.close())).await;
        let mut first_error = None;
        for (conn, result) in connections.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(connection_id = %conn.id(), error = %e, "failed to close connection");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Check out a connection wrapped in a guard that releases it on drop
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        let connection = self.acquire().await?;
        Ok(PooledConnection {
            pool: Arc::clone(self),
            connection,
            released: false,
        })
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A capacity slot held across an await. Freed on drop if the holding
/// future is cancelled before `settle`; a connection whose release probe
/// was cancelled is destroyed.
struct Reservation<'a> {
    pool: &'a ConnectionPool,
    probing: Option<Arc<Connection>>,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(pool: &'a ConnectionPool) -> Self {
        Self {
            pool,
            probing: None,
            armed: true,
        }
    }

    fn probing(pool: &'a ConnectionPool, conn: Arc<Connection>) -> Self {
        Self {
            pool,
            probing: Some(conn),
            armed: true,
        }
    }

    fn settle(mut self, state: &mut PoolState) {
        state.reserved -= 1;
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.pool.state.lock();
            state.reserved -= 1;
            if self.probing.is_some() {
                state.destroyed += 1;
            } else {
                state.grant_slots(self.pool.config.max_size());
            }
        }

        let Some(conn) = self.probing.take() else {
            return;
        };
        tracing::warn!(
            pool = %self.pool.name,
            connection_id = %conn.id(),
            "release cancelled during health check, destroying connection"
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = conn.close().await {
                    tracing::warn!(error = %e, "failed to close connection");
                }
            });
        }
    }
}

/// A parked acquire. If the acquiring future is dropped, the waiter leaves
/// the queue and any connection already handed to it goes back to the pool.
struct Waiting<'a> {
    pool: &'a ConnectionPool,
    id: u64,
    rx: WaiterReceiver,
    done: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = self.pool.state.lock();
        if state.waiters.remove(self.id) {
            return;
        }
        match self.rx.try_recv() {
            Ok(Grant::Connection(conn)) => state.reclaim(&conn),
            Ok(Grant::Slot) => {
                state.reserved -= 1;
                state.grant_slots(self.pool.config.max_size());
            }
            Err(_) => {}
        }
    }
}

/// A connection checked out through [`ConnectionPool::get`]
///
/// Derefs to [`Connection`]. Prefer [`PooledConnection::release`], which
/// health-checks the connection; dropping the guard releases it on the
/// current tokio runtime, or puts it straight back when there is none.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    connection: Arc<Connection>,
    released: bool,
}

impl PooledConnection {
    /// The underlying connection, e.g. to begin a transaction
    pub fn inner(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The pool this connection returns to
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Release through the pool's health-checked path
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.pool.release(&self.connection).await
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let pool = Arc::clone(&self.pool);
        let conn = Arc::clone(&self.connection);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = pool.release(&conn).await {
                        tracing::debug!(connection_id = %conn.id(), error = %e, "deferred release failed");
                    }
                });
            }
            Err(_) => pool.state.lock().reclaim(&conn),
        }
    }
}
