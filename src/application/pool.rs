//! Fixed-size pool of rendering sessions with exclusive checkout.
//!
//! The pool is the system's sole admission-control mechanism: excess
//! concurrent render requests suspend on `acquire` until a session frees.
//! Capacity is set once at bootstrap and never changes.

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::Instant,
};
use tracing::{debug, info};

use crate::application::session::{RenderSession, SessionCommand, SessionConnector, SessionError};

type FreeList = Arc<Mutex<Vec<Box<dyn RenderSession>>>>;

pub struct SessionPool {
    sessions: FreeList,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl SessionPool {
    /// Establish one session per target, retrying each target immediately
    /// on failure until `deadline` of wall-clock time has elapsed since
    /// that target's first attempt. Any target still unreachable past the
    /// deadline fails the whole bootstrap.
    pub async fn bootstrap(
        connector: Arc<dyn SessionConnector>,
        targets: &[String],
        deadline: Duration,
    ) -> Result<Arc<Self>, SessionError> {
        info!(
            target = "svgsnap::pool",
            targets = targets.len(),
            "connecting rendering sessions"
        );

        let mut sessions = Vec::with_capacity(targets.len());
        for address in targets {
            let session =
                retry_until_deadline(deadline, || connector.connect(address), address).await?;
            sessions.push(session);
        }

        let capacity = sessions.len();
        Ok(Arc::new(Self {
            sessions: Arc::new(Mutex::new(sessions)),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Suspend until a session is available, then check it out
    /// exclusively. The returned guard puts the session back when
    /// dropped, on every exit path including cancellation.
    pub async fn acquire(&self) -> SessionCheckout {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");

        let session = self
            .sessions
            .lock()
            .expect("pool lock poisoned")
            .pop()
            .expect("permit held without a free session");

        SessionCheckout {
            sessions: Arc::clone(&self.sessions),
            session: Some(session),
            _permit: permit,
        }
    }
}

/// Exclusive checkout of one pooled session.
pub struct SessionCheckout {
    sessions: FreeList,
    session: Option<Box<dyn RenderSession>>,
    _permit: OwnedSemaphorePermit,
}

impl SessionCheckout {
    pub async fn run(&mut self, commands: &[SessionCommand]) -> Result<Bytes, SessionError> {
        match self.session.as_mut() {
            Some(session) => session.run(commands).await,
            None => Err(SessionError::protocol("session already returned to pool")),
        }
    }
}

impl Drop for SessionCheckout {
    fn drop(&mut self) {
        // The session goes back on the free list before the permit is
        // released by field drop, so a waiting acquire always finds one.
        if let Some(session) = self.session.take() {
            self.sessions
                .lock()
                .expect("pool lock poisoned")
                .push(session);
        }
    }
}

/// Attempt an operation repeatedly, failing fast once `deadline` of
/// elapsed time has passed since the first attempt. No backoff between
/// attempts.
async fn retry_until_deadline<T, F, Fut>(
    deadline: Duration,
    mut attempt: F,
    address: &str,
) -> Result<T, SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
{
    let started = Instant::now();
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if started.elapsed() > deadline => return Err(err),
            Err(err) => {
                debug!(
                    target = "svgsnap::pool",
                    address,
                    error = %err,
                    "retrying rendering-engine connection"
                );
            }
        }
    }
}
