//! Pool of interchangeable model clients, one per API key.
//!
//! [`KeyPool::with_key_rotation`] runs an operation against the pool starting
//! at a round-robin cursor. Quota and availability failures move on to the
//! next key; anything else is returned straight away. Each key is tried at
//! most once per call.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use super::error::{excerpt, AiError};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct KeyPool<T> {
    clients: Vec<T>,
    cursor: AtomicUsize,
}

impl<T: Clone> KeyPool<T> {
    pub fn new(clients: Vec<T>) -> Result<Self> {
        if clients.is_empty() {
            return Err(Error::Config("API key pool is empty".to_string()));
        }
        Ok(Self {
            clients,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Index of the key the next call will try first.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn set_cursor(&self, index: usize) {
        self.cursor.store(index % self.clients.len(), Ordering::Relaxed);
    }

    /// Run `op` with successive clients until one succeeds, a non-retryable
    /// error occurs, or every key has been tried once.
    ///
    /// The cursor is read at the start and written on success without a
    /// compare-and-swap, so concurrent calls only spread load approximately.
    pub async fn with_key_rotation<F, Fut, R>(&self, mut op: F) -> std::result::Result<R, AiError>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = std::result::Result<R, AiError>>,
    {
        let total = self.clients.len();
        let start = self.cursor();
        let mut last_error: Option<AiError> = None;

        for attempt in 0..total {
            let index = (start + attempt) % total;
            let client = self.clients[index].clone();

            match op(client).await {
                Ok(result) => {
                    self.cursor.store((index + 1) % total, Ordering::Relaxed);
                    if attempt > 0 {
                        debug!(key = index + 1, attempt = attempt + 1, "Fallback key succeeded");
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    let message = err.to_string();
                    warn!(
                        key = index + 1,
                        tried = attempt + 1,
                        total,
                        error = excerpt(&message, 100),
                        "API key failed with a retryable error, rotating"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(AiError::KeysExhausted {
            keys: total,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
        })
    }
}
