//! A fetcher downloading values over HTTP.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use reqwest::Client;
use url::Url;

use crate::error::{CacheContents, CacheError};
use crate::fetch::{FailureFn, SuccessFn};
use crate::value::CacheValue;

use super::Fetcher;

/// Downloads and decodes the resource behind a URL.
///
/// A response status outside the success range fails with
/// `InvalidStatusCode`; a body shorter than the declared
/// `Content-Length` fails with `MissingData`; bytes that do not decode
/// fail with `InvalidData`. Transport errors are passed through with
/// their original description.
///
/// `cancel` aborts the in-flight transfer and suppresses callback
/// delivery; an aborted transfer is not reported as a failure.
pub struct NetworkFetcher<T> {
    key: String,
    url: Url,
    client: Client,
    cancelled: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::AbortHandle>>,
    _value: PhantomData<fn() -> T>,
}

impl<T: CacheValue> NetworkFetcher<T> {
    /// Creates a fetcher for `url`, keyed by the URL itself.
    pub fn new(client: Client, url: Url) -> Self {
        NetworkFetcher {
            key: url.as_str().to_string(),
            url,
            client,
            cancelled: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            _value: PhantomData,
        }
    }
}

impl<T> Fetcher<T> for NetworkFetcher<T>
where
    T: CacheValue + Send + 'static,
{
    fn key(&self) -> &str {
        &self.key
    }

    fn fetch(&self, on_failure: FailureFn, on_success: SuccessFn<T>) {
        let client = self.client.clone();
        let url = self.url.clone();
        let cancelled = self.cancelled.clone();

        let handle = tokio::spawn(async move {
            let result = download::<T>(&client, url).await;

            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            match result {
                Ok(value) => on_success(value),
                Err(error) => on_failure(error),
            }
        });
        *self.task.lock().unwrap() = Some(handle.abort_handle());
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

async fn download<T: CacheValue>(client: &Client, url: Url) -> CacheContents<T> {
    tracing::debug!(url = %url, "fetching over http");
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(CacheError::InvalidStatusCode(status.as_u16()));
    }

    let expected = response.content_length();
    let mut bytes = Vec::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(e) => {
                // a connection dropped mid-body is a short read when the
                // server declared how much it would send
                if let Some(expected) = expected {
                    if (bytes.len() as u64) < expected {
                        return Err(CacheError::MissingData {
                            expected,
                            received: bytes.len() as u64,
                        });
                    }
                }
                return Err(e.into());
            }
        }
    }

    if let Some(expected) = expected {
        if (bytes.len() as u64) < expected {
            return Err(CacheError::MissingData {
                expected,
                received: bytes.len() as u64,
            });
        }
    }

    T::decode(&bytes).ok_or(CacheError::InvalidData)
}
