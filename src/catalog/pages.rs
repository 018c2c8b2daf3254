//! Cursor-following pagination over catalog listings.
//!
//! A listing page looks like
//!
//! ```json
//! { "<lastSegment>": [ { ... }, ... ], "nextPageToken": "..." }
//! ```
//!
//! where `<lastSegment>` is the final segment of the listed resource path.
//! [`Paginator`] flattens the page sequence into one lazy iterator: a page is
//! fetched only once the previous page's items are exhausted, so memory stays
//! bounded to a single page and listing can overlap with whatever consumes
//! the items. A missing `nextPageToken` terminates the sequence; a failed
//! page fetch yields exactly one `Err` and then ends it, so truncation is
//! never silent.

use std::collections::VecDeque;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::catalog::client::{ApiError, CatalogClient};

pub struct Paginator<'c, T> {
    client: &'c CatalogClient,
    path: String,
    /// Key of the item array in each page body: the path's last segment.
    key: String,
    queue: VecDeque<serde_json::Value>,
    next_token: Option<String>,
    started: bool,
    done: bool,
    _record: PhantomData<T>,
}

impl<'c, T> Paginator<'c, T> {
    pub(crate) fn new(client: &'c CatalogClient, path: impl Into<String>) -> Self {
        let path = path.into();
        let key = path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            client,
            path,
            key,
            queue: VecDeque::new(),
            next_token: None,
            started: false,
            done: false,
            _record: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Iterator for Paginator<'_, T> {
    type Item = Result<T, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Drain the buffered page first. Records that do not deserialize
            // are diagnosed and skipped; they must not end the listing.
            if let Some(item) = self.queue.pop_front() {
                match serde_json::from_value(item) {
                    Ok(record) => return Some(Ok(record)),
                    Err(err) => {
                        tracing::warn!(path = %self.path, error = %err, "skipping malformed catalog record");
                        continue;
                    }
                }
            }

            if self.done {
                return None;
            }
            if self.started && self.next_token.is_none() {
                self.done = true;
                return None;
            }

            let token = self.next_token.take();
            let mut page = match self.client.get_page(&self.path, token.as_deref()) {
                Ok(page) => page,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            self.started = true;
            self.next_token = page
                .get("nextPageToken")
                .and_then(|token| token.as_str())
                .map(str::to_owned);

            match page.get_mut(&self.key).map(serde_json::Value::take) {
                Some(serde_json::Value::Array(items)) => self.queue.extend(items),
                _ => {
                    tracing::warn!(path = %self.path, key = %self.key, "listing page carries no item array");
                }
            }
        }
    }
}
