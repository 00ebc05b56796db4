//! Paged retrieval of remote records newer than a watermark.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::remote::RemoteApi;
use std::marker::PhantomData;
use std::time::Duration;
use tidemark_model::{Payload, RemoteRecord, Timestamp};

/// A finite, restartable, lazy sequence of pages from the remote store.
///
/// Pages are requested strictly sequentially; when a further page is
/// expected, a fixed delay is inserted first so paged pulls respect
/// backend rate limits. A failed page request ends the sequence with the
/// error and leaves the remaining pages for the next cycle. The caller
/// must not advance its cursor past a failure, which makes delivery
/// at-least-once at the family level.
pub struct BatchFetcher<'a, P, R>
where
    P: Payload,
    R: RemoteApi<P>,
{
    remote: &'a R,
    since: Option<Timestamp>,
    page_size: u32,
    page_delay: Duration,
    offset: u32,
    pace_next: bool,
    done: bool,
    _payload: PhantomData<P>,
}

impl<'a, P, R> BatchFetcher<'a, P, R>
where
    P: Payload,
    R: RemoteApi<P>,
{
    /// Starts a paged fetch of records updated strictly after `since`.
    pub fn new(remote: &'a R, since: Option<Timestamp>, config: &SyncConfig) -> Self {
        Self {
            remote,
            since,
            page_size: config.page_size,
            page_delay: config.page_delay,
            offset: 0,
            pace_next: false,
            done: false,
            _payload: PhantomData,
        }
    }
}

impl<P, R> Iterator for BatchFetcher<'_, P, R>
where
    P: Payload,
    R: RemoteApi<P>,
{
    type Item = SyncResult<Vec<RemoteRecord<P>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.pace_next && !self.page_delay.is_zero() {
            std::thread::sleep(self.page_delay);
        }

        match self.remote.list(self.since, self.page_size, self.offset) {
            Ok(page) => {
                self.offset += page.items.len() as u32;
                self.pace_next = page.has_more;
                if !page.has_more {
                    self.done = true;
                }
                if page.items.is_empty() {
                    // Terminal empty page; nothing to deliver.
                    self.done = true;
                    return None;
                }
                Some(Ok(page.items))
            }
            Err(error) => {
                self.done = true;
                Some(Err(error.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RemoteError, SyncError};
    use crate::remote::MockRemote;
    use tidemark_model::EntityPayload;

    fn paced_config(page_size: u32) -> SyncConfig {
        SyncConfig::new()
            .with_page_size(page_size)
            .with_page_delay(Duration::ZERO)
    }

    fn seed_many(remote: &MockRemote<EntityPayload>, count: usize) {
        for i in 0..count {
            remote.seed(&format!("entity-{i}"), EntityPayload::default(), 1);
        }
    }

    #[test]
    fn fetches_all_pages_in_order() {
        let remote = MockRemote::new();
        seed_many(&remote, 5);

        let fetcher = BatchFetcher::new(&remote, None, &paced_config(2));
        let pages: Vec<_> = fetcher.map(|p| p.unwrap()).collect();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].len(), 2);
        assert_eq!(pages[2].len(), 1);
        assert_eq!(remote.counts().list, 3);
    }

    #[test]
    fn empty_result_yields_no_pages() {
        let remote: MockRemote<EntityPayload> = MockRemote::new();
        let mut fetcher = BatchFetcher::new(&remote, None, &paced_config(10));
        assert!(fetcher.next().is_none());
        assert!(fetcher.next().is_none());
    }

    #[test]
    fn page_failure_ends_the_sequence() {
        let remote = MockRemote::new();
        seed_many(&remote, 5);
        remote.fail_next_list(RemoteError::transport_retryable("flaky"));

        let mut fetcher = BatchFetcher::new(&remote, None, &paced_config(2));
        assert!(matches!(
            fetcher.next(),
            Some(Err(SyncError::Remote(RemoteError::Transport { .. })))
        ));
        assert!(fetcher.next().is_none());
    }

    #[test]
    fn mid_sequence_failure_aborts_remaining_pages() {
        let remote = MockRemote::new();
        seed_many(&remote, 5);

        let mut fetcher = BatchFetcher::new(&remote, None, &paced_config(2));
        assert!(fetcher.next().unwrap().is_ok());
        remote.fail_next_list(RemoteError::transport_retryable("flaky"));
        assert!(fetcher.next().unwrap().is_err());
        assert!(fetcher.next().is_none());
        // Two successful-page requests never happened.
        assert_eq!(remote.counts().list, 2);
    }

    #[test]
    fn cursor_filter_is_forwarded() {
        let remote = MockRemote::new();
        let first = remote.seed("entity-0", EntityPayload::default(), 1);
        remote.seed("entity-1", EntityPayload::default(), 1);

        let fetcher = BatchFetcher::new(&remote, Some(first.updated_at), &paced_config(10));
        let pages: Vec<_> = fetcher.map(|p| p.unwrap()).collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].len(), 1);
        assert_eq!(pages[0][0].logical_id, "entity-1");
    }
}
