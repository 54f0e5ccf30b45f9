/*
    spotify-export-rs | Rust CLI tool to export playlists and their tracks.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::client::ClientError;
use crate::models::Page;
use log::debug;
use std::future::Future;
use thiserror::Error;

/// Web API maximum for `GET /me/playlists`.
pub const PLAYLISTS_PAGE_SIZE: u32 = 50;
/// Web API maximum for `GET /playlists/{id}/tracks`.
pub const TRACKS_PAGE_SIZE: u32 = 100;

/// Consecutive empty pages tolerated before giving up.
const MAX_EMPTY_PAGES: u32 = 2;

#[derive(Error, Debug)]
pub enum PaginationError {
    #[error("Pagination stalled after {collected} of {total} items: provider returned no new items twice in a row")]
    Stalled { collected: usize, total: u32 },
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Drains a limit/offset paginated resource into one ordered vector.
///
/// `fetch(limit, offset)` is called with `offset` equal to the number of
/// items collected so far until that count reaches the `total` reported by
/// the most recent page.
pub async fn fetch_all<T, F, Fut>(page_size: u32, mut fetch: F) -> Result<Vec<T>, PaginationError>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, ClientError>>,
{
    let mut collected: Vec<T> = Vec::new();
    let mut empty_streak = 0;

    loop {
        let offset = collected.len() as u32;
        let page = fetch(page_size, offset).await?;
        let total = page.total;
        let received = page.items.len();
        collected.extend(page.items);

        debug!(
            "Fetched page: limit={} offset={} received={} total={}",
            page_size, offset, received, total
        );

        if collected.len() >= total as usize {
            return Ok(collected);
        }

        if received == 0 {
            empty_streak += 1;
            if empty_streak >= MAX_EMPTY_PAGES {
                return Err(PaginationError::Stalled {
                    collected: collected.len(),
                    total,
                });
            }
        } else {
            empty_streak = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Serves slices of `0..total` like a well-behaved provider would.
    async fn numbers(total: u32, limit: u32, offset: u32) -> Result<Page<u32>, ClientError> {
        let end = (offset + limit).min(total);
        Ok(Page::new((offset..end).collect(), total))
    }

    #[tokio::test]
    async fn test_collects_every_page_in_order() {
        let calls = Mutex::new(Vec::new());

        let items = fetch_all(TRACKS_PAGE_SIZE, |limit, offset| {
            calls.lock().unwrap().push((limit, offset));
            numbers(237, limit, offset)
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 237);
        assert_eq!(items, (0..237).collect::<Vec<u32>>());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(100, 0), (100, 100), (100, 200)]
        );
    }

    #[tokio::test]
    async fn test_empty_collection_takes_one_call() {
        let calls = AtomicU32::new(0);
        let items = fetch_all(PLAYLISTS_PAGE_SIZE, |limit, offset| {
            calls.fetch_add(1, Ordering::SeqCst);
            numbers(0, limit, offset)
        })
        .await
        .unwrap();

        assert!(items.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_empty_pages_stall() {
        let calls = AtomicU32::new(0);
        let result = fetch_all(TRACKS_PAGE_SIZE, |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ClientError>(Page::<u32>::new(Vec::new(), 50)) }
        })
        .await;

        match result {
            Err(PaginationError::Stalled { collected, total }) => {
                assert_eq!(collected, 0);
                assert_eq!(total, 50);
            }
            other => panic!("expected a stall, got {:?}", other.map(|v| v.len())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_empty_page_is_tolerated() {
        // A page that briefly comes back empty, then the rest arrives.
        let call = AtomicU32::new(0);
        let items = fetch_all(2, |limit, offset| {
            let n = call.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 1 {
                    Ok(Page::new(Vec::new(), 4))
                } else {
                    numbers(4, limit, offset).await
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![0, 1, 2, 3]);
        assert_eq!(call.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_latest_total_wins_when_collection_shrinks() {
        // Total drops from 10 to 3 after the first page.
        let call = AtomicU32::new(0);
        let items = fetch_all(2, |limit, offset| {
            let n = call.fetch_add(1, Ordering::SeqCst);
            let total = if n == 0 { 10 } else { 3 };
            numbers(total, limit, offset)
        })
        .await
        .unwrap();

        assert_eq!(items, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_client_errors_propagate() {
        let result: Result<Vec<u32>, _> = fetch_all(10, |_, _| async {
            Err::<Page<u32>, _>(ClientError::Status {
                status: 500,
                body: "boom".into(),
            })
        })
        .await;

        assert!(matches!(
            result,
            Err(PaginationError::Client(ClientError::Status { status: 500, .. }))
        ));
    }
}
