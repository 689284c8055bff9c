//! Remote channel manager client
//!
//! The channel manager owns channels, streams, M3U accounts and EPG sources.
//! Everything in this crate talks to it through [`ChannelManagerClient`] so
//! the tasks can be exercised against mocks.

use async_trait::async_trait;

use crate::errors::ClientResult;
use crate::models::{Channel, ChannelUpdate, EpgSource, M3uAccount, Page, Stream};

pub mod http;

pub use http::HttpChannelManagerClient;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelManagerClient: Send + Sync {
    /// One page of channels, pages start at 1
    async fn get_channels(&self, page: u32, page_size: u32) -> ClientResult<Page<Channel>>;

    /// Replace a channel's ordered stream list
    async fn update_channel(&self, channel_id: i64, update: &ChannelUpdate) -> ClientResult<()>;

    async fn get_streams(&self, page: u32, page_size: u32) -> ClientResult<Page<Stream>>;

    async fn get_streams_by_ids(&self, stream_ids: &[i64]) -> ClientResult<Vec<Stream>>;

    async fn get_epg_sources(&self) -> ClientResult<Vec<EpgSource>>;

    async fn get_epg_source(&self, source_id: i64) -> ClientResult<EpgSource>;

    /// Ask the remote to re-import an EPG source; completion is observed via `updated_at`
    async fn refresh_epg_source(&self, source_id: i64) -> ClientResult<()>;

    async fn get_m3u_accounts(&self) -> ClientResult<Vec<M3uAccount>>;

    async fn refresh_m3u_account(&self, account_id: i64) -> ClientResult<()>;

    /// Walk every page of channels
    async fn get_all_channels(&self, page_size: u32) -> ClientResult<Vec<Channel>> {
        let mut channels = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.get_channels(page, page_size).await?;
            let more = batch.has_next() && !batch.results.is_empty();
            channels.extend(batch.results);
            if !more {
                break;
            }
            page += 1;
        }
        Ok(channels)
    }

    /// Walk every page of streams
    async fn get_all_streams(&self, page_size: u32) -> ClientResult<Vec<Stream>> {
        let mut streams = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.get_streams(page, page_size).await?;
            let more = batch.has_next() && !batch.results.is_empty();
            streams.extend(batch.results);
            if !more {
                break;
            }
            page += 1;
        }
        Ok(streams)
    }
}
