// src/peer.rs
//! Pull-through fetch from the upstream peer.
//!
//! Grounded on the teacher's `repository/chunk_fetcher.rs`, which builds a
//! `reqwest::Client` with optional HTTP/2 prior knowledge, attaches a
//! bearer token read fresh on every call, and streams the response body
//! straight to disk rather than buffering it in memory.

use std::sync::Arc;

use futures::TryStreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::token::TokenProvider;

const USER_AGENT: &str = "MareSynchronosServer/1.0.0.0";
const COPY_BUF_SIZE: usize = 4096;

/// Fetches a single file's bytes from the configured upstream peer.
pub struct PeerFetcher {
    client: reqwest::Client,
    base_uri: String,
    route: String,
    token_provider: Arc<dyn TokenProvider>,
}

impl PeerFetcher {
    pub fn new(
        base_uri: impl Into<String>,
        route: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
        force_http2: bool,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if force_http2 {
            builder = builder.http2_prior_knowledge();
        }
        let client = builder
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_uri: base_uri.into(),
            route: route.into(),
            token_provider,
        })
    }

    fn url_for(&self, hash: &Hash) -> String {
        format!(
            "{}/{}/{}",
            self.base_uri.trim_end_matches('/'),
            self.route.trim_matches('/'),
            hash.as_str()
        )
    }

    /// Streams `hash`'s bytes from the peer into `writer`. Does not retry;
    /// the caller (the coalescing coordinator's scheduled work) owns retry
    /// policy, if any.
    pub async fn fetch<W>(&self, hash: &Hash, mut writer: W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let token = self.token_provider.token().await?;

        let response = self
            .client
            .get(self.url_for(hash))
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| Error::Transport(e.to_string()))?;

        let byte_stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(byte_stream);

        let mut buf = [0u8; COPY_BUF_SIZE];
        loop {
            let n = tokio::io::AsyncReadExt::read(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
        }
        writer.flush().await?;

        Ok(())
    }
}
