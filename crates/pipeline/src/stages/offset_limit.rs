//! OFFSET / LIMIT / TOP pass-through counters.
//!
//! Stateless beyond one remaining-count each: OFFSET drops items until its
//! counter empties, LIMIT (and TOP, which is a LIMIT with its own token
//! stage name) truncates and then reports done. Tokens are just the counter
//! plus the wrapped source token.

use futures::future::BoxFuture;
use futures::FutureExt;

use cpq_common::{CancellationToken, Result};

use crate::page::QueryPage;
use crate::token::{LimitContinuationToken, OffsetContinuationToken};
use crate::{BoxedComponent, PipelineComponent};

use super::SourceFactory;

pub struct OffsetComponent {
    source: BoxedComponent,
    remaining: u64,
}

impl OffsetComponent {
    pub fn try_create(
        offset: u64,
        continuation: Option<&str>,
        make_source: SourceFactory<'_>,
    ) -> Result<BoxedComponent> {
        let (remaining, source_token) = match continuation {
            None => (offset, None),
            Some(raw) => {
                let token = OffsetContinuationToken::decode(raw)?;
                (token.offset, token.source_token)
            }
        };
        let source = make_source(source_token)?;
        Ok(Box::new(OffsetComponent { source, remaining }))
    }
}

impl PipelineComponent for OffsetComponent {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>> {
        async move {
            let mut page = self.source.drain(max_items, cancel).await?;
            if !page.is_success() {
                return Ok(page);
            }
            let skip = (self.remaining as usize).min(page.items.len());
            page.items.drain(..skip);
            self.remaining -= skip as u64;
            Ok(page)
        }
        .boxed()
    }

    fn is_done(&self) -> bool {
        self.source.is_done()
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        if self.is_done() {
            return Ok(None);
        }
        let token = OffsetContinuationToken {
            offset: self.remaining,
            source_token: self.source.continuation_token()?,
        };
        Ok(Some(token.encode()?))
    }
}

pub struct LimitComponent {
    source: BoxedComponent,
    remaining: u64,
}

impl LimitComponent {
    /// A LIMIT stage (paired with OFFSET in the plan).
    pub fn try_create_limit(
        limit: u64,
        continuation: Option<&str>,
        make_source: SourceFactory<'_>,
    ) -> Result<BoxedComponent> {
        Self::try_create(limit, continuation, LimitContinuationToken::STAGE, make_source)
    }

    /// A TOP stage; identical mechanics under its own token stage name.
    pub fn try_create_top(
        top: u64,
        continuation: Option<&str>,
        make_source: SourceFactory<'_>,
    ) -> Result<BoxedComponent> {
        Self::try_create(top, continuation, LimitContinuationToken::TOP_STAGE, make_source)
    }

    fn try_create(
        count: u64,
        continuation: Option<&str>,
        stage: &'static str,
        make_source: SourceFactory<'_>,
    ) -> Result<BoxedComponent> {
        let (remaining, source_token) = match continuation {
            None => (count, None),
            Some(raw) => {
                let token = LimitContinuationToken::decode(raw, stage)?;
                (token.limit, token.source_token)
            }
        };
        let source = make_source(source_token)?;
        Ok(Box::new(LimitComponent { source, remaining }))
    }
}

impl PipelineComponent for LimitComponent {
    fn drain<'a>(
        &'a mut self,
        max_items: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<QueryPage>> {
        async move {
            let request = max_items.min(self.remaining.max(1) as usize);
            let mut page = self.source.drain(request, cancel).await?;
            if !page.is_success() {
                return Ok(page);
            }
            page.items.truncate(self.remaining as usize);
            self.remaining -= page.items.len() as u64;
            Ok(page)
        }
        .boxed()
    }

    fn is_done(&self) -> bool {
        self.remaining == 0 || self.source.is_done()
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        if self.is_done() {
            return Ok(None);
        }
        let token = LimitContinuationToken {
            limit: self.remaining,
            source_token: self.source.continuation_token()?,
        };
        Ok(Some(token.encode()?))
    }
}
