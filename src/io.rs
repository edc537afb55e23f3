// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stream adapters that enforce the two properties every download in this library must
//! have: a byte-count bound known before the fetch starts, and (where a trusted document
//! records one) a digest the bytes must match in full.

use crate::error::{self, Error, Result};
use bytes::Bytes;
use futures::StreamExt;
use futures_core::stream::BoxStream;
use ring::digest::{Context, SHA256};
use std::convert::TryInto;
use std::task::Poll;
use url::Url;

/// A stream of fetched bytes whose errors have been lifted into this library's error type.
pub(crate) type FetchStream = BoxStream<'static, Result<Bytes>>;

/// Checks that the digest of a completed stream matches a known hash, erroring on the final
/// item otherwise. Callers must buffer the stream to its end before acting on any of it.
pub(crate) struct DigestAdapter {
    url: Url,
    stream: FetchStream,
    hash: Vec<u8>,
    digest: Context,
}

impl DigestAdapter {
    pub(crate) fn sha256(stream: FetchStream, hash: &[u8], url: Url) -> FetchStream {
        Self {
            url,
            stream,
            hash: hash.to_owned(),
            digest: Context::new(&SHA256),
        }
        .boxed()
    }
}

impl futures_core::Stream for DigestAdapter {
    type Item = Result<Bytes>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let poll = self.stream.as_mut().poll_next(cx);
        match &poll {
            Poll::Ready(Some(Ok(bytes))) => {
                self.digest.update(bytes);
            }
            Poll::Ready(None) => {
                let calculated = self.digest.clone().finish();
                if calculated.as_ref() != self.hash.as_slice() {
                    return Poll::Ready(Some(
                        error::HashMismatchSnafu {
                            context: self.url.to_string(),
                            calculated: hex::encode(calculated),
                            expected: hex::encode(&self.hash),
                        }
                        .fail(),
                    ));
                }
            }
            Poll::Ready(Some(Err(_))) | Poll::Pending => (),
        }

        poll
    }
}

/// Creates a new stream from `stream` that errors on the item that pushes the total byte
/// count past `max_size`.
/// * `max_size` - Size limit in bytes.
/// * `specifier` - The origin of the limit, named in the error message.
pub(crate) fn max_size_adapter(
    stream: FetchStream,
    max_size: u64,
    specifier: &'static str,
) -> FetchStream {
    let mut size: u64 = 0;
    let stream = stream.map(move |chunk| {
        if let Ok(bytes) = &chunk {
            size = size.saturating_add(bytes.len().try_into().unwrap_or(u64::MAX));
        }
        if size > max_size {
            return Err(Error::MaxSizeExceeded {
                max_size,
                specifier,
            });
        }
        chunk
    });

    stream.boxed()
}
