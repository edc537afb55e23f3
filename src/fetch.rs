// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Result};
use crate::io::{max_size_adapter, DigestAdapter, FetchStream};
use crate::transport::{Transport, TransportErrorKind};
use futures::StreamExt;
use snafu::{futures::TryStreamExt, ResultExt};
use url::Url;

/// Fetches `url`, failing as soon as more than `max_size` bytes arrive.
pub(crate) async fn fetch_max_size(
    transport: &dyn Transport,
    url: Url,
    max_size: u64,
    specifier: &'static str,
) -> Result<FetchStream> {
    let stream = transport
        .fetch(url.clone())
        .await
        .with_context(|_| error::TransportSnafu { url: url.clone() })?;
    let stream = stream.context(error::TransportSnafu { url }).boxed();

    Ok(max_size_adapter(stream, max_size, specifier))
}

/// Like [`fetch_max_size`], but returns `Ok(None)` when the file does not exist. Used where
/// the protocol treats absence as "nothing more to do": the next root version during
/// rotation, for example.
pub(crate) async fn fetch_optional_max_size(
    transport: &dyn Transport,
    url: Url,
    max_size: u64,
    specifier: &'static str,
) -> Result<Option<FetchStream>> {
    let stream = match transport.fetch(url.clone()).await {
        Ok(stream) => stream,
        Err(err) => {
            return match err.kind() {
                TransportErrorKind::FileNotFound => Ok(None),
                _ => Err(err).context(error::TransportSnafu { url }),
            };
        }
    };
    let stream = stream.context(error::TransportSnafu { url }).boxed();

    Ok(Some(max_size_adapter(stream, max_size, specifier)))
}

/// Fetches `url` with a size cap, additionally failing unless the complete byte stream
/// matches `sha256`.
pub(crate) async fn fetch_sha256(
    transport: &dyn Transport,
    url: Url,
    size: u64,
    specifier: &'static str,
    sha256: &[u8],
) -> Result<FetchStream> {
    let stream = fetch_max_size(transport, url.clone(), size, specifier).await?;
    Ok(DigestAdapter::sha256(stream, sha256, url))
}
