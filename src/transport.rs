//! Provides the [`Transport`] trait, which abstracts over the method by which repository
//! files are obtained, and a filesystem implementation of it. The verification pipeline
//! never fetches bytes itself; it consumes size-capped streams produced through this seam.

use async_trait::async_trait;
use bytes::Bytes;
use dyn_clone::DynClone;
use futures::{StreamExt, TryStreamExt};
use futures_core::stream::BoxStream;
use std::fmt::{self, Debug};
use std::io::ErrorKind;
use tokio_util::io::ReaderStream;
use url::Url;

/// The stream of bytes produced by a [`Transport`] fetch.
pub type TransportStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A trait to abstract over the method/protocol by which files are obtained.
///
/// The trait hides the underlying types involved by returning the bytes as a
/// [`TransportStream`] and by requiring the concrete type [`TransportError`] as the error
/// type.
#[async_trait]
pub trait Transport: Debug + DynClone + Send + Sync {
    /// Opens a byte stream for the file specified by `url`, or fails with
    /// `TransportErrorKind::FileNotFound` if no such file exists.
    async fn fetch(&self, url: Url) -> Result<TransportStream, TransportError>;
}

// Implement `Clone` for `Transport` trait objects.
dyn_clone::clone_trait_object!(Transport);

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The kind of error that the transport object experienced during `fetch`.
///
/// Some TUF operations need to know if a [`Transport`] failure is a result of a file not
/// being found; e.g. the next root version not existing is how root rotation ends, and a
/// missing target is reported differently than a broken connection. To distinguish this
/// case from other failures, transports use `TransportErrorKind::FileNotFound`.
#[derive(Debug, Copy, Clone)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The transport does not handle the URL scheme, e.g. `file://` or `http://`.
    UnsupportedUrlScheme,
    /// The file cannot be found.
    ///
    /// Some TUF operations could be interested in treating this error as not-fatal.
    FileNotFound,
    /// The transport failed for any other reason, e.g. IO error.
    Other,
}

/// The error type that [`Transport`] `fetch` returns.
#[derive(Debug)]
pub struct TransportError {
    /// The kind of error that occurred.
    kind: TransportErrorKind,
    /// The URL that the transport was trying to fetch.
    url: String,
    /// The underlying error that occurred (if any).
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    /// Creates a new [`TransportError`] with no underlying cause.
    pub fn new<S>(kind: TransportErrorKind, url: S) -> Self
    where
        S: AsRef<str>,
    {
        Self {
            kind,
            url: url.as_ref().into(),
            source: None,
        }
    }

    /// Creates a new [`TransportError`] wrapping an underlying cause.
    pub fn new_with_cause<S, E>(kind: TransportErrorKind, url: S, source: E) -> Self
    where
        S: AsRef<str>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            kind,
            url: url.as_ref().into(),
            source: Some(source.into()),
        }
    }

    /// The kind of error that occurred.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// The URL that the transport was trying to fetch.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source.as_ref() {
            Some(source) => write!(
                f,
                "Transport error fetching '{}' ({:?}): {}",
                self.url, self.kind, source
            ),
            None => write!(f, "Transport error fetching '{}' ({:?})", self.url, self.kind),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Provides a [`Transport`] for local files.
#[derive(Debug, Clone, Copy)]
pub struct FilesystemTransport;

#[async_trait]
impl Transport for FilesystemTransport {
    async fn fetch(&self, url: Url) -> Result<TransportStream, TransportError> {
        if url.scheme() != "file" {
            return Err(TransportError::new_with_cause(
                TransportErrorKind::UnsupportedUrlScheme,
                &url,
                "FilesystemTransport only handles the 'file' scheme",
            ));
        }

        let file = tokio::fs::File::open(url.path()).await.map_err(|err| {
            let kind = match err.kind() {
                ErrorKind::NotFound => TransportErrorKind::FileNotFound,
                _ => TransportErrorKind::Other,
            };
            TransportError::new_with_cause(kind, &url, err)
        })?;
        let stream = ReaderStream::new(file)
            .map_err(move |err| TransportError::new_with_cause(TransportErrorKind::Other, &url, err));
        Ok(stream.boxed())
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Collects a byte stream into a single buffer.
#[async_trait]
pub trait IntoVec<E> {
    /// Drains the stream, failing with the stream's first error if any.
    async fn into_vec(self) -> Result<Vec<u8>, E>;
}

#[async_trait]
impl<E: Send + 'static> IntoVec<E> for BoxStream<'static, Result<Bytes, E>> {
    async fn into_vec(self) -> Result<Vec<u8>, E> {
        self.try_fold(Vec::new(), |mut buf, bytes| {
            buf.extend_from_slice(&bytes);
            futures::future::ready(Ok(buf))
        })
        .await
    }
}
