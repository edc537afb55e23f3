// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Result};
use snafu::ensure;

/// The name of a target in a repository, validated at construction.
///
/// Target names are slash-separated paths relative to the targets base URL. `.` and `..`
/// segments are resolved before the name is used for lookups or URL joins; a name that
/// tries to traverse above the repository root is rejected rather than resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetName {
    raw: String,
    /// `None` when resolution changes nothing.
    resolved: Option<String>,
}

impl TargetName {
    /// Creates a `TargetName`, resolving dot segments and failing if the name is empty or
    /// escapes the repository root.
    pub fn new<S: Into<String>>(raw: S) -> Result<Self> {
        let raw = raw.into();
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    ensure!(
                        segments.pop().is_some(),
                        error::UnsafeTargetNameSnafu {
                            name: raw.clone(),
                            reason: "the name traverses above the repository root",
                        }
                    );
                }
                other => segments.push(other),
            }
        }
        ensure!(
            !segments.is_empty(),
            error::UnsafeTargetNameSnafu {
                name: raw.clone(),
                reason: "the name resolves to nothing",
            }
        );
        let resolved = segments.join("/");
        let resolved = if resolved == raw { None } else { Some(resolved) };
        Ok(Self { raw, resolved })
    }

    /// The name exactly as it was given.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The name with dot segments resolved. This is the form used to match against targets
    /// maps and delegation scopes.
    pub fn resolved(&self) -> &str {
        self.resolved.as_deref().unwrap_or(&self.raw)
    }
}
