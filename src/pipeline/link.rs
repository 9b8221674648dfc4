// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Step links
//!
//! A link names something a step requires or creates. Links of different
//! kinds never match each other, so the graph wires itself from declared
//! capabilities rather than step names.

use std::fmt;

use crate::pipeline::{ImageTagReference, PipelineTag};

/// A typed predicate over the resources a pipeline produces
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepLink {
    /// A tag in the pipeline-internal image stream
    InternalImage(PipelineTag),
    /// A published image-stream tag; the alias does not take part in matching
    ExternalImage(ImageTagReference),
    /// The stream release images are published to
    ReleaseImages,
    /// A named tag inside an imported release payload
    ReleasePayloadImage(PipelineTag),
    /// Every project image has been built
    ImagesReady,
}

impl StepLink {
    pub fn internal_image(tag: impl Into<PipelineTag>) -> Self {
        Self::InternalImage(tag.into())
    }

    pub fn external_image(reference: ImageTagReference) -> Self {
        Self::ExternalImage(reference)
    }

    pub fn release_payload_image(tag: impl Into<PipelineTag>) -> Self {
        Self::ReleasePayloadImage(tag.into())
    }

    /// Whether a step creating `other` satisfies a requirement on `self`
    pub fn matches(&self, other: &StepLink) -> bool {
        match (self, other) {
            (Self::InternalImage(need), Self::InternalImage(have)) => need == have,
            (Self::ExternalImage(need), Self::ExternalImage(have)) => {
                need.namespace == have.namespace && need.name == have.name && need.tag == have.tag
            }
            (Self::ReleaseImages, Self::ReleaseImages) => true,
            (Self::ReleasePayloadImage(need), Self::ReleasePayloadImage(have)) => need == have,
            (Self::ImagesReady, Self::ImagesReady) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StepLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InternalImage(tag) => write!(f, "internal-image({})", tag),
            Self::ExternalImage(reference) => write!(f, "external-image({})", reference),
            Self::ReleaseImages => write!(f, "release-images"),
            Self::ReleasePayloadImage(tag) => write!(f, "release-payload({})", tag),
            Self::ImagesReady => write!(f, "images-ready"),
        }
    }
}

/// Whether any of `needs` is satisfied by any of `haves`
pub fn has_any_link(needs: &[StepLink], haves: &[StepLink]) -> bool {
    needs
        .iter()
        .any(|need| haves.iter().any(|have| need.matches(have)))
}

/// Whether every one of `needs` is satisfied by some of `haves`
pub fn has_all_links(needs: &[StepLink], haves: &[StepLink]) -> bool {
    needs
        .iter()
        .all(|need| haves.iter().any(|have| need.matches(have)))
}

/// Render links for diagnostics
pub fn link_names(links: &[StepLink]) -> Vec<String> {
    links.iter().map(|link| format!("<{}>", link)).collect()
}
