//! Category to backend and flag selection

use crate::{
    backends::BackendId,
    config::{BackendSelection, ProcessingSettings, QualityPreset},
    types::ProductCategory,
};
use serde::{Deserialize, Serialize};

/// Flags and backend the pipeline runs with for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedConfig {
    pub backend: BackendId,
    pub preserve_holes: bool,
    pub force_binary_alpha: bool,
    pub edge_refinement: bool,
}

/// Pure lookup from [`ProductCategory`] to a [`SelectedConfig`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigSelector;

impl ConfigSelector {
    /// Defaults for a category, ignoring caller settings
    #[must_use]
    pub fn category_defaults(category: ProductCategory) -> SelectedConfig {
        let (backend, preserve_holes, force_binary_alpha) = match category {
            ProductCategory::DarkProduct => (BackendId::IsNet, true, false),
            ProductCategory::Generic => (BackendId::U2NetP, true, true),
            ProductCategory::FineStructure => (BackendId::IsNet, true, true),
            ProductCategory::SolidBackdrop | ProductCategory::UniformLightBackground => {
                (BackendId::U2Net, false, true)
            },
        };
        SelectedConfig {
            backend,
            preserve_holes,
            force_binary_alpha,
            edge_refinement: true,
        }
    }

    /// Resolve the effective configuration for one image
    ///
    /// In auto mode the table wins: the caller's `preserve_holes` and
    /// `edge_refinement` are ignored and the category row decides them.
    /// Only a binary-alpha request is always honoured. Pick an explicit
    /// backend to control those flags. The fast preset never refines edges.
    #[must_use]
    pub fn select(category: ProductCategory, settings: &ProcessingSettings) -> SelectedConfig {
        let mut selected = match settings.backend_selection {
            BackendSelection::Auto => {
                let mut table = Self::category_defaults(category);
                table.force_binary_alpha |= settings.force_binary_alpha;
                table
            },
            BackendSelection::Explicit(backend) => SelectedConfig {
                backend,
                preserve_holes: settings.preserve_holes,
                force_binary_alpha: settings.force_binary_alpha,
                edge_refinement: settings.edge_refinement,
            },
        };
        if settings.quality == QualityPreset::Fast {
            selected.edge_refinement = false;
        }
        log::debug!("Selected {:?} for category {}", selected, category);
        selected
    }
}
