//! # Land-Area Weights
//!
//! Derives the land area of every grid cell from the land fraction (percent)
//! and the cell area: `areacella * (sftlf / 100)`. Both steps run through the
//! external grid tool and leave their results in the intermediate directory.

use crate::cache::CacheLayout;
use crate::error::{ProcessingError, ProcessingResult};
use crate::tool::{GridOp, GridTool};
use log::debug;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// The land fraction and cell area files of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPaths {
    pub sftlf: String,
    pub areacella: String,
}

impl MetadataPaths {
    /// Collapses the `(sftlf, areacella)` pairs of a group's rows into one.
    ///
    /// Every row of a group must point at the same two files; more than one
    /// distinct value for either role fails with
    /// [`ProcessingError::AmbiguousMetadata`], none at all with
    /// [`ProcessingError::MissingMetadata`].
    pub fn unique<'a, I>(pairs: I, key: &str) -> ProcessingResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut sftlf = BTreeSet::new();
        let mut areacella = BTreeSet::new();
        for (land, area) in pairs {
            sftlf.insert(land);
            areacella.insert(area);
        }

        let pick = |values: BTreeSet<&str>, role: &str| -> ProcessingResult<String> {
            let values: Vec<&str> = values.into_iter().filter(|v| !v.is_empty()).collect();
            match values.as_slice() {
                [single] => Ok(single.to_string()),
                [] => Err(ProcessingError::MissingMetadata(format!(
                    "no {} file for {}",
                    role, key
                ))),
                many => Err(ProcessingError::AmbiguousMetadata {
                    key: key.to_string(),
                    role: role.to_string(),
                    count: many.len(),
                }),
            }
        };

        Ok(MetadataPaths {
            sftlf: pick(sftlf, "sftlf")?,
            areacella: pick(areacella, "areacella")?,
        })
    }
}

/// Runs `divc,100` on the land fraction, then multiplies the cell area by the
/// result. Returns the path of `{basename}_LandArea.nc`.
///
/// Always invokes the tool, even if the target already exists; see
/// [`WeightCache::ensure`] for the reusing variant.
pub fn generate_land_area(
    tool: &dyn GridTool,
    meta: &MetadataPaths,
    basename: &str,
    layout: &CacheLayout,
) -> ProcessingResult<PathBuf> {
    let percent_land = layout.percent_land(basename);
    let land_area = layout.land_area(basename);

    debug!("Generating land area grid {}", land_area.display());
    tool.run(
        &GridOp::DivC(100.0),
        &[Path::new(&meta.sftlf)],
        &percent_land,
    )?;
    tool.run(
        &GridOp::Mul,
        &[Path::new(&meta.areacella), percent_land.as_path()],
        &land_area,
    )?;

    if !land_area.exists() {
        return Err(ProcessingError::MissingOutput(land_area));
    }
    Ok(land_area)
}

/// Uniform reuse policy for land area grids, shared by both aggregators.
#[derive(Debug, Clone)]
pub struct WeightCache {
    layout: CacheLayout,
    reuse: bool,
}

impl WeightCache {
    /// With `reuse` set, an existing `{basename}_LandArea.nc` is taken as is.
    pub fn new(layout: CacheLayout, reuse: bool) -> Self {
        WeightCache { layout, reuse }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Returns the land area grid for `basename`, generating it when absent
    /// or when reuse is disabled.
    pub fn ensure(
        &self,
        tool: &dyn GridTool,
        meta: &MetadataPaths,
        basename: &str,
    ) -> ProcessingResult<PathBuf> {
        let land_area = self.layout.land_area(basename);
        if self.reuse && land_area.exists() {
            debug!("Reusing land area grid {}", land_area.display());
            return Ok(land_area);
        }
        generate_land_area(tool, meta, basename, &self.layout)
    }
}
