//! Index identifiers and request sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::{EcoError, EcoResult};

/// Every index the engine can produce.
///
/// Declaration order is the computation order: band indices and the four
/// composite components first, `Rsei` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Ndvi,
    Ndwi,
    Ndbi,
    Ndsi,
    Greenness,
    Wetness,
    Dryness,
    Heat,
    Rsei,
}

impl IndexKind {
    pub const ALL: [IndexKind; 9] = [
        IndexKind::Ndvi,
        IndexKind::Ndwi,
        IndexKind::Ndbi,
        IndexKind::Ndsi,
        IndexKind::Greenness,
        IndexKind::Wetness,
        IndexKind::Dryness,
        IndexKind::Heat,
        IndexKind::Rsei,
    ];

    /// Inputs of the RSEI synthesis, in loading order.
    pub const RSEI_COMPONENTS: [IndexKind; 4] = [
        IndexKind::Greenness,
        IndexKind::Wetness,
        IndexKind::Dryness,
        IndexKind::Heat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Ndvi => "ndvi",
            IndexKind::Ndwi => "ndwi",
            IndexKind::Ndbi => "ndbi",
            IndexKind::Ndsi => "ndsi",
            IndexKind::Greenness => "greenness",
            IndexKind::Wetness => "wetness",
            IndexKind::Dryness => "dryness",
            IndexKind::Heat => "heat",
            IndexKind::Rsei => "rsei",
        }
    }

    pub fn is_normalized_difference(&self) -> bool {
        matches!(
            self,
            IndexKind::Ndvi | IndexKind::Ndwi | IndexKind::Ndbi | IndexKind::Ndsi
        )
    }

    pub fn is_rsei_component(&self) -> bool {
        Self::RSEI_COMPONENTS.contains(self)
    }

    /// Theoretical value range; `None` for unbounded linear transforms.
    pub fn valid_range(&self) -> Option<(f32, f32)> {
        match self {
            IndexKind::Ndvi | IndexKind::Ndwi | IndexKind::Ndbi | IndexKind::Ndsi => {
                Some((-1.0, 1.0))
            }
            IndexKind::Rsei => Some((0.0, 1.0)),
            IndexKind::Greenness | IndexKind::Wetness | IndexKind::Dryness | IndexKind::Heat => {
                None
            }
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = EcoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        IndexKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| EcoError::UnknownIndex(s.trim().to_string()))
    }
}

/// Ordered, de-duplicated set of requested indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRequest {
    kinds: BTreeSet<IndexKind>,
}

impl IndexRequest {
    pub fn new(kinds: impl IntoIterator<Item = IndexKind>) -> EcoResult<Self> {
        let kinds: BTreeSet<IndexKind> = kinds.into_iter().collect();
        if kinds.is_empty() {
            return Err(EcoError::EmptyRequest);
        }
        Ok(Self { kinds })
    }

    /// Parse identifiers such as `["ndvi", "rsei"]`. Unknown names are rejected.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> EcoResult<Self> {
        let kinds = names
            .iter()
            .map(|n| n.as_ref().parse::<IndexKind>())
            .collect::<EcoResult<Vec<_>>>()?;
        Self::new(kinds)
    }

    /// Parse a comma separated list, e.g. `ndvi,ndwi,rsei`.
    pub fn parse_list(list: &str) -> EcoResult<Self> {
        let names: Vec<&str> = list.split(',').filter(|s| !s.trim().is_empty()).collect();
        Self::parse(&names)
    }

    pub fn kinds(&self) -> impl Iterator<Item = IndexKind> + '_ {
        self.kinds.iter().copied()
    }

    pub fn contains(&self, kind: IndexKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn wants_rsei(&self) -> bool {
        self.contains(IndexKind::Rsei)
    }

    /// The requested set plus the composite components `rsei` depends on.
    pub fn expanded(&self) -> Vec<IndexKind> {
        let mut all = self.kinds.clone();
        if all.contains(&IndexKind::Rsei) {
            all.extend(IndexKind::RSEI_COMPONENTS);
        }
        all.into_iter().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.kinds.iter().map(|k| k.as_str().to_string()).collect()
    }
}
