//! Zone registry.
//!
//! Zones are named polygons in the same pixel space as detections. They are
//! authored elsewhere and loaded once per session; nothing here mutates them.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::Point;

pub const MIN_ZONE_VERTICES: usize = 3;

/// Zone loading and lookup failures.
///
/// These travel inside `anyhow::Error`; callers that need to tell them apart
/// use `err.downcast_ref::<ZoneError>()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZoneError {
    Config(String),
    NotFound(String),
}

impl fmt::Display for ZoneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneError::Config(msg) => write!(f, "zone config error: {}", msg),
            ZoneError::NotFound(name) => write!(f, "zone not found: {}", name),
        }
    }
}

impl std::error::Error for ZoneError {}

#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    pub name: String,
    pub vertices: Vec<Point>,
}

impl Zone {
    pub fn new(name: impl Into<String>, vertices: Vec<Point>) -> Self {
        Self {
            name: name.into(),
            vertices,
        }
    }

    /// Even-odd ray casting with half-open edges.
    ///
    /// An edge counts when the point's y lies in `[min(yi, yj), max(yi, yj))`,
    /// and a crossing counts only when it lies strictly right of the point. For an
    /// axis-aligned rectangle this puts the min-x and min-y edges inside and the
    /// max-x and max-y edges outside. Self-intersecting polygons get the even-odd
    /// interpretation.
    pub fn contains(&self, p: Point) -> bool {
        let (px, py) = (p.x as f64, p.y as f64);
        let n = self.vertices.len();
        if n < MIN_ZONE_VERTICES {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = (self.vertices[i].x as f64, self.vertices[i].y as f64);
            let (xj, yj) = (self.vertices[j].x as f64, self.vertices[j].y as f64);
            if (yi > py) != (yj > py) {
                let x_cross = (xj - xi) * (py - yi) / (yj - yi) + xi;
                if px < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

#[derive(Clone, Debug, Default)]
pub struct ZoneRegistry {
    zones: Vec<Zone>,
}

impl ZoneRegistry {
    /// Validate and freeze a set of zones. Input order is kept and drives event order.
    pub fn load(zones: Vec<Zone>) -> Result<Self> {
        let mut seen = HashSet::new();
        for zone in &zones {
            if zone.vertices.len() < MIN_ZONE_VERTICES {
                return Err(ZoneError::Config(format!(
                    "zone {:?} has {} vertices, need at least {}",
                    zone.name,
                    zone.vertices.len(),
                    MIN_ZONE_VERTICES
                ))
                .into());
            }
            if !seen.insert(zone.name.as_str()) {
                return Err(
                    ZoneError::Config(format!("duplicate zone name {:?}", zone.name)).into(),
                );
            }
        }
        Ok(Self { zones })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the zones file written by the authoring tool.
    ///
    /// Accepts `{"zones": [[[x, y], ...]], "labels": [...]}` and the older bare
    /// list of polygons. Unlabelled zones are named `Zone {n}` (1-based).
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: ZonesFile = serde_json::from_str(raw)
            .map_err(|e| ZoneError::Config(format!("invalid zones file: {}", e)))?;
        let (polygons, labels) = match file {
            ZonesFile::Labelled { zones, labels } => (zones, labels),
            ZonesFile::Bare(zones) => (zones, Vec::new()),
        };
        if labels.len() > polygons.len() {
            log::warn!(
                "zones file has {} labels for {} zones; ignoring extra labels",
                labels.len(),
                polygons.len()
            );
        }
        let zones = polygons
            .into_iter()
            .enumerate()
            .map(|(idx, poly)| {
                let name = labels
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| format!("Zone {}", idx + 1));
                let vertices = poly.into_iter().map(|[x, y]| Point::new(x, y)).collect();
                Zone::new(name, vertices)
            })
            .collect();
        Self::load(zones)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read zones file {}: {}", path.display(), e))?;
        Self::from_json_str(&raw)
            .map_err(|e| e.context(format!("zones file {}", path.display())))
    }

    pub fn lookup(&self, name: &str) -> Result<&Zone> {
        self.zones
            .iter()
            .find(|zone| zone.name == name)
            .ok_or_else(|| ZoneError::NotFound(name.to_string()).into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.zones.iter().map(|zone| zone.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ZonesFile {
    Labelled {
        zones: Vec<Vec<[f32; 2]>>,
        #[serde(default)]
        labels: Vec<String>,
    },
    Bare(Vec<Vec<[f32; 2]>>),
}
