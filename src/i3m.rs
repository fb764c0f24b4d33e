//! I3M index: summed inner root lengths over the crown reference length.
//!
//! Used as a proxy for dental maturation; an index below
//! [`ADULT_I3M_THRESHOLD`] labels the subject as adult.

use crate::error::{Error, Result};
use serde::Deserialize;

/// An index strictly below this value yields label `1` (adult).
pub const ADULT_I3M_THRESHOLD: f64 = 0.08;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Segment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Segment {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn length(&self) -> f64 {
        (self.x2 - self.x1).hypot(self.y2 - self.y1)
    }

    fn is_finite(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// One row of `annotations.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub filename: String,
    pub root1: Segment,
    pub root2: Segment,
    pub crown: Segment,
}

/// Column layout of `annotations.csv`, matched by header name.
#[derive(Debug, Deserialize)]
pub(crate) struct AnnotationRow {
    filename: String,
    root1_x1: f64,
    root1_y1: f64,
    root1_x2: f64,
    root1_y2: f64,
    root2_x1: f64,
    root2_y1: f64,
    root2_x2: f64,
    root2_y2: f64,
    crown_x1: f64,
    crown_y1: f64,
    crown_x2: f64,
    crown_y2: f64,
}

impl From<AnnotationRow> for Annotation {
    fn from(r: AnnotationRow) -> Self {
        Annotation {
            filename: r.filename,
            root1: Segment::new(r.root1_x1, r.root1_y1, r.root1_x2, r.root1_y2),
            root2: Segment::new(r.root2_x1, r.root2_y1, r.root2_x2, r.root2_y2),
            crown: Segment::new(r.crown_x1, r.crown_y1, r.crown_x2, r.crown_y2),
        }
    }
}

pub fn i3m_index(a: &Annotation) -> Result<f64> {
    if ![a.root1, a.root2, a.crown].iter().all(Segment::is_finite) {
        return Err(Error::NonFiniteCoordinate {
            filename: a.filename.clone(),
        });
    }
    let crown = a.crown.length();
    if crown == 0.0 || !crown.is_finite() {
        return Err(Error::DegenerateCrown {
            filename: a.filename.clone(),
        });
    }
    // Finite coordinates can still overflow once differenced.
    let index = (a.root1.length() + a.root2.length()) / crown;
    if !index.is_finite() {
        return Err(Error::NonFiniteCoordinate {
            filename: a.filename.clone(),
        });
    }
    Ok(index)
}

/// Computes the index for every row independently, the first bad row aborts.
pub fn compute_i3m(annotations: &[Annotation]) -> Result<Vec<f64>> {
    annotations.iter().map(i3m_index).collect()
}

pub fn age_label(i3m: f64) -> u8 {
    if i3m < ADULT_I3M_THRESHOLD {
        1
    } else {
        0
    }
}
