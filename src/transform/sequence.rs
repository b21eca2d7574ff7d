use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::bspline::DeformationField;
use crate::data::Dims;
use crate::error::{RegistrationError, Result};

/// One of the three orthogonal slice orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrthogonalPlane {
    YZ,
    ZX,
    XY,
}

impl OrthogonalPlane {
    /// Visiting order of a registration pass.
    pub const ORDER: [OrthogonalPlane; 3] =
        [OrthogonalPlane::YZ, OrthogonalPlane::ZX, OrthogonalPlane::XY];

    /// Storage slot of this plane inside a [`TransformSequence`] iteration.
    ///
    /// Every reader and writer of sequence slots goes through this mapping.
    pub const fn slot(self) -> usize {
        match self {
            OrthogonalPlane::XY => 0,
            OrthogonalPlane::YZ => 1,
            OrthogonalPlane::ZX => 2,
        }
    }

    pub fn from_slot(slot: usize) -> Option<Self> {
        match slot {
            0 => Some(OrthogonalPlane::XY),
            1 => Some(OrthogonalPlane::YZ),
            2 => Some(OrthogonalPlane::ZX),
            _ => None,
        }
    }

    /// Reslices needed before the loop so that this plane is visited first.
    pub const fn lead_in(self) -> usize {
        match self {
            OrthogonalPlane::YZ => 0,
            OrthogonalPlane::ZX => 1,
            OrthogonalPlane::XY => 2,
        }
    }

    /// The three planes in visiting order when a pass starts at `self`.
    pub fn pass_order(self) -> [OrthogonalPlane; 3] {
        let start = self.lead_in();
        [
            Self::ORDER[start],
            Self::ORDER[(start + 1) % 3],
            Self::ORDER[(start + 2) % 3],
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrthogonalPlane::XY => "XY",
            OrthogonalPlane::YZ => "YZ",
            OrthogonalPlane::ZX => "ZX",
        }
    }
}

impl fmt::Display for OrthogonalPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OrthogonalPlane {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "XY" => Ok(OrthogonalPlane::XY),
            "YZ" => Ok(OrthogonalPlane::YZ),
            "ZX" => Ok(OrthogonalPlane::ZX),
            other => Err(RegistrationError::invalid_configuration(format!(
                "unknown plane '{}', expected XY, YZ or ZX",
                other
            ))),
        }
    }
}

/// Deformation fields recorded for one volume across iterations and planes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSequence {
    slots: Vec<[Option<DeformationField>; 3]>,
    dimensions: Dims,
    first_plane: OrthogonalPlane,
}

impl TransformSequence {
    pub fn new(iteration_count: usize, dimensions: Dims, first_plane: OrthogonalPlane) -> Result<Self> {
        if iteration_count == 0 {
            return Err(RegistrationError::invalid_configuration(
                "a transform sequence needs at least one iteration",
            ));
        }
        if dimensions.is_degenerate() {
            return Err(RegistrationError::invalid_dimensions(format!(
                "sequence reference dimensions {} are empty",
                dimensions
            )));
        }
        Ok(Self {
            slots: vec![Default::default(); iteration_count],
            dimensions,
            first_plane,
        })
    }

    pub fn iteration_count(&self) -> usize {
        self.slots.len()
    }

    /// Dimensions of the volume the sequence was computed for.
    pub fn dimensions(&self) -> Dims {
        self.dimensions
    }

    pub fn first_plane(&self) -> OrthogonalPlane {
        self.first_plane
    }

    fn check_iteration(&self, iteration: usize) -> Result<()> {
        if iteration >= self.slots.len() {
            return Err(RegistrationError::invalid_configuration(format!(
                "iteration {} out of range for a {}-iteration sequence",
                iteration,
                self.slots.len()
            )));
        }
        Ok(())
    }

    pub fn set(&mut self, iteration: usize, plane: OrthogonalPlane, field: DeformationField) -> Result<()> {
        self.check_iteration(iteration)?;
        self.slots[iteration][plane.slot()] = Some(field);
        Ok(())
    }

    pub fn get(&self, iteration: usize, plane: OrthogonalPlane) -> Result<&DeformationField> {
        self.check_iteration(iteration)?;
        self.slots[iteration][plane.slot()]
            .as_ref()
            .ok_or_else(|| RegistrationError::IncompleteSequence {
                iteration,
                plane: plane.to_string(),
            })
    }

    pub fn is_populated(&self, iteration: usize, plane: OrthogonalPlane) -> bool {
        self.slots
            .get(iteration)
            .map(|slots| slots[plane.slot()].is_some())
            .unwrap_or(false)
    }

    pub fn populated_count(&self) -> usize {
        self.slots.iter().flatten().filter(|s| s.is_some()).count()
    }

    /// True once every (iteration, plane) slot holds a field.
    pub fn is_complete(&self) -> bool {
        self.populated_count() == self.slots.len() * 3
    }

    /// First missing slot, in replay order.
    pub fn first_missing(&self) -> Option<(usize, OrthogonalPlane)> {
        (0..self.slots.len())
            .flat_map(|i| self.first_plane.pass_order().into_iter().map(move |p| (i, p)))
            .find(|&(i, p)| !self.is_populated(i, p))
    }

    pub fn ensure_complete(&self) -> Result<()> {
        match self.first_missing() {
            None => Ok(()),
            Some((iteration, plane)) => Err(RegistrationError::IncompleteSequence {
                iteration,
                plane: plane.to_string(),
            }),
        }
    }

    /// Raw slot array of one iteration, indexed by [`OrthogonalPlane::slot`].
    pub fn iteration_slots(&self, iteration: usize) -> Option<&[Option<DeformationField>; 3]> {
        self.slots.get(iteration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_mapping_roundtrip() {
        for plane in OrthogonalPlane::ORDER {
            assert_eq!(OrthogonalPlane::from_slot(plane.slot()), Some(plane));
        }
        assert_eq!(OrthogonalPlane::XY.slot(), 0);
        assert_eq!(OrthogonalPlane::YZ.slot(), 1);
        assert_eq!(OrthogonalPlane::ZX.slot(), 2);
        assert_eq!(OrthogonalPlane::from_slot(3), None);
    }

    #[test]
    fn test_pass_order() {
        use OrthogonalPlane::*;
        assert_eq!(YZ.pass_order(), [YZ, ZX, XY]);
        assert_eq!(ZX.pass_order(), [ZX, XY, YZ]);
        assert_eq!(XY.pass_order(), [XY, YZ, ZX]);
    }

    #[test]
    fn test_parse_plane() {
        assert_eq!("zx".parse::<OrthogonalPlane>().unwrap(), OrthogonalPlane::ZX);
        assert!("xz".parse::<OrthogonalPlane>().is_err());
    }

    #[test]
    fn test_get_before_set_is_incomplete() {
        let mut sequence =
            TransformSequence::new(2, Dims::new(8, 8, 8), OrthogonalPlane::YZ).unwrap();
        let err = sequence.get(1, OrthogonalPlane::ZX).unwrap_err();
        assert!(matches!(err, RegistrationError::IncompleteSequence { iteration: 1, .. }));
        assert!(!sequence.is_complete());

        for i in 0..2 {
            for plane in OrthogonalPlane::ORDER {
                sequence
                    .set(i, plane, DeformationField::identity(1, 8, 8).unwrap())
                    .unwrap();
            }
        }
        assert!(sequence.is_complete());
        assert!(sequence.ensure_complete().is_ok());
        assert_eq!(sequence.populated_count(), 6);
    }

    #[test]
    fn test_out_of_range_iteration() {
        let mut sequence =
            TransformSequence::new(1, Dims::new(4, 4, 4), OrthogonalPlane::XY).unwrap();
        let field = DeformationField::identity(1, 4, 4).unwrap();
        assert!(sequence.set(1, OrthogonalPlane::XY, field).is_err());
        assert!(TransformSequence::new(0, Dims::new(4, 4, 4), OrthogonalPlane::XY).is_err());
    }

    #[test]
    fn test_first_missing_follows_pass_order() {
        let mut sequence =
            TransformSequence::new(1, Dims::new(4, 4, 4), OrthogonalPlane::ZX).unwrap();
        assert_eq!(sequence.first_missing(), Some((0, OrthogonalPlane::ZX)));
        sequence
            .set(0, OrthogonalPlane::ZX, DeformationField::identity(1, 4, 4).unwrap())
            .unwrap();
        assert_eq!(sequence.first_missing(), Some((0, OrthogonalPlane::XY)));
    }
}
