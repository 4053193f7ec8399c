//! Canonical mappings between camera names, spectrograph numbers and arms.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arm {
    B,
    R,
    N,
    M,
}

impl Arm {
    /// 1-indexed arm number used in `sps_camera_id` and the shutter mask.
    pub fn arm_num(self) -> u8 {
        match self {
            Arm::B => 1,
            Arm::R => 2,
            Arm::M => 4,
            Arm::N => 3,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Arm::B => 'b',
            Arm::R => 'r',
            Arm::M => 'm',
            Arm::N => 'n',
        }
    }

    /// `true` for the IR (hx) arm, which has no shutter and no CCD windowing.
    pub fn is_infrared(self) -> bool {
        matches!(self, Arm::N)
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Arm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "b" => Ok(Arm::B),
            "r" => Ok(Arm::R),
            "m" => Ok(Arm::M),
            "n" => Ok(Arm::N),
            other => Err(format!("unknown arm {other:?}")),
        }
    }
}

/// A `(arm, specNum)` pair, e.g. `b1`, `r2`, `n3`, `m4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId {
    pub arm: Arm,
    pub spec_num: u8,
}

impl CameraId {
    pub fn new(arm: Arm, spec_num: u8) -> Self {
        Self { arm, spec_num }
    }

    /// `camId = (specNum − 1)·4 + armNum`, 1-indexed.
    pub fn cam_id(self) -> u32 {
        (self.spec_num as u32 - 1) * 4 + self.arm.arm_num() as u32
    }

    /// Remote actor name for this camera's CCD, e.g. `ccd_b1`.
    pub fn ccd_actor(self) -> String {
        format!("ccd_{}", self)
    }

    /// Remote actor name for this camera's IR detector, e.g. `hx_n3`.
    pub fn hx_actor(self) -> String {
        format!("hx_{}", self)
    }

    /// Remote actor name for the ENU managing this camera's module.
    pub fn enu_actor(self) -> String {
        format!("enu_sm{}", self.spec_num)
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.arm, self.spec_num)
    }
}

impl FromStr for CameraId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let letter = chars.next().ok_or_else(|| format!("empty camera name"))?;
        let arm = Arm::from_str(&letter.to_string())?;
        let spec_num: u8 = chars
            .as_str()
            .parse()
            .map_err(|_| format!("invalid spectrograph number in {s:?}"))?;
        Ok(Self::new(arm, spec_num))
    }
}

/// The shutter bitmask for a single arm in the `lightBeam` (normal) position:
/// `1 << (armNum − 1)`. Modules combine these with bitwise-or to build the
/// `shutterMask=` argument to `shutters expose`.
pub fn shutter_bit(arm: Arm) -> u32 {
    1 << (arm.arm_num() as u32 - 1)
}

pub fn shutter_mask(arms: impl IntoIterator<Item = Arm>) -> u32 {
    arms.into_iter().fold(0, |mask, arm| mask | shutter_bit(arm))
}

/// Builds the `fileIds` mask: bit `k` set iff `camId = k+1` is present.
pub fn file_ids_mask(cams: impl IntoIterator<Item = CameraId>) -> u32 {
    cams.into_iter()
        .fold(0u32, |mask, cam| mask | (1 << (cam.cam_id() - 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cam_id_matches_arm_num_law() {
        assert_eq!(CameraId::new(Arm::B, 1).cam_id(), 1);
        assert_eq!(CameraId::new(Arm::R, 1).cam_id(), 2);
        assert_eq!(CameraId::new(Arm::N, 1).cam_id(), 3);
        assert_eq!(CameraId::new(Arm::M, 1).cam_id(), 4);
        assert_eq!(CameraId::new(Arm::B, 2).cam_id(), 5);
    }

    #[test]
    fn parses_textual_camera_names() {
        assert_eq!(
            "b1".parse::<CameraId>().unwrap(),
            CameraId::new(Arm::B, 1)
        );
        assert_eq!(
            "n3".parse::<CameraId>().unwrap(),
            CameraId::new(Arm::N, 3)
        );
        assert!("x1".parse::<CameraId>().is_err());
    }

    #[test]
    fn file_ids_mask_law_holds() {
        let mask = file_ids_mask([CameraId::new(Arm::B, 1), CameraId::new(Arm::R, 1)]);
        assert_eq!(mask, 0b11);
    }

    #[test]
    fn actor_names_match_convention() {
        let cam = CameraId::new(Arm::N, 3);
        assert_eq!(cam.hx_actor(), "hx_n3");
        assert_eq!(cam.enu_actor(), "enu_sm3");
    }
}
