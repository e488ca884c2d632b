use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{ReduxError, Result};

/// How per-stage good-pixel masks merge into the final bad-pixel map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskCombination {
    /// A pixel is usable only if every stage found it usable.
    #[default]
    All,
    /// Chain the stage masks with exclusive-or, as the legacy reduction did.
    /// Not monotone: two stages that both flag a pixel cancel out, and four
    /// all-good stages yield an all-bad map.
    ExclusiveOr,
}

impl std::fmt::Display for MaskCombination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::ExclusiveOr => write!(f, "Exclusive Or"),
        }
    }
}

/// Merge stage masks (`true` = usable) into one map.
pub fn combine_masks(masks: &[&Array2<bool>], rule: MaskCombination) -> Result<Array2<bool>> {
    let first = masks.first().ok_or(ReduxError::EmptyAccumulation)?;
    let shape = first.dim();
    let mut combined = (*first).clone();

    for mask in &masks[1..] {
        if mask.dim() != shape {
            return Err(ReduxError::ShapeMismatch {
                expected: shape,
                found: mask.dim(),
            });
        }
        match rule {
            MaskCombination::All => {
                Zip::from(&mut combined)
                    .and(*mask)
                    .for_each(|c, &m| *c = *c && m);
            }
            MaskCombination::ExclusiveOr => {
                Zip::from(&mut combined)
                    .and(*mask)
                    .for_each(|c, &m| *c ^= m);
            }
        }
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_rule_is_logical_and() {
        let a = Array2::from_shape_vec((1, 4), vec![true, true, false, false]).unwrap();
        let b = Array2::from_shape_vec((1, 4), vec![true, false, true, false]).unwrap();
        let c = combine_masks(&[&a, &b], MaskCombination::All).unwrap();
        assert_eq!(c.as_slice().unwrap(), &[true, false, false, false]);
    }

    #[test]
    fn exclusive_or_of_four_good_masks_is_all_bad() {
        let good = Array2::from_elem((2, 2), true);
        let c = combine_masks(&[&good, &good, &good, &good], MaskCombination::ExclusiveOr).unwrap();
        assert!(c.iter().all(|&v| !v));
    }

    #[test]
    fn exclusive_or_of_odd_good_masks_is_all_good() {
        let good = Array2::from_elem((2, 2), true);
        let c = combine_masks(&[&good, &good, &good], MaskCombination::ExclusiveOr).unwrap();
        assert!(c.iter().all(|&v| v));
    }
}
