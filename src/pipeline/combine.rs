//! Stage 4: merge per-assignment outputs into per-slot outputs.
//!
//! Merge rules, per slot:
//! - buttons: bitwise OR
//! - triggers: MAX
//! - thumb sticks: per stick, the contributing `(X, Y)` pair with the
//!   greatest L2 magnitude wins whole; on equal magnitude the assignment
//!   with the lowest sort order keeps the stick, so the result is
//!   deterministic.
//!
//! A slot with no contributing assignment combines to neutral.

use crate::assignment::SlotAssignment;
use crate::gamepad::XboxGamepad;
use crate::pipeline::PipelineCtx;

#[inline]
fn magnitude2(x: i16, y: i16) -> i64 {
    x as i64 * x as i64 + y as i64 * y as i64
}

/// Merge every contributing staging buffer targeting `slot`.
///
/// `staging` lines up index-for-index with `assignments`, which is
/// ordered by `(slot, sort_order)`; the strictly-greater magnitude
/// comparison therefore leaves ties with the earliest contributor.
pub(crate) fn combine_slot(
    slot: usize,
    assignments: &[SlotAssignment],
    staging: &[(XboxGamepad, bool)],
) -> XboxGamepad {
    let mut out = XboxGamepad::NEUTRAL;
    let mut best_left = -1i64;
    let mut best_right = -1i64;

    for (assignment, (pad, contributing)) in assignments.iter().zip(staging.iter()) {
        if assignment.slot != slot || !*contributing {
            continue;
        }

        out.buttons |= pad.buttons;
        out.left_trigger = out.left_trigger.max(pad.left_trigger);
        out.right_trigger = out.right_trigger.max(pad.right_trigger);

        let left = magnitude2(pad.thumb_lx, pad.thumb_ly);
        if left > best_left {
            best_left = left;
            out.thumb_lx = pad.thumb_lx;
            out.thumb_ly = pad.thumb_ly;
        }
        let right = magnitude2(pad.thumb_rx, pad.thumb_ry);
        if right > best_right {
            best_right = right;
            out.thumb_rx = pad.thumb_rx;
            out.thumb_ry = pad.thumb_ry;
        }
    }

    out
}

pub(crate) fn run(ctx: &mut PipelineCtx) {
    let PipelineCtx {
        assignments,
        staging,
        combined,
        ..
    } = ctx;

    for (slot, out) in combined.iter_mut().enumerate() {
        *out = combine_slot(slot, assignments, staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::AssignmentSet;
    use crate::device::DeviceId;
    use crate::gamepad::buttons;
    use crate::mapping::MappingConfig;
    use std::sync::Arc;

    /// Build a sorted assignment list plus aligned staging rows from
    /// `(slot, sort_order, staged pad)` triples.
    fn fixture(
        rows: &[(usize, u32, XboxGamepad)],
    ) -> (Vec<SlotAssignment>, Vec<(XboxGamepad, bool)>) {
        let set = AssignmentSet::new();
        let mapping = Arc::new(MappingConfig::new());
        let mut list = Vec::new();
        for (i, (slot, order, _)) in rows.iter().enumerate() {
            let mut a = SlotAssignment::new(
                DeviceId::from_key(format!("dev{i}")),
                *slot,
                mapping.clone(),
            );
            a.sort_order = *order;
            list.push(a);
        }
        set.install(list);
        let (assignments, _) = set.snapshot();
        let staging = assignments
            .iter()
            .map(|a| {
                let idx: usize = a.device.as_str()[3..].parse().unwrap();
                (rows[idx].2, true)
            })
            .collect();
        (assignments.as_ref().clone(), staging)
    }

    #[test]
    fn triggers_max_buttons_or() {
        let a = XboxGamepad {
            buttons: buttons::A,
            left_trigger: 200,
            ..XboxGamepad::NEUTRAL
        };
        let b = XboxGamepad {
            buttons: buttons::A | buttons::B,
            left_trigger: 100,
            ..XboxGamepad::NEUTRAL
        };
        let (assignments, staging) = fixture(&[(1, 0, a), (1, 1, b)]);

        let combined = combine_slot(1, &assignments, &staging);
        assert_eq!(combined.left_trigger, 200);
        assert_eq!(combined.buttons, buttons::A | buttons::B);
        // Only one A bit exists, no matter how many contributors set it.
        assert_eq!(combined.buttons.count_ones(), 2);

        for slot in [0, 2, 3] {
            assert_eq!(combine_slot(slot, &assignments, &staging), XboxGamepad::NEUTRAL);
        }
    }

    #[test]
    fn greatest_stick_pair_wins_whole() {
        let small = XboxGamepad {
            thumb_lx: 1_000,
            thumb_ly: 1_000,
            ..XboxGamepad::NEUTRAL
        };
        let big = XboxGamepad {
            thumb_lx: 0,
            thumb_ly: -20_000,
            ..XboxGamepad::NEUTRAL
        };
        let (assignments, staging) = fixture(&[(0, 0, small), (0, 1, big)]);
        let combined = combine_slot(0, &assignments, &staging);
        // The pair is taken whole, not per component.
        assert_eq!((combined.thumb_lx, combined.thumb_ly), (0, -20_000));
    }

    #[test]
    fn equal_magnitude_ties_go_to_lowest_sort_order() {
        let first = XboxGamepad {
            thumb_rx: 10_000,
            thumb_ry: 0,
            ..XboxGamepad::NEUTRAL
        };
        let second = XboxGamepad {
            thumb_rx: 0,
            thumb_ry: 10_000,
            ..XboxGamepad::NEUTRAL
        };
        // Same magnitude; sort order 2 loses to sort order 1.
        let (assignments, staging) = fixture(&[(2, 2, second), (2, 1, first)]);
        let combined = combine_slot(2, &assignments, &staging);
        assert_eq!((combined.thumb_rx, combined.thumb_ry), (10_000, 0));
    }

    #[test]
    fn non_contributing_rows_are_ignored() {
        let loud = XboxGamepad {
            buttons: buttons::Y,
            right_trigger: 255,
            ..XboxGamepad::NEUTRAL
        };
        let (assignments, mut staging) = fixture(&[(3, 0, loud)]);
        staging[0].1 = false; // offline or disabled this cycle
        assert_eq!(combine_slot(3, &assignments, &staging), XboxGamepad::NEUTRAL);
    }
}
