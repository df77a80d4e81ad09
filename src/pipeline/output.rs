//! Stage 5: virtual controller lifecycle and report submission.
//!
//! Each slot runs a three-state machine:
//!
//! ```text
//! DETACHED ──active──▶ ATTACHED ──inactive──▶ GRACE ──grace expiry──▶ DETACHED
//!                          ▲                     │
//!                          └──────active─────────┘
//! ```
//!
//! A slot is *active* when at least one online, enabled assignment
//! targets it. The grace period exists because transient inactivity (an
//! enumeration hiccup, a short stall) must not tear the virtual pad down:
//! destroying it severs the game's vibration binding and re-creation is
//! expensive.
//!
//! On attach the stage waits a bounded 50 ms for the fresh pad to surface
//! in the native slot mask and records the OS slot in the loopback set,
//! so Stage 1 never enumerates our own output. An expired wait does not
//! abort the attach; it only means the slot goes unguarded until the pad
//! reports its index.

use std::time::Instant;

use crate::assignment::SLOT_COUNT;
use crate::events::Stage;
use crate::gamepad::Vibration;
use crate::pipeline::{PipelineCtx, SlotRuntime, SlotState};

pub(crate) fn run(ctx: &mut PipelineCtx) {
    let mut active = [false; SLOT_COUNT];
    for (assignment, (_, contributing)) in ctx.assignments.iter().zip(ctx.staging.iter()) {
        if *contributing {
            active[assignment.slot] = true;
        }
    }

    for slot in 0..SLOT_COUNT {
        step_slot(ctx, slot, active[slot]);
    }
}

fn step_slot(ctx: &mut PipelineCtx, slot: usize, active: bool) {
    match (ctx.slots[slot].state, active) {
        (SlotState::Detached, true) => attach(ctx, slot),
        (SlotState::Detached, false) => {}
        (SlotState::Attached, true) | (SlotState::Grace, true) => {
            // Active again: any grace countdown resets.
            ctx.slots[slot].state = SlotState::Attached;
            ctx.slots[slot].grace_left = 0;
            submit(ctx, slot);
        }
        (SlotState::Attached, false) => {
            ctx.slots[slot].state = SlotState::Grace;
            ctx.slots[slot].grace_left = ctx.opts.grace_cycles.saturating_sub(1);
            submit(ctx, slot);
        }
        (SlotState::Grace, false) => {
            if ctx.slots[slot].grace_left == 0 {
                detach(ctx, slot);
            } else {
                ctx.slots[slot].grace_left -= 1;
                submit(ctx, slot);
            }
        }
    }
}

/// Create, wire, and connect a virtual pad for `slot`.
fn attach(ctx: &mut PipelineCtx, slot: usize) {
    let Some(bus) = ctx.bus.as_mut() else {
        if !ctx.bus_warned {
            ctx.bus_warned = true;
            ctx.shared.events.report_error(
                Stage::Output,
                "virtual controller bus unavailable; slot output disabled",
                None,
            );
        }
        return;
    };

    let before = ctx.native.connected_mask();

    let mut pad = match bus.create() {
        Ok(pad) => pad,
        Err(e) => {
            ctx.shared
                .events
                .report_error(Stage::Output, format!("pad create failed: {e}"), None);
            return;
        }
    };

    // Feedback callbacks fire on the bus driver's thread; they publish
    // into the packed per-slot word and nothing else.
    let shared = ctx.shared.clone();
    let handler_slot = slot;
    if let Err(e) = pad.set_feedback_handler(Box::new(move |large, small| {
        shared.store_vibration(
            handler_slot,
            Vibration {
                left: large as u16 * 257,
                right: small as u16 * 257,
            },
        );
    })) {
        ctx.shared
            .events
            .report_error(Stage::Output, format!("feedback hookup failed: {e}"), None);
    }

    if let Err(e) = pad.connect() {
        ctx.shared
            .events
            .report_error(Stage::Output, format!("pad connect failed: {e}"), None);
        return;
    }

    // Bounded spin for the new pad to appear in the native mask.
    let deadline = Instant::now() + ctx.opts.attach_wait;
    let mut os_slot = pad.slot_index();
    while os_slot.is_none() {
        let appeared = ctx.native.connected_mask() & !before;
        if appeared != 0 {
            os_slot = Some(appeared.trailing_zeros() as usize);
            break;
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    if let Some(os) = os_slot {
        ctx.shared.loopback_claim(os);
        log::debug!("slot {slot} attached (native slot {os})");
    } else {
        log::debug!("slot {slot} attached (native slot unknown)");
    }

    ctx.slots[slot] = SlotRuntime {
        state: SlotState::Attached,
        pad: Some(pad),
        os_slot,
        grace_left: 0,
    };
    submit(ctx, slot);
}

/// Submit the slot's combined report to its pad.
fn submit(ctx: &mut PipelineCtx, slot: usize) {
    let report = ctx.combined[slot];
    if let Some(pad) = ctx.slots[slot].pad.as_mut() {
        if let Err(e) = pad.submit(&report) {
            ctx.shared
                .events
                .report_error(Stage::Output, format!("report submit failed: {e}"), None);
        }
    }
}

/// Disconnect a slot's pad and release its loopback entry.
///
/// The loopback release happens here, before the next cycle's Stage 1, so
/// a freed OS slot is immediately enumerable again. Pending vibration is
/// cleared; a re-created pad must not start up rumbling.
pub(crate) fn detach(ctx: &mut PipelineCtx, slot: usize) {
    let rt = &mut ctx.slots[slot];
    if let Some(mut pad) = rt.pad.take() {
        if let Err(e) = pad.disconnect() {
            ctx.shared
                .events
                .report_error(Stage::Output, format!("pad disconnect failed: {e}"), None);
        }
        log::debug!("slot {slot} detached");
    }
    if let Some(os) = rt.os_slot.take() {
        ctx.shared.loopback_release(os);
    }
    rt.state = SlotState::Detached;
    rt.grace_left = 0;
    ctx.shared.store_vibration(slot, Vibration::STOP);
}
