//! Stage 6: publish combined state for display and telemetry.
//!
//! The combined output is copied straight from Stage 4's buffers; this is
//! authoritative for every virtual-pad type, so there is no query back
//! through the OS controller stack. Consumers read at display cadence
//! through three packed relaxed words per slot.

use crate::gamepad::XboxGamepad;
use crate::pipeline::PipelineCtx;
use std::sync::atomic::{AtomicU32, Ordering};

/// One slot's combined output, packed for lock-free readers.
///
/// Word 0: buttons | left trigger << 16 | right trigger << 24.
/// Word 1: left stick X | Y << 16. Word 2: right stick X | Y << 16.
/// Readers may see words from two different cycles; each word is
/// internally consistent, which is all display needs.
#[derive(Debug, Default)]
pub struct CombinedSlot {
    words: [AtomicU32; 3],
}

impl CombinedSlot {
    pub(crate) fn store(&self, pad: &XboxGamepad) {
        let w0 = pad.buttons as u32
            | (pad.left_trigger as u32) << 16
            | (pad.right_trigger as u32) << 24;
        let w1 = pad.thumb_lx as u16 as u32 | (pad.thumb_ly as u16 as u32) << 16;
        let w2 = pad.thumb_rx as u16 as u32 | (pad.thumb_ry as u16 as u32) << 16;
        self.words[0].store(w0, Ordering::Relaxed);
        self.words[1].store(w1, Ordering::Relaxed);
        self.words[2].store(w2, Ordering::Relaxed);
    }

    pub(crate) fn load(&self) -> XboxGamepad {
        let w0 = self.words[0].load(Ordering::Relaxed);
        let w1 = self.words[1].load(Ordering::Relaxed);
        let w2 = self.words[2].load(Ordering::Relaxed);
        XboxGamepad {
            buttons: w0 as u16,
            left_trigger: (w0 >> 16) as u8,
            right_trigger: (w0 >> 24) as u8,
            thumb_lx: w1 as u16 as i16,
            thumb_ly: (w1 >> 16) as u16 as i16,
            thumb_rx: w2 as u16 as i16,
            thumb_ry: (w2 >> 16) as u16 as i16,
        }
    }
}

pub(crate) fn run(ctx: &mut PipelineCtx) {
    for (slot, pad) in ctx.combined.iter().enumerate() {
        ctx.shared.combined[slot].store(pad);
    }
}
