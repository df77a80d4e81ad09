//! The pipeline driver.
//!
//! Runs cycles on the dedicated thread: measure the cycle start, execute
//! stages 1–6, sleep out the remainder of the period so the next cycle
//! begins at `start + period`. A cooperative stop flag is checked once
//! per cycle; on exit every virtual pad detaches within the same call.
//!
//! The measured frequency is a moving average over the configured window
//! (~1000 cycles, so roughly once a second at the default rate) and is
//! published both through [`EngineShared::measured_frequency`] and as a
//! frequency-updated event.
//!
//! A panic inside a stage is the fatal case: it is caught once, reported
//! with the stage that was executing, and the loop stops.

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use crate::events::EngineEvent;
use crate::pipeline::PipelineCtx;

pub(crate) fn run(mut ctx: PipelineCtx) -> PipelineCtx {
    log::info!(
        "pipeline running (period {:?}, grace {} cycles)",
        ctx.opts.period,
        ctx.opts.grace_cycles
    );

    let period = ctx.opts.period;
    let window = ctx.opts.frequency_window.max(1);
    let mut window_start = Instant::now();
    let mut window_cycles: u32 = 0;

    while ctx.shared.is_running() {
        let cycle_start = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| ctx.cycle()));
        if let Err(payload) = outcome {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "pipeline panicked".into());
            ctx.shared.events.report_error(
                ctx.current_stage,
                format!("fatal: {message}"),
                None,
            );
            ctx.shared.request_stop();
            break;
        }

        window_cycles += 1;
        if window_cycles >= window {
            let elapsed = window_start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let hz = window_cycles as f64 / elapsed;
                ctx.shared.store_frequency(hz);
                ctx.shared.events.emit(&EngineEvent::FrequencyUpdated(hz));
            }
            window_start = Instant::now();
            window_cycles = 0;
        }

        if let Some(remaining) = period.checked_sub(cycle_start.elapsed()) {
            thread::sleep(remaining);
        }
    }

    ctx.detach_all();
    log::info!("pipeline stopped after {} cycles", ctx.cycles());
    ctx
}
