//! Segment scanner
//!
//! One call acquires one segment from the device and publishes its readings
//! into the power buffer. The device lock and the buffer lock are never held
//! at the same time, so readers only wait for the slice copy, not for the
//! capture.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::PowerBuffer;
use crate::device::SharedDevice;
use crate::error::{ScanError, ScanResult};
use crate::lock;
use crate::plan::TuningPlan;
use crate::stats::{ScanStats, SegmentTimer};

/// Everything one scan pass borrows from the engine.
///
/// Cloned into the scan thread on every start; the plan it holds is never
/// mutated while a thread owns a clone.
#[derive(Clone)]
pub struct ScanContext {
    pub plan: Arc<TuningPlan>,
    pub device: SharedDevice,
    pub buffer: Arc<Mutex<PowerBuffer>>,
    pub cursor: Arc<AtomicUsize>,
    pub stats: Arc<ScanStats>,
}

/// Acquire segment `index` and write it into the buffer.
///
/// On error the buffer slice and cursor are left untouched.
pub fn scan_one_segment(ctx: &ScanContext, index: usize) -> ScanResult<()> {
    let segment = ctx
        .plan
        .segments()
        .get(index)
        .ok_or(ScanError::NotConfigured)?;

    let timer = SegmentTimer::new(&ctx.stats);
    let readings = lock(&ctx.device).acquire_segment(index, segment)?;

    let usable = segment.usable_bins();
    if readings.len() != usable {
        return Err(ScanError::acquisition(
            index,
            format!("expected {} readings, got {}", usable, readings.len()),
        ));
    }

    let offset = ctx.plan.offset(index);
    {
        let mut buffer = lock(&ctx.buffer);
        debug_assert!(offset + usable <= buffer.len());
        buffer.write_segment(offset, &readings);
        ctx.cursor.store(offset + usable - 1, Ordering::Release);
    }

    timer.finish();
    Ok(())
}
