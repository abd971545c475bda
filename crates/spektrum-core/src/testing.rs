//! Scripted device used by the engine, loop and scanner tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::{DirectSampling, ScanDevice};
use crate::error::{ScanError, ScanResult};
use crate::plan::TuningSegment;

/// Everything the mock saw, shared with the test body.
#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub acquired: Vec<usize>,
    pub gains_seen: Vec<i32>,
    pub resets: usize,
    pub offset_tuning: bool,
    pub direct_sampling: DirectSampling,
    pub ppm: i32,
}

pub(crate) struct MockDevice {
    state: Arc<Mutex<MockState>>,
    failing: Vec<usize>,
    short: Vec<usize>,
    fatal_after: Option<usize>,
    delay: Duration,
    level: f64,
    varying: bool,
}

impl MockDevice {
    pub fn new() -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let dev = Self {
            state: state.clone(),
            failing: Vec::new(),
            short: Vec::new(),
            fatal_after: None,
            delay: Duration::from_millis(1),
            level: -50.0,
            varying: false,
        };
        (dev, state)
    }

    /// Segments that always fail with a recoverable error.
    pub fn failing(mut self, segments: &[usize]) -> Self {
        self.failing = segments.to_vec();
        self
    }

    /// Segments that return one reading too few.
    pub fn short(mut self, segments: &[usize]) -> Self {
        self.short = segments.to_vec();
        self
    }

    /// Report the device lost once `n` acquisitions have succeeded.
    pub fn fatal_after(mut self, n: usize) -> Self {
        self.fatal_after = Some(n);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reading for segment `i` is `level - i`.
    pub fn level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }

    /// Add the number of earlier acquisitions to every reading, so each
    /// pass writes different values.
    pub fn varying(mut self) -> Self {
        self.varying = true;
        self
    }

    pub fn boxed(self) -> Box<dyn ScanDevice> {
        Box::new(self)
    }
}

impl ScanDevice for MockDevice {
    fn name(&self) -> &str {
        "mock"
    }

    fn reset_buffer(&mut self) -> ScanResult<()> {
        self.state.lock().unwrap().resets += 1;
        Ok(())
    }

    fn set_offset_tuning(&mut self, enabled: bool) -> ScanResult<()> {
        self.state.lock().unwrap().offset_tuning = enabled;
        Ok(())
    }

    fn set_direct_sampling(&mut self, mode: DirectSampling) -> ScanResult<()> {
        self.state.lock().unwrap().direct_sampling = mode;
        Ok(())
    }

    fn set_frequency_correction(&mut self, ppm: i32) -> ScanResult<()> {
        if ppm.abs() > 1000 {
            return Err(ScanError::Device(format!("ppm {} out of range", ppm)));
        }
        self.state.lock().unwrap().ppm = ppm;
        Ok(())
    }

    fn tuner_gains(&mut self) -> ScanResult<Vec<i32>> {
        Ok(vec![0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297])
    }

    fn acquire_segment(&mut self, index: usize, segment: &TuningSegment) -> ScanResult<Vec<f64>> {
        std::thread::sleep(self.delay);

        let mut state = self.state.lock().unwrap();
        if let Some(n) = self.fatal_after {
            if state.acquired.len() >= n {
                return Err(ScanError::DeviceLost("usb transfer failed".into()));
            }
        }
        if self.failing.contains(&index) {
            return Err(ScanError::acquisition(index, "short read"));
        }
        let value = if self.varying {
            self.level - index as f64 + state.acquired.len() as f64
        } else {
            self.level - index as f64
        };
        state.acquired.push(index);
        state.gains_seen.push(segment.gain);

        let mut len = segment.usable_bins();
        if self.short.contains(&index) {
            len -= 1;
        }
        Ok(vec![value; len])
    }
}
