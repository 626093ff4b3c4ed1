//! Enhancer doubles

use chunkstream_engine::audio::PcmBuffer;
use chunkstream_engine::processing::{EnhanceError, Enhancer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Identity enhancer that counts calls and can simulate slow DSP
#[derive(Debug, Default)]
pub struct CountingEnhancer {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingEnhancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Enhancer for CountingEnhancer {
    fn enhance(&self, input: &PcmBuffer, _preset: &str, _intensity: f32) -> Result<Vec<f32>, EnhanceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(input.samples.clone())
    }
}

/// Identity enhancer whose `fail_on`-th call (1-based) fails
#[derive(Debug)]
pub struct FailingEnhancer {
    calls: AtomicUsize,
    fail_on: usize,
}

impl FailingEnhancer {
    pub fn failing_call(fail_on: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Enhancer for FailingEnhancer {
    fn enhance(&self, input: &PcmBuffer, _preset: &str, _intensity: f32) -> Result<Vec<f32>, EnhanceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(EnhanceError::Failed("injected failure".to_string()));
        }
        Ok(input.samples.clone())
    }
}
