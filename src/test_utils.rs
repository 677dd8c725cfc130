use burn::tensor::{backend::Backend, Tensor};
use num_traits::ToPrimitive;

use std::io;
use std::sync::{Arc, Mutex};

pub fn max_abs<B: Backend, const D: usize>(x: Tensor<B, D>) -> f64
where
    B::FloatElem: ToPrimitive,
{
    x.abs().max().into_scalar().to_f64().unwrap_or(f64::NAN)
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` under a thread-local subscriber and returns the WARN lines it logged.
pub fn capture_warnings<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().unwrap().clone();
    let warnings = String::from_utf8_lossy(&bytes)
        .lines()
        .filter(|line| line.contains("WARN"))
        .map(str::to_string)
        .collect();

    (result, warnings)
}
