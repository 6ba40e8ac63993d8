#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use restline::{Dispatcher, Finalized, IncomingRequest, Transport};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// Records every response the dispatcher finalizes.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Finalized>>>);

impl Recorder {
    pub fn sent(&self) -> Vec<Finalized> {
        self.0.lock().unwrap().clone()
    }
}

impl Transport for Recorder {
    fn finalize(self: Box<Self>, response: Finalized) {
        self.0.lock().unwrap().push(response);
    }
}

/// Dispatches `request` and returns the single response it produced.
pub async fn send(dispatcher: &Dispatcher, request: IncomingRequest) -> Finalized {
    let recorder = Recorder::default();
    dispatcher.dispatch(request, Box::new(recorder.clone())).await;
    let mut sent = recorder.sent();
    assert_eq!(sent.len(), 1, "expected exactly one finalized response");
    sent.remove(0)
}

pub fn body_text(response: &Finalized) -> &str {
    std::str::from_utf8(&response.body).unwrap()
}

/// In-memory log sink for the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Installs a thread-local fmt subscriber writing into the capture.
    /// Keep the guard alive for the duration of the test.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Lines containing both `level` and `needle`.
    pub fn lines_with(&self, level: &str, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(level) && line.contains(needle))
            .map(str::to_owned)
            .collect()
    }
}

pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(Arc::clone(&self.0))
    }
}
