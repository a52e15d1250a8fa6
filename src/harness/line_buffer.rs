/// Splits a byte stream into lines. Bytes are held until a newline arrives,
/// so multi-byte characters cut across reads decode intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line_bytes: Option<usize>,
    forced_breaks: usize,
}

impl LineBuffer {
    pub fn new(max_line_bytes: Option<usize>) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes,
            forced_breaks: 0,
        }
    }

    /// Feeds raw bytes and returns every line completed by them, without the
    /// terminator. `\r\n` counts as one terminator.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        if let Some(max) = self.max_line_bytes {
            while self.pending.len() > max {
                let head: Vec<u8> = self.pending.drain(..max).collect();
                self.forced_breaks = self.forced_breaks.saturating_add(1);
                lines.push(String::from_utf8_lossy(&head).into_owned());
            }
        }

        lines
    }

    /// Number of overlong lines that were broken early since the last call.
    pub fn consume_forced_breaks(&mut self) -> usize {
        std::mem::take(&mut self.forced_breaks)
    }

    /// Whatever is left after the stream closed without a final newline.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
