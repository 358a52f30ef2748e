/// Accumulates tool output the way a terminal would display it.
///
/// Completed lines are appended to the transcript. A carriage return
/// discards the partial line once the next character arrives, so progress
/// bars that redraw themselves only leave their final state behind.
#[derive(Debug, Default)]
pub struct TerminalWriter {
    line: Vec<u8>,
    output: String,
    carriage_return: bool,
}

impl TerminalWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw output. `on_line` receives the transcript each
    /// time a line is completed.
    pub fn write(&mut self, chunk: &[u8], mut on_line: impl FnMut(&str)) {
        for &byte in chunk {
            match byte {
                b'\n' => {
                    self.carriage_return = false;
                    self.output.push_str(&String::from_utf8_lossy(&self.line));
                    self.output.push('\n');
                    self.line.clear();
                    on_line(&self.output);
                }
                b'\r' => self.carriage_return = true,
                _ => {
                    if self.carriage_return {
                        self.line.clear();
                        self.carriage_return = false;
                    }
                    self.line.push(byte);
                }
            }
        }
    }

    /// Transcript of completed lines so far
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Final transcript, including a trailing line without newline.
    pub fn finish(mut self) -> String {
        if !self.line.is_empty() {
            self.output.push_str(&String::from_utf8_lossy(&self.line));
        }
        self.output
    }
}
