use crate::script::ConsoleSink;

/// Console output of a single evaluation. Each evaluation owns its capture, so
/// concurrent runs never see each other's lines.
#[derive(Debug, Default)]
pub(crate) struct ConsoleCapture {
    lines: Vec<String>,
}

impl ConsoleCapture {
    pub(crate) fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub(crate) fn into_output(self) -> String {
        self.lines.join("\n")
    }
}

impl ConsoleSink for ConsoleCapture {
    fn write_line(&mut self, line: String) {
        tracing::trace!(target: "script", "{}", line);
        self.lines.push(line);
    }
}

/// Runs `body` with a fresh capture and hands the capture back afterwards,
/// whatever `body` returned.
pub(crate) fn with_capture<T>(body: impl FnOnce(&mut dyn ConsoleSink) -> T) -> (T, ConsoleCapture) {
    let mut capture = ConsoleCapture::default();
    let result = body(&mut capture);
    (result, capture)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_newline_joined() {
        let ((), capture) = with_capture(|sink| {
            sink.write_line("a b".to_string());
            sink.write_line("c".to_string());
        });
        assert!(!capture.is_empty());
        assert_eq!(capture.into_output(), "a b\nc");
    }

    #[test]
    fn captures_are_independent() {
        let (_, first) = with_capture(|sink| sink.write_line("one".to_string()));
        let (_, second) = with_capture(|_| ());
        assert_eq!(first.into_output(), "one");
        assert!(second.is_empty());
    }
}
