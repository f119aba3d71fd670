//! Highlight state driven by `mark` calls.

/// The block the program is at, and whether stepping should stop there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightState {
    current: Option<String>,
    paused: bool,
}

impl HighlightState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highlight `block_id` and request a pause.
    pub fn mark(&mut self, block_id: &str) {
        self.current = Some(block_id.to_string());
        self.paused = true;
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Let execution continue; the highlight stays.
    pub fn clear_pause(&mut self) {
        self.paused = false;
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.paused = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_pauses_and_reset_clears() {
        let mut highlight = HighlightState::new();
        highlight.mark("b7");
        assert_eq!(highlight.current(), Some("b7"));
        assert!(highlight.is_paused());

        highlight.clear_pause();
        assert!(!highlight.is_paused());
        assert_eq!(highlight.current(), Some("b7"));

        highlight.reset();
        assert_eq!(highlight, HighlightState::default());
    }
}
