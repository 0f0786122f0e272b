use anyhow::Result;
use image::RgbImage;
use std::collections::VecDeque;

use crate::recognize::{Recognizer, TextFragment};

/// Recognizer that answers from a script instead of reading pixels.
///
/// In replay mode each call pops the next reply and returns nothing once the
/// script runs out. In cycling mode (used by the synthetic daemon setup) the
/// configured plates are returned round-robin, forever.
#[derive(Debug, Default)]
pub struct ScriptedRecognizer {
    replies: VecDeque<Vec<TextFragment>>,
    cycle: bool,
    calls: u64,
}

impl ScriptedRecognizer {
    pub fn new(replies: Vec<Vec<TextFragment>>) -> Self {
        Self {
            replies: replies.into(),
            cycle: false,
            calls: 0,
        }
    }

    pub fn cycling(plates: Vec<String>) -> Self {
        Self {
            replies: plates
                .into_iter()
                .map(|text| vec![TextFragment::new(text, 1.0)])
                .collect(),
            cycle: true,
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Recognizer for ScriptedRecognizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(&mut self, _plate: &RgbImage) -> Result<Vec<TextFragment>> {
        self.calls += 1;
        let Some(reply) = self.replies.pop_front() else {
            return Ok(Vec::new());
        };
        if self.cycle {
            self.replies.push_back(reply.clone());
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycling_recognizer_wraps_around() -> Result<()> {
        let mut recognizer =
            ScriptedRecognizer::cycling(vec!["AB12CD".to_string(), "XY99".to_string()]);
        let crop = RgbImage::new(4, 2);

        let texts: Vec<String> = (0..3)
            .map(|_| recognizer.recognize(&crop).map(|f| f[0].text.clone()))
            .collect::<Result<_>>()?;

        assert_eq!(texts, vec!["AB12CD", "XY99", "AB12CD"]);
        assert_eq!(recognizer.calls(), 3);
        Ok(())
    }

    #[test]
    fn replay_recognizer_runs_dry() -> Result<()> {
        let mut recognizer = ScriptedRecognizer::new(vec![vec![TextFragment::new("Q1", 0.5)]]);
        let crop = RgbImage::new(4, 2);
        assert_eq!(recognizer.recognize(&crop)?.len(), 1);
        assert!(recognizer.recognize(&crop)?.is_empty());
        Ok(())
    }
}
