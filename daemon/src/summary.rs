//! Plain-text call summary for sharing

use crate::backend::{Speaker, TranscriptLine};

/// Render a transcript as labelled paragraphs separated by blank lines
pub fn build_summary(lines: &[TranscriptLine]) -> String {
    lines
        .iter()
        .map(|line| {
            let label = match line.speaker {
                Speaker::Agent => "CallPal",
                Speaker::Counterparty => "Representative",
            };
            format!("{}: {}", label, line.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
