//! Per-frame aggregation of tile recognitions
//!
//! Tokens from every tile are filtered, moved into frame-normalized space and
//! deduplicated. Overlapping tiles often read the same word twice; the copy
//! with the higher confidence wins.

use std::collections::HashMap;
use std::time::Duration;

use crate::recognition::engine::{normalize_confidence, PixelBox, TileRecognition};
use crate::recognition::tiling::Tile;
use crate::recognition::{NormalizedBoundingBox, OcrResult, RecognizedWord};

/// Positions are rounded to 1/1000 of the frame for the dedup key.
/// Coarse on purpose and resolution dependent; words close to a tile seam can
/// fail to merge at extreme resolutions.
pub const DEDUP_PRECISION: f32 = 1000.0;

/// Smallest normalized area a word may cover
pub const DEFAULT_MIN_AREA: f32 = 0.00002;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    text: String,
    x: i64,
    y: i64,
}

impl DedupKey {
    fn new(text: &str, bbox: &NormalizedBoundingBox) -> Self {
        Self {
            text: text.to_lowercase(),
            x: (bbox.x * DEDUP_PRECISION).round() as i64,
            y: (bbox.y * DEDUP_PRECISION).round() as i64,
        }
    }
}

/// Collects tile recognitions for a single frame
#[derive(Debug)]
pub struct FrameAggregator {
    frame_width: f32,
    frame_height: f32,
    min_confidence: f32,
    min_area: f32,
    words: HashMap<DedupKey, RecognizedWord>,
    transcript: Vec<String>,
    dropped: usize,
}

impl FrameAggregator {
    pub fn new(frame_width: u32, frame_height: u32, min_confidence: f32, min_area: f32) -> Self {
        Self {
            frame_width: frame_width.max(1) as f32,
            frame_height: frame_height.max(1) as f32,
            min_confidence,
            min_area,
            words: HashMap::new(),
            transcript: Vec::new(),
            dropped: 0,
        }
    }

    /// Add everything the engine read from `tile`
    pub fn push_tile(&mut self, tile: &Tile, recognition: TileRecognition) {
        if !recognition.text.trim().is_empty() {
            self.transcript.push(recognition.text);
        }

        for token in recognition.tokens {
            let text = token.text.trim();
            if text.is_empty() {
                self.dropped += 1;
                continue;
            }

            let confidence = normalize_confidence(token.confidence);
            if confidence < self.min_confidence {
                self.dropped += 1;
                continue;
            }

            let Some(bbox) = self.to_frame_space(tile, &token.bbox) else {
                self.dropped += 1;
                continue;
            };
            if bbox.area() < self.min_area {
                self.dropped += 1;
                continue;
            }

            let word = RecognizedWord {
                text: text.to_string(),
                bbox,
                confidence,
            };
            let key = DedupKey::new(text, &bbox);
            match self.words.get(&key) {
                Some(existing) if existing.confidence >= confidence => {}
                _ => {
                    self.words.insert(key, word);
                }
            }
        }
    }

    /// Number of tokens discarded so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Translate a tile-local box to normalized frame space, clipped to the
    /// frame. `None` when nothing with positive size remains.
    fn to_frame_space(&self, tile: &Tile, pixels: &PixelBox) -> Option<NormalizedBoundingBox> {
        let PixelBox { x0, y0, x1, y1 } = *pixels;
        if ![x0, y0, x1, y1].iter().all(|v| v.is_finite()) {
            return None;
        }

        let left = (tile.x as f32 + x0.min(x1)).clamp(0.0, self.frame_width);
        let right = (tile.x as f32 + x0.max(x1)).clamp(0.0, self.frame_width);
        let top = (tile.y as f32 + y0.min(y1)).clamp(0.0, self.frame_height);
        let bottom = (tile.y as f32 + y0.max(y1)).clamp(0.0, self.frame_height);

        let width = right - left;
        let height = bottom - top;
        if width <= 0.0 || height <= 0.0 {
            return None;
        }

        Some(NormalizedBoundingBox {
            x: left / self.frame_width,
            y: top / self.frame_height,
            width: width / self.frame_width,
            height: height / self.frame_height,
        })
    }

    /// Produce the frame's result: words in reading order plus the transcript
    pub fn finish(self, duration: Duration, timestamp: u64) -> OcrResult {
        let mut words: Vec<RecognizedWord> = self.words.into_values().collect();
        words.sort_by(|a, b| {
            a.bbox
                .y
                .total_cmp(&b.bbox.y)
                .then(a.bbox.x.total_cmp(&b.bbox.x))
                .then_with(|| a.text.cmp(&b.text))
        });

        OcrResult {
            words,
            full_text: normalize_whitespace(&self.transcript.join(" ")),
            duration_ms: duration.as_secs_f64() * 1000.0,
            timestamp,
        }
    }
}

/// Collapse whitespace runs into single spaces and trim
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::engine::RawToken;

    fn tile(x: u32, y: u32) -> Tile {
        Tile {
            x,
            y,
            width: 384,
            height: 384,
        }
    }

    fn token(text: &str, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> RawToken {
        RawToken::new(text, confidence, PixelBox::from_rect(x, y, w, h))
    }

    #[test]
    fn test_overlapping_tiles_keep_higher_confidence() {
        let mut agg = FrameAggregator::new(1280, 720, 0.5, DEFAULT_MIN_AREA);
        // Same word seen from two tiles at the same frame position (400, 100)
        agg.push_tile(
            &tile(0, 0),
            TileRecognition::from_tokens(vec![token("Exit", 0.7, 400.0, 100.0, 60.0, 20.0)]),
        );
        agg.push_tile(
            &tile(307, 0),
            TileRecognition::from_tokens(vec![token("EXIT", 0.9, 93.0, 100.0, 60.0, 20.0)]),
        );

        let result = agg.finish(Duration::from_millis(5), 7);
        assert_eq!(result.words.len(), 1);
        assert_eq!(result.words[0].text, "EXIT");
        assert!((result.words[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(result.timestamp, 7);
    }

    #[test]
    fn test_lower_confidence_duplicate_does_not_replace() {
        let mut agg = FrameAggregator::new(1000, 1000, 0.0, 0.0);
        agg.push_tile(
            &tile(0, 0),
            TileRecognition::from_tokens(vec![token("Exit", 90.0, 10.0, 10.0, 50.0, 20.0)]),
        );
        agg.push_tile(
            &tile(0, 0),
            TileRecognition::from_tokens(vec![token("Exit", 70.0, 10.0, 10.0, 50.0, 20.0)]),
        );
        let result = agg.finish(Duration::ZERO, 0);
        assert_eq!(result.words.len(), 1);
        assert!((result.words[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_distinct_positions_are_not_merged() {
        let mut agg = FrameAggregator::new(1000, 1000, 0.0, 0.0);
        agg.push_tile(
            &tile(0, 0),
            TileRecognition::from_tokens(vec![
                token("a", 1.0, 10.0, 10.0, 20.0, 20.0),
                token("a", 1.0, 200.0, 10.0, 20.0, 20.0),
            ]),
        );
        assert_eq!(agg.finish(Duration::ZERO, 0).words.len(), 2);
    }

    #[test]
    fn test_filters_noise() {
        let mut agg = FrameAggregator::new(1000, 1000, 0.6, DEFAULT_MIN_AREA);
        agg.push_tile(
            &tile(0, 0),
            TileRecognition::from_tokens(vec![
                token("   ", 0.99, 0.0, 0.0, 50.0, 20.0),
                token("faint", 0.3, 0.0, 0.0, 50.0, 20.0),
                token("flat", 0.99, 0.0, 0.0, 50.0, 0.0),
                token("speck", 0.99, 0.0, 0.0, 2.0, 2.0),
                token("keep", 0.99, 100.0, 100.0, 50.0, 20.0),
            ]),
        );
        assert_eq!(agg.dropped(), 4);
        let result = agg.finish(Duration::ZERO, 0);
        assert_eq!(result.words.len(), 1);
        assert_eq!(result.words[0].text, "keep");
    }

    #[test]
    fn test_translation_to_normalized_space() {
        let mut agg = FrameAggregator::new(1000, 500, 0.0, 0.0);
        agg.push_tile(
            &Tile {
                x: 500,
                y: 250,
                width: 500,
                height: 250,
            },
            TileRecognition::from_tokens(vec![token("word", 1.0, 100.0, 50.0, 100.0, 25.0)]),
        );
        let result = agg.finish(Duration::ZERO, 0);
        let bbox = result.words[0].bbox;
        assert!((bbox.x - 0.6).abs() < 1e-6);
        assert!((bbox.y - 0.6).abs() < 1e-6);
        assert!((bbox.width - 0.1).abs() < 1e-6);
        assert!((bbox.height - 0.05).abs() < 1e-6);
        assert!(bbox.is_valid());
    }

    #[test]
    fn test_boxes_are_clipped_to_frame() {
        let mut agg = FrameAggregator::new(100, 100, 0.0, 0.0);
        agg.push_tile(
            &Tile {
                x: 50,
                y: 50,
                width: 50,
                height: 50,
            },
            TileRecognition::from_tokens(vec![token("edge", 1.0, 40.0, 40.0, 30.0, 30.0)]),
        );
        let result = agg.finish(Duration::ZERO, 0);
        let bbox = result.words[0].bbox;
        assert!(bbox.is_valid());
        assert!((bbox.x + bbox.width - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_words_sorted_in_reading_order() {
        let mut agg = FrameAggregator::new(1000, 1000, 0.0, 0.0);
        agg.push_tile(
            &tile(0, 0),
            TileRecognition::from_tokens(vec![
                token("third", 1.0, 10.0, 300.0, 40.0, 20.0),
                token("second", 1.0, 200.0, 10.0, 40.0, 20.0),
                token("first", 1.0, 10.0, 10.0, 40.0, 20.0),
            ]),
        );
        let texts: Vec<_> = agg
            .finish(Duration::ZERO, 0)
            .words
            .into_iter()
            .map(|w| w.text)
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_full_text_collapses_whitespace() {
        let mut agg = FrameAggregator::new(100, 100, 0.0, 0.0);
        agg.push_tile(
            &tile(0, 0),
            TileRecognition {
                text: "  Emergency\n\n Exit  ".to_string(),
                tokens: vec![],
            },
        );
        agg.push_tile(
            &tile(0, 0),
            TileRecognition {
                text: "\tOnly ".to_string(),
                tokens: vec![],
            },
        );
        assert_eq!(agg.finish(Duration::ZERO, 0).full_text, "Emergency Exit Only");
    }
}
