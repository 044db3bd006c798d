// Recognition of anti-automation interstitials served in place of real pages.

pub mod detectors;

pub use detectors::{ChallengeDetection, ChallengeDetector, ChallengeType};
