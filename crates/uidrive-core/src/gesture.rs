//! Swipe geometry for scrolling lists.
//!
//! Scroll gestures are vertical swipes along the horizontal center of the
//! window, from 80% to 20% of its height (content moves up) or the reverse.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::element::ElementFrame;

/// Fraction of the window height where a downward scroll starts.
const NEAR_EDGE: f64 = 0.8;
/// Fraction of the window height where a downward scroll ends.
const FAR_EDGE: f64 = 0.2;

/// Which way the content should move into view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    /// Reveal content below the fold.
    #[default]
    Down,
    /// Reveal content above.
    Up,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrollDirection::Down => f.write_str("down"),
            ScrollDirection::Up => f.write_str("up"),
        }
    }
}

impl FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "down" => Ok(ScrollDirection::Down),
            "up" => Ok(ScrollDirection::Up),
            other => Err(format!("unknown scroll direction '{other}'")),
        }
    }
}

/// Start and end points of the swipe that scrolls `window` in `direction`.
pub fn swipe_points(window: &ElementFrame, direction: ScrollDirection) -> ((i32, i32), (i32, i32)) {
    let x = (window.x + window.width / 2.0).round() as i32;
    let near = (window.y + window.height * NEAR_EDGE).round() as i32;
    let far = (window.y + window.height * FAR_EDGE).round() as i32;
    match direction {
        ScrollDirection::Down => ((x, near), (x, far)),
        ScrollDirection::Up => ((x, far), (x, near)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> ElementFrame {
        ElementFrame {
            x: 0.0,
            y: 0.0,
            width: 1080.0,
            height: 2400.0,
        }
    }

    #[test]
    fn down_swipes_from_bottom_to_top() {
        assert_eq!(
            swipe_points(&window(), ScrollDirection::Down),
            ((540, 1920), (540, 480))
        );
    }

    #[test]
    fn up_is_the_reverse() {
        assert_eq!(
            swipe_points(&window(), ScrollDirection::Up),
            ((540, 480), (540, 1920))
        );
    }

    #[test]
    fn offset_windows_are_respected() {
        let frame = ElementFrame {
            x: 100.0,
            y: 50.0,
            width: 200.0,
            height: 1000.0,
        };
        assert_eq!(swipe_points(&frame, ScrollDirection::Down), ((200, 850), (200, 250)));
    }

    #[test]
    fn direction_parses() {
        assert_eq!("DOWN".parse::<ScrollDirection>().unwrap(), ScrollDirection::Down);
        assert!("left".parse::<ScrollDirection>().is_err());
    }
}
