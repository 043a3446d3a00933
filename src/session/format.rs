//! Capture format selection

use crate::capture::traits::CaptureFormat;

/// A format choice plus the frame rate to run it at
#[derive(Debug, Clone, PartialEq)]
pub struct FormatChoice {
    pub format: CaptureFormat,
    pub frame_rate: f64,
}

/// Pick the format to run at `fps`.
///
/// Only formats with a frame rate range covering `fps` qualify; among those
/// the largest pixel count wins, ties going to the higher maximum frame rate.
/// With nothing qualifying, the `current` format is kept and the rate is
/// clamped into its first range.
pub fn select_format(
    formats: &[CaptureFormat],
    current: Option<&CaptureFormat>,
    fps: f64,
) -> Option<FormatChoice> {
    let mut best: Option<(&CaptureFormat, f64)> = None;

    for format in formats {
        let Some(range) = format.range_covering(fps) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((chosen, chosen_max)) => {
                format.pixel_count() > chosen.pixel_count()
                    || (format.pixel_count() == chosen.pixel_count() && range.max > chosen_max)
            }
        };
        if better {
            best = Some((format, range.max));
        }
    }

    if let Some((format, _)) = best {
        return Some(FormatChoice {
            format: format.clone(),
            frame_rate: fps,
        });
    }

    let fallback = current.or_else(|| formats.first())?;
    let range = fallback.frame_rate_ranges.first()?;
    tracing::debug!(
        "No format covers {}fps; keeping {}x{} at {}fps",
        fps,
        fallback.width,
        fallback.height,
        fps.clamp(range.min, range.max)
    );
    Some(FormatChoice {
        format: fallback.clone(),
        frame_rate: fps.clamp(range.min, range.max),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::standard_formats;
    use crate::capture::traits::FrameRateRange;

    fn format(width: u32, height: u32, max_fps: f64) -> CaptureFormat {
        CaptureFormat {
            width,
            height,
            frame_rate_ranges: vec![FrameRateRange::new(1.0, max_fps)],
            hdr_supported: false,
        }
    }

    #[test]
    fn test_highest_resolution_covering_target() {
        let formats = standard_formats();
        let choice = select_format(&formats, None, 30.0).unwrap();
        assert_eq!((choice.format.width, choice.format.height), (3840, 2160));

        let choice = select_format(&formats, None, 60.0).unwrap();
        assert_eq!((choice.format.width, choice.format.height), (1920, 1080));
        assert_eq!(choice.frame_rate, 60.0);
    }

    #[test]
    fn test_tie_goes_to_higher_max_rate() {
        let formats = vec![format(1920, 1080, 60.0), format(1920, 1080, 120.0)];
        let choice = select_format(&formats, None, 30.0).unwrap();
        assert_eq!(choice.format.frame_rate_ranges[0].max, 120.0);
    }

    #[test]
    fn test_fallback_clamps_current_format() {
        let formats = vec![format(1920, 1080, 30.0)];
        let choice = select_format(&formats, Some(&formats[0]), 60.0).unwrap();
        assert_eq!(choice.format.width, 1920);
        assert_eq!(choice.frame_rate, 30.0);
    }

    #[test]
    fn test_no_formats() {
        assert!(select_format(&[], None, 30.0).is_none());
    }
}
