//! Border detection over synthetic clips.

use image::RgbImage;
use std::path::Path;
use std::sync::Mutex;
use vframe_media::border::{detect_crop, CropMethod, CropParams};
use vframe_media::testing::{SyntheticLibrary, SyntheticVideo};
use vframe_media::{FrameSampler, GrayFrame, MediaResult, VideoInfo};
use vframe_models::{CropRect, ErrorKind};

fn library_with(path: &str, video: SyntheticVideo) -> SyntheticLibrary {
    let library = SyntheticLibrary::new();
    library.insert(path, video);
    library
}

/// Records the timestamps probe frames are requested at.
struct RecordingSampler {
    library: SyntheticLibrary,
    requested: Mutex<Vec<f64>>,
}

impl RecordingSampler {
    fn new(library: SyntheticLibrary) -> Self {
        Self {
            library,
            requested: Mutex::new(Vec::new()),
        }
    }

    fn requested(&self) -> Vec<f64> {
        self.requested.lock().unwrap().clone()
    }
}

impl FrameSampler for RecordingSampler {
    fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        self.library.probe(path)
    }

    fn gray_frame_at(&self, path: &Path, timestamp: f64, width: u32, height: u32) -> MediaResult<GrayFrame> {
        self.requested.lock().unwrap().push(timestamp);
        self.library.gray_frame_at(path, timestamp, width, height)
    }

    fn rgb_frame_at(&self, path: &Path, timestamp: f64) -> MediaResult<RgbImage> {
        self.library.rgb_frame_at(path, timestamp)
    }

    fn scan_gray(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
        visit: &mut dyn FnMut(f64, &GrayFrame) -> MediaResult<()>,
    ) -> MediaResult<u64> {
        self.library.scan_gray(path, fps, width, height, visit)
    }
}

fn assert_close(got: &[f64], want: &[f64]) {
    assert_eq!(got.len(), want.len(), "{:?} vs {:?}", got, want);
    for (g, w) in got.iter().zip(want) {
        assert!((g - w).abs() < 1e-9, "{:?} vs {:?}", got, want);
    }
}

#[test]
fn test_letterbox_found_exactly() {
    let library = library_with("/in/a.mp4", SyntheticVideo::new(640, 360, 10.0).with_border(20));

    let detection = detect_crop(&library, Path::new("/in/a.mp4"), &CropParams::default()).unwrap();

    assert_eq!(detection.rect, CropRect::new(20, 20, 600, 320));
    assert_eq!(detection.method, CropMethod::Uniform);
    assert_eq!(detection.probes, 5);
    assert!(!detection.is_full_frame());
}

#[test]
fn test_pillarbox_found() {
    let video = SyntheticVideo::new(640, 360, 10.0).with_content(CropRect::new(80, 0, 480, 360));
    let library = library_with("/in/p.mp4", video);

    let detection = detect_crop(&library, Path::new("/in/p.mp4"), &CropParams::default()).unwrap();

    assert_eq!(detection.rect, CropRect::new(80, 0, 480, 360));
}

#[test]
fn test_title_card_probe_is_outvoted() {
    // The third of five probes (t = 5s) lands on a black title card.
    let video = SyntheticVideo::new(640, 360, 10.0)
        .with_border(20)
        .with_blackout(4.5, 5.5);
    let library = library_with("/in/t.mp4", video);

    let detection = detect_crop(&library, Path::new("/in/t.mp4"), &CropParams::default()).unwrap();

    assert_eq!(detection.rect, CropRect::new(20, 20, 600, 320));
    assert_eq!(detection.method, CropMethod::Uniform);
}

#[test]
fn test_noisy_bars_use_gradient_fallback() {
    let video = SyntheticVideo::new(640, 360, 10.0)
        .with_border(20)
        .with_noisy_border(9);
    let library = library_with("/in/n.mp4", video);

    let detection = detect_crop(&library, Path::new("/in/n.mp4"), &CropParams::default()).unwrap();

    assert_eq!(detection.method, CropMethod::Gradient);
    let expected = CropRect::new(20, 20, 600, 320);
    let rect = detection.rect;
    for (got, want) in [
        (rect.x, expected.x),
        (rect.y, expected.y),
        (rect.right(), expected.right()),
        (rect.bottom(), expected.bottom()),
    ] {
        assert!(got.abs_diff(want) <= 4, "{} not within 4px of {}", rect, expected);
    }
}

#[test]
fn test_borderless_clip_keeps_full_frame() {
    let library = library_with("/in/f.mp4", SyntheticVideo::new(320, 180, 10.0));

    let detection = detect_crop(&library, Path::new("/in/f.mp4"), &CropParams::default()).unwrap();

    assert!(detection.is_full_frame());
    assert_eq!(detection.rect, CropRect::full_frame(320, 180));
}

#[test]
fn test_all_black_clip_fails_detection() {
    let video = SyntheticVideo::new(320, 180, 10.0).with_blackout(0.0, 10.0);
    let library = library_with("/in/black.mp4", video);

    let err = detect_crop(&library, Path::new("/in/black.mp4"), &CropParams::default()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CropDetectionFailed);
    assert!(!err.is_fatal());
}

#[test]
fn test_sliver_rejected_by_min_crop_ratio() {
    let video = SyntheticVideo::new(640, 360, 10.0).with_content(CropRect::new(300, 0, 20, 360));
    let library = library_with("/in/s.mp4", video);

    let err = detect_crop(&library, Path::new("/in/s.mp4"), &CropParams::default()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CropDetectionFailed);
}

#[test]
fn test_unreadable_sources() {
    let library = library_with("/in/bad.mp4", SyntheticVideo::new(320, 180, 10.0).corrupt());

    let err = detect_crop(&library, Path::new("/in/bad.mp4"), &CropParams::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceUnreadable);

    let err = detect_crop(&library, Path::new("/in/missing.mp4"), &CropParams::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceUnreadable);
    assert!(err.is_fatal());
}

#[test]
fn test_probes_centred_in_uneven_windows() {
    // 7s clip, 3 probes: the 6.3s middle window splits into 2.1s thirds.
    let sampler = RecordingSampler::new(library_with("/in/u.mp4", SyntheticVideo::new(640, 360, 7.0).with_border(20)));
    let params = CropParams {
        probe_count: 3,
        ..Default::default()
    };

    let detection = detect_crop(&sampler, Path::new("/in/u.mp4"), &params).unwrap();

    assert_close(&sampler.requested(), &[1.4, 3.5, 5.6]);
    assert_eq!(detection.probes, 3);
    assert_eq!(detection.rect, CropRect::new(20, 20, 600, 320));
}

#[test]
fn test_even_probe_count_outvotes_title_card() {
    // 4 probes over 10s land at 1.625, 3.875, 6.125 and 8.375; the second
    // hits a black card.
    let video = SyntheticVideo::new(640, 360, 10.0)
        .with_border(20)
        .with_blackout(3.75, 4.0);
    let sampler = RecordingSampler::new(library_with("/in/c.mp4", video));
    let params = CropParams {
        probe_count: 4,
        ..Default::default()
    };

    let detection = detect_crop(&sampler, Path::new("/in/c.mp4"), &params).unwrap();

    let requested = sampler.requested();
    assert_close(&requested, &[1.625, 3.875, 6.125, 8.375]);
    assert!(requested.iter().all(|t| (0.5..=9.5).contains(t)));
    assert_eq!(detection.rect, CropRect::new(20, 20, 600, 320));
    assert_eq!(detection.method, CropMethod::Uniform);
}
